//! Canonical XML layer: document rendering, exclusive canonicalization, and
//! digest helpers.
//!
//! Everything here is pure byte/string work — no I/O, no keys. The signer
//! crate builds on these primitives.

pub mod c14n;
pub mod digest;
pub mod error;
pub mod render;

pub use error::{Error, Result};
