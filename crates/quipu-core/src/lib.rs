//! Core types and trait definitions for the Quipu fiscal-document pipeline.
//!
//! This crate is deliberately free of HTTP, database, and cryptography
//! dependencies. All other crates depend on it; it depends on nothing
//! proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod document;
pub mod error;
pub mod hooks;
pub mod job;
pub mod payload;
pub mod settings;
pub mod status;
pub mod store;

pub use error::{Error, Result};
