//! The submission pipeline: operator-facing operations, the durable job
//! queue's worker, and the remote tax-authority protocol client.
//!
//! Storage and collaborators are injected through the `quipu-core` traits,
//! so everything here is testable without a real database or network.

#![allow(async_fn_in_trait)]

pub mod backoff;
pub mod client;
pub mod collab;
pub mod error;
pub mod service;
pub mod worker;

pub use error::{Error, Result};
pub use service::{Pipeline, PipelineConfig};
pub use worker::Worker;
