//! Error types for `quipu-sign`.
//!
//! Certificate problems are configuration errors: surfaced immediately,
//! never retried, and they require operator intervention. Signing problems
//! are atomic — when `SignatureFailed` comes back, nothing was persisted.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("no certificate bundle is configured for this tenant")]
  NotConfigured,

  #[error("certificate bundle passphrase is incorrect")]
  InvalidPassword,

  #[error("certificate bundle is malformed: {0}")]
  Malformed(String),

  #[error("certificate expired at {0}")]
  Expired(DateTime<Utc>),

  #[error("certificate is not valid until {0}")]
  NotYetValid(DateTime<Utc>),

  #[error("signature failed: {0}")]
  SignatureFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
  /// Wrap any step failure of the signing algorithm, cause attached.
  pub fn signature_failed(
    cause: impl std::error::Error + Send + Sync + 'static,
  ) -> Self {
    Self::SignatureFailed(Box::new(cause))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
