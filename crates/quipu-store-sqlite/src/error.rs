//! Error type for `quipu-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] quipu_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("document not found: {0}")]
  DocumentNotFound(uuid::Uuid),

  #[error("job not found: {0}")]
  JobNotFound(uuid::Uuid),

  /// The (tenant, series, sequence) triple is already taken.
  #[error("duplicate document number {series}-{sequence}")]
  DuplicateNumber { series: String, sequence: u32 },

  #[error("document {0} is already signed")]
  AlreadySigned(uuid::Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
