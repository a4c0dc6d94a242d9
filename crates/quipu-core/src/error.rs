//! Error types for `quipu-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::status::DocumentStatus;

#[derive(Debug, Error)]
pub enum Error {
  #[error("document not found: {0}")]
  DocumentNotFound(Uuid),

  #[error("job not found: {0}")]
  JobNotFound(Uuid),

  #[error("illegal status transition: {from:?} -> {to:?}")]
  IllegalTransition {
    from: DocumentStatus,
    to:   DocumentStatus,
  },

  #[error("document {0} is already signed")]
  AlreadySigned(Uuid),

  #[error("document {0} has no signed artifact")]
  NotSigned(Uuid),

  #[error("retry not allowed from status {0:?}")]
  RetryNotAllowed(DocumentStatus),

  #[error(
    "document {0} was rejected for content; the signed artifact cannot be \
     resubmitted — correct the data and re-derive the document"
  )]
  RejectedArtifact(Uuid),

  #[error("document has no line items")]
  EmptyDocument,

  #[error("invalid customer data: {0}")]
  InvalidCustomerData(String),

  #[error("document totals disagree with line items: {0}")]
  TotalsMismatch(String),

  #[error("electronic invoicing is not enabled for tenant {0}")]
  FeatureDisabled(Uuid),

  #[error("fiscal settings are not configured for tenant {0}")]
  SettingsMissing(Uuid),

  #[error("no sale snapshot found for document {0}")]
  SaleMissing(Uuid),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
