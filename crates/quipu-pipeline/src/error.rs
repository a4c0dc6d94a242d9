//! Error type for `quipu-pipeline`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("{0}")]
  Core(#[from] quipu_core::Error),

  #[error("xml error: {0}")]
  Xml(#[from] quipu_xml::Error),

  #[error("{0}")]
  Sign(#[from] quipu_sign::Error),

  #[error("{0}")]
  Collaborator(#[from] quipu_core::hooks::CollaboratorError),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("operation requires operator privilege")]
  OperatorRequired,

  #[error("job kind {kind:?} does not apply to document {document_id}")]
  WrongJobKind {
    document_id: Uuid,
    kind:        quipu_core::job::JobKind,
  },
}

impl Error {
  pub fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
