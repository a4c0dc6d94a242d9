//! Error type for `quipu-xml`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("xml error: {0}")]
  Xml(String),

  #[error("malformed document: {0}")]
  Malformed(String),

  #[error("document has no signature placeholder")]
  MissingPlaceholder,

  #[error("document has no signature element")]
  MissingSignature,
}

impl From<quick_xml::Error> for Error {
  fn from(e: quick_xml::Error) -> Self { Error::Xml(e.to_string()) }
}

impl From<std::io::Error> for Error {
  fn from(e: std::io::Error) -> Self { Error::Xml(e.to_string()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
