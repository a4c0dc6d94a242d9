//! Certificate handling and enveloped XML-DSig signing.
//!
//! Key material lives in memory only: it is re-derived from the encrypted
//! bundle per signing session and never written anywhere in parsed form.

pub mod error;
pub mod material;
pub mod signer;
pub mod verify;

pub use error::{Error, Result};
pub use material::CertificateMaterial;
pub use signer::{SignedDocument, sign_document};
