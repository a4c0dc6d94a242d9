//! Error mapping to HTTP responses.
//!
//! Operators see a classified error and an actionable next step, never a raw
//! stack trace or internal detail. The `hint` field tells them whether to
//! retry, fix configuration, fix the document data, or escalate.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use quipu_pipeline::Error as PipelineError;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("unauthorized")]
  Unauthorized,

  #[error("not found")]
  NotFound,

  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("{0}")]
  Pipeline(#[from] PipelineError),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// `(status, error slug, operator hint)` for a pipeline failure.
fn classify(error: &PipelineError) -> (StatusCode, &'static str, &'static str) {
  use quipu_core::Error as Core;
  use quipu_sign::Error as Sign;

  match error {
    PipelineError::Core(core) => match core {
      Core::DocumentNotFound(_) | Core::JobNotFound(_) => {
        (StatusCode::NOT_FOUND, "not_found", "check the identifier")
      }
      Core::AlreadySigned(_) => {
        (StatusCode::CONFLICT, "already_signed", "use the override path if re-signing is intended")
      }
      Core::NotSigned(_) => {
        (StatusCode::CONFLICT, "not_signed", "sign the document first")
      }
      Core::IllegalTransition { .. } => {
        (StatusCode::CONFLICT, "illegal_transition", "refresh the document status")
      }
      Core::RetryNotAllowed(_) => {
        (StatusCode::CONFLICT, "retry_not_allowed", "retry applies to error or rejected documents only")
      }
      Core::RejectedArtifact(_) => {
        (StatusCode::CONFLICT, "rejected_artifact", "correct the data and re-derive the document")
      }
      Core::EmptyDocument | Core::InvalidCustomerData(_) | Core::TotalsMismatch(_) => {
        (StatusCode::UNPROCESSABLE_ENTITY, "validation_failed", "fix the document data")
      }
      Core::FeatureDisabled(_) => {
        (StatusCode::FORBIDDEN, "feature_disabled", "enable electronic invoicing for this tenant")
      }
      Core::SettingsMissing(_) => {
        (StatusCode::CONFLICT, "settings_missing", "complete the tenant's fiscal configuration")
      }
      Core::SaleMissing(_) => {
        (StatusCode::CONFLICT, "sale_missing", "the originating sale is unavailable")
      }
      Core::Serialization(_) => {
        (StatusCode::INTERNAL_SERVER_ERROR, "internal", "contact support")
      }
    },
    PipelineError::Sign(sign) => match sign {
      Sign::NotConfigured | Sign::Malformed(_) => {
        (StatusCode::CONFLICT, "certificate_not_configured", "upload a valid certificate bundle")
      }
      Sign::InvalidPassword => {
        (StatusCode::CONFLICT, "certificate_invalid_password", "correct the bundle passphrase")
      }
      Sign::Expired(_) | Sign::NotYetValid(_) => {
        (StatusCode::CONFLICT, "certificate_out_of_validity", "renew the certificate")
      }
      Sign::SignatureFailed(_) => {
        (StatusCode::INTERNAL_SERVER_ERROR, "signature_failed", "contact support")
      }
    },
    PipelineError::OperatorRequired => {
      (StatusCode::FORBIDDEN, "operator_required", "authenticate with operator credentials")
    }
    PipelineError::WrongJobKind { .. } => {
      (StatusCode::CONFLICT, "wrong_job_kind", "check the document kind and remote state")
    }
    PipelineError::Xml(_) | PipelineError::Collaborator(_) | PipelineError::Store(_) => {
      (StatusCode::INTERNAL_SERVER_ERROR, "internal", "contact support")
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::Unauthorized => {
        let mut res = (
          StatusCode::UNAUTHORIZED,
          Json(json!({ "error": "unauthorized" })),
        )
          .into_response();
        res.headers_mut().insert(
          axum::http::header::WWW_AUTHENTICATE,
          axum::http::HeaderValue::from_static("Basic realm=\"quipu\""),
        );
        res
      }
      ApiError::NotFound => (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not_found" })),
      )
        .into_response(),
      ApiError::BadRequest(message) => (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "bad_request", "message": message })),
      )
        .into_response(),
      ApiError::Pipeline(error) => {
        let (status, slug, hint) = classify(&error);
        // Internal failures keep their detail out of the response body.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
          "internal error".to_string()
        } else {
          error.to_string()
        };
        (
          status,
          Json(json!({ "error": slug, "message": message, "hint": hint })),
        )
          .into_response()
      }
      ApiError::Store(_) => (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal", "message": "internal error", "hint": "contact support" })),
      )
        .into_response(),
    }
  }
}
