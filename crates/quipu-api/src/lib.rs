//! HTTP operator surface for the Quipu fiscal pipeline.
//!
//! Exposes an axum [`Router`] with the sign/enqueue/retry/void operations,
//! the admin requeue, and the document read models, backed by any store and
//! protocol client through the `quipu-core`/`quipu-pipeline` seams.

pub mod auth;
pub mod error;
pub mod handlers;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc};

use axum::{
  Router,
  routing::{get, post},
};
use serde::Deserialize;

use quipu_core::{
  settings::Environment,
  store::{DocumentStore, JobStore},
};
use quipu_pipeline::{Pipeline, client::TaxAuthorityClient};

use auth::AuthConfig;

// ─── Configuration ───────────────────────────────────────────────────────────

/// HTTP server section of `config.toml`.
#[derive(Deserialize, Clone)]
pub struct ServerConfig {
  pub host:                   String,
  pub port:                   u16,
  pub store_path:             PathBuf,
  pub auth_username:          String,
  pub auth_password_hash:     String,
  pub operator_username:      String,
  pub operator_password_hash: String,
}

/// Fiscal section of `config.toml` — the standalone deployment's single
/// tenant.
#[derive(Deserialize, Clone)]
pub struct FiscalConfig {
  pub tax_id:           String,
  pub business_name:    String,
  pub address:          Option<String>,
  /// `sandbox` or `production`; switching is a deliberate config change.
  pub environment:      Environment,
  pub cert_bundle_path: Option<PathBuf>,
  pub cert_passphrase:  Option<String>,
  pub sol_username:     String,
  pub sol_password:     String,
  pub enabled:          bool,
  /// Base URL of the host system's internal API, for sale lookups.
  pub sales_base_url:   String,
}

/// Full runtime configuration, deserialised from `config.toml`.
#[derive(Deserialize, Clone)]
pub struct AppConfig {
  pub server: ServerConfig,
  pub fiscal: FiscalConfig,
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, C> {
  pub pipeline: Pipeline<S, C>,
  pub auth:     Arc<AuthConfig>,
}

impl<S, C> Clone for AppState<S, C> {
  fn clone(&self) -> Self {
    Self { pipeline: self.pipeline.clone(), auth: self.auth.clone() }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the operator router for `state`.
pub fn router<S, C>(state: AppState<S, C>) -> Router
where
  S: DocumentStore + JobStore + 'static,
  C: TaxAuthorityClient + 'static,
{
  Router::new()
    .route("/documents", get(handlers::list::<S, C>))
    .route("/documents/{id}", get(handlers::detail::<S, C>))
    .route("/documents/{id}/sign", post(handlers::sign::<S, C>))
    .route("/documents/{id}/enqueue", post(handlers::enqueue::<S, C>))
    .route("/documents/{id}/retry", post(handlers::retry::<S, C>))
    .route("/documents/{id}/void", post(handlers::void_document::<S, C>))
    .route("/admin/requeue", post(handlers::requeue::<S, C>))
    .layer(tower_http::trace::TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Integration tests ───────────────────────────────────────────────────────
