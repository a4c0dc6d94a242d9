//! Ready-made collaborator implementations for standalone deployments.
//!
//! The pipeline's collaborators (audit, feature flags, sales, settings) are
//! owned by the host system in a full installation. The implementations
//! here cover the standalone server: a tracing-backed audit trail, a
//! config-driven gate, single-tenant settings from the config file, and an
//! HTTP adapter that fetches sale snapshots from the host system's internal
//! API.

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use quipu_core::{
  hooks::{
    AuditEvent, AuditSink, CollaboratorError, FeatureGate, SaleSource,
    SettingsSource,
  },
  payload::SaleSnapshot,
  settings::TenantFiscalSettings,
};

// ─── Audit ───────────────────────────────────────────────────────────────────

/// Audit sink that emits structured tracing events. Infallible by design:
/// an audit line that cannot be written is a logging concern, never a
/// pipeline failure.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
  async fn append(&self, event: AuditEvent) {
    info!(
      target: "quipu::audit",
      tenant_id = %event.tenant_id,
      actor_id = ?event.actor_id,
      action = %event.action,
      entity_id = %event.entity_id,
      severity = ?event.severity,
      metadata = %event.metadata,
      "audit"
    );
  }
}

// ─── Feature gate ────────────────────────────────────────────────────────────

/// Config-driven gate for deployments without a flag service.
pub struct StaticFeatureGate {
  pub enabled: bool,
}

#[async_trait]
impl FeatureGate for StaticFeatureGate {
  async fn is_enabled(&self, _tenant_id: Uuid, _feature: &str) -> bool {
    self.enabled
  }
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Single-tenant settings resolved once from the config file.
pub struct FixedSettingsSource {
  pub settings: TenantFiscalSettings,
}

#[async_trait]
impl SettingsSource for FixedSettingsSource {
  async fn fiscal_settings(
    &self,
    _tenant_id: Uuid,
  ) -> Result<Option<TenantFiscalSettings>, CollaboratorError> {
    Ok(Some(self.settings.clone()))
  }
}

// ─── Sales ───────────────────────────────────────────────────────────────────

/// Fetches sale snapshots from the host system over its internal API:
/// `GET {base_url}/internal/documents/{id}/sale`.
pub struct HttpSaleSource {
  http:     reqwest::Client,
  base_url: String,
}

impl HttpSaleSource {
  pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
    Ok(Self {
      http:     reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?,
      base_url: base_url.into(),
    })
  }
}

#[async_trait]
impl SaleSource for HttpSaleSource {
  async fn sale_for_document(
    &self,
    document_id: Uuid,
  ) -> Result<Option<SaleSnapshot>, CollaboratorError> {
    let url = format!(
      "{}/internal/documents/{document_id}/sale",
      self.base_url.trim_end_matches('/')
    );
    let response = self
      .http
      .get(&url)
      .send()
      .await
      .map_err(|e| CollaboratorError(format!("sale lookup: {e}")))?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !response.status().is_success() {
      warn!(%document_id, status = %response.status(), "sale lookup failed");
      return Err(CollaboratorError(format!(
        "sale lookup returned {}",
        response.status()
      )));
    }

    let snapshot = response
      .json::<SaleSnapshot>()
      .await
      .map_err(|e| CollaboratorError(format!("sale decode: {e}")))?;
    Ok(Some(snapshot))
  }
}
