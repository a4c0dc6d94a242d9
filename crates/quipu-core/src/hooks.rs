//! Interfaces to external collaborators.
//!
//! The pipeline consumes these; it never owns their storage or behaviour.
//! Unlike the store traits, these are object-safe (`async_trait`) so the
//! pipeline can hold them as trait objects — deployments swap collaborators
//! at wiring time without touching the pipeline's type signature.
//!
//! Audit is fire-and-forget by contract — an implementation must swallow its
//! own failures rather than propagate them into the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{payload::SaleSnapshot, settings::TenantFiscalSettings};

/// Feature flag gating every pipeline action.
pub const FEATURE_ELECTRONIC_INVOICING: &str = "ELECTRONIC_INVOICING";

/// Failure inside a collaborator, opaque to the pipeline.
#[derive(Debug, Error)]
#[error("collaborator error: {0}")]
pub struct CollaboratorError(pub String);

// ─── Audit ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
  Info,
  Warning,
  /// Reserved for privileged overrides and compliance-relevant failures.
  High,
}

/// One meaningful pipeline transition, as handed to the audit sink.
///
/// Metadata carries document id, job id, attempt count, error class —
/// enough to diagnose, never credentials or key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
  pub tenant_id: Uuid,
  /// Operator or system actor; `None` for worker-originated events.
  pub actor_id:  Option<Uuid>,
  pub action:    String,
  pub entity_id: Uuid,
  pub severity:  AuditSeverity,
  pub metadata:  serde_json::Value,
}

/// Receives one event per meaningful transition. Must never block the
/// pipeline and must never fail it; hence the infallible signature.
#[async_trait]
pub trait AuditSink: Send + Sync {
  async fn append(&self, event: AuditEvent);
}

// ─── Feature gate ────────────────────────────────────────────────────────────

/// Multi-tenant feature flags, owned elsewhere.
#[async_trait]
pub trait FeatureGate: Send + Sync {
  async fn is_enabled(&self, tenant_id: Uuid, feature: &str) -> bool;
}

// ─── Sales ───────────────────────────────────────────────────────────────────

/// The checkout subsystem's view of the sale behind a document.
#[async_trait]
pub trait SaleSource: Send + Sync {
  async fn sale_for_document(
    &self,
    document_id: Uuid,
  ) -> Result<Option<SaleSnapshot>, CollaboratorError>;
}

// ─── Settings ────────────────────────────────────────────────────────────────

/// Per-tenant fiscal configuration, with secret references already resolved.
#[async_trait]
pub trait SettingsSource: Send + Sync {
  async fn fiscal_settings(
    &self,
    tenant_id: Uuid,
  ) -> Result<Option<TenantFiscalSettings>, CollaboratorError>;
}
