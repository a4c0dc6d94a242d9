//! Operator-facing pipeline operations: sign, enqueue, retry, requeue, void.
//!
//! Every operation checks the tenant's feature gate first and appends an
//! audit event on success. Status never changes outside the store's guarded
//! transitions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use quipu_core::{
  document::{FiscalDocument, SignedArtifacts},
  hooks::{
    AuditEvent, AuditSeverity, AuditSink, FEATURE_ELECTRONIC_INVOICING,
    FeatureGate, SaleSource, SettingsSource,
  },
  job::{EnqueueOutcome, JobKind, NewJob},
  status::DocumentStatus,
  store::{DocumentFilter, DocumentStore, JobStore},
};
use quipu_sign::CertificateMaterial;
use quipu_xml::render::{render, type_code};

use crate::{
  Error, Result,
  client::TaxAuthorityClient,
};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Tunables for the queue and worker.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// Attempt ceiling for transiently failing jobs.
  pub max_attempts:      u32,
  /// First retry delay; doubles per attempt.
  pub backoff_base:      Duration,
  /// Upper bound for any retry delay.
  pub backoff_cap:       Duration,
  /// Worker poll-loop interval.
  pub poll_interval:     Duration,
  /// Minimum wait before (re)polling a ticket, as the authority requires.
  pub ticket_poll_delay: Duration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      max_attempts:      6,
      backoff_base:      Duration::from_secs(30),
      backoff_cap:       Duration::from_secs(3600),
      poll_interval:     Duration::from_secs(5),
      ticket_poll_delay: Duration::from_secs(90),
    }
  }
}

// ─── Actor ───────────────────────────────────────────────────────────────────

/// Who is performing an operator-facing operation.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
  pub id:       Uuid,
  /// Elevated privilege: required for requeue and for re-sign overrides.
  pub operator: bool,
}

/// Outcome of a successful sign.
#[derive(Debug, Clone)]
pub struct SignOutcome {
  pub status:       DocumentStatus,
  pub content_hash: String,
}

// ─── Pipeline ────────────────────────────────────────────────────────────────

/// The fiscal pipeline service. Storage and protocol client are generic;
/// collaborators are trait objects wired at startup.
pub struct Pipeline<S, C> {
  pub(crate) store:    Arc<S>,
  pub(crate) client:   Arc<C>,
  pub(crate) audit:    Arc<dyn AuditSink>,
  pub(crate) gate:     Arc<dyn FeatureGate>,
  pub(crate) sales:    Arc<dyn SaleSource>,
  pub(crate) settings: Arc<dyn SettingsSource>,
  pub(crate) config:   PipelineConfig,
}

impl<S, C> Clone for Pipeline<S, C> {
  fn clone(&self) -> Self {
    Self {
      store:    self.store.clone(),
      client:   self.client.clone(),
      audit:    self.audit.clone(),
      gate:     self.gate.clone(),
      sales:    self.sales.clone(),
      settings: self.settings.clone(),
      config:   self.config.clone(),
    }
  }
}

impl<S, C> Pipeline<S, C>
where
  S: DocumentStore + JobStore,
  C: TaxAuthorityClient,
{
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    store: Arc<S>,
    client: Arc<C>,
    audit: Arc<dyn AuditSink>,
    gate: Arc<dyn FeatureGate>,
    sales: Arc<dyn SaleSource>,
    settings: Arc<dyn SettingsSource>,
    config: PipelineConfig,
  ) -> Self {
    Self { store, client, audit, gate, sales, settings, config }
  }

  pub fn store(&self) -> &Arc<S> { &self.store }

  async fn require_document(&self, id: Uuid) -> Result<FiscalDocument> {
    self
      .store
      .get_document(id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::Core(quipu_core::Error::DocumentNotFound(id)))
  }

  async fn require_enabled(&self, tenant_id: Uuid) -> Result<()> {
    if !self
      .gate
      .is_enabled(tenant_id, FEATURE_ELECTRONIC_INVOICING)
      .await
    {
      return Err(Error::Core(quipu_core::Error::FeatureDisabled(tenant_id)));
    }
    Ok(())
  }

  async fn audit(
    &self,
    document: &FiscalDocument,
    actor: Option<&Actor>,
    action: &str,
    severity: AuditSeverity,
    metadata: serde_json::Value,
  ) {
    self
      .audit
      .append(AuditEvent {
        tenant_id: document.tenant_id,
        actor_id:  actor.map(|a| a.id),
        action:    action.to_string(),
        entity_id: document.document_id,
        severity,
        metadata,
      })
      .await;
  }

  // ── Sign ──────────────────────────────────────────────────────────────────

  /// Build, render, and sign the document, then store the artifacts and move
  /// it to `Signed`.
  ///
  /// `override_resign` re-signs a document that already carries an artifact
  /// (including an `Accepted` one); it demands operator privilege and is
  /// audited as a distinct high-severity event.
  pub async fn sign(
    &self,
    document_id: Uuid,
    actor: &Actor,
    override_resign: bool,
  ) -> Result<SignOutcome> {
    let document = self.require_document(document_id).await?;
    self.require_enabled(document.tenant_id).await?;

    if override_resign && !actor.operator {
      return Err(Error::OperatorRequired);
    }
    if document.artifacts.is_some() && !override_resign {
      return Err(Error::Core(quipu_core::Error::AlreadySigned(document_id)));
    }

    let settings = self
      .settings
      .fiscal_settings(document.tenant_id)
      .await?
      .ok_or(Error::Core(quipu_core::Error::SettingsMissing(
        document.tenant_id,
      )))?;
    if !settings.enabled {
      return Err(Error::Core(quipu_core::Error::FeatureDisabled(
        document.tenant_id,
      )));
    }

    let sale = self
      .sales
      .sale_for_document(document_id)
      .await?
      .ok_or(Error::Core(quipu_core::Error::SaleMissing(document_id)))?;

    // Notes carry the full number of the document they modify.
    let reference_number = match document.reference {
      Some(ref_id) => Some(self.require_document(ref_id).await?.number.full()),
      None => None,
    };

    let payload =
      quipu_core::payload::build_payload(&document, &sale, reference_number)?;
    let unsigned = render(&payload)?;

    let material = CertificateMaterial::load(settings.cert_bundle.as_ref())?;
    let signed = quipu_sign::sign_document(&unsigned, &material, Utc::now())?;

    let artifacts = SignedArtifacts {
      qr_payload:   qr_payload(&document, &signed.content_hash),
      xml:          signed.xml,
      digest_b64:   signed.digest_b64,
      content_hash: signed.content_hash.clone(),
    };

    self
      .store
      .set_signed(document_id, artifacts, override_resign)
      .await
      .map_err(Error::store)?;

    let (action, severity) = if override_resign {
      ("document.resigned.override", AuditSeverity::High)
    } else {
      ("document.signed", AuditSeverity::Info)
    };
    self
      .audit(
        &document,
        Some(actor),
        action,
        severity,
        json!({ "content_hash": signed.content_hash }),
      )
      .await;

    Ok(SignOutcome {
      status:       DocumentStatus::Signed,
      content_hash: signed.content_hash,
    })
  }

  // ── Enqueue ───────────────────────────────────────────────────────────────

  /// Idempotently enqueue a submission job for the document.
  pub async fn enqueue(
    &self,
    document_id: Uuid,
    kind: JobKind,
    actor: Option<&Actor>,
  ) -> Result<EnqueueOutcome> {
    let document = self.require_document(document_id).await?;
    self.require_enabled(document.tenant_id).await?;
    self.check_job_kind(&document, kind)?;

    let mut job = NewJob::new(document.tenant_id, document_id, kind);
    if kind == JobKind::PollTicket {
      job = job.not_before(
        Utc::now() + chrono::Duration::from_std(self.config.ticket_poll_delay)
          .unwrap_or_else(|_| chrono::Duration::seconds(90)),
      );
    }

    let outcome = self.store.enqueue(job).await.map_err(Error::store)?;
    if outcome.created() {
      self
        .audit(
          &document,
          actor,
          "job.enqueued",
          AuditSeverity::Info,
          json!({ "job_id": outcome.job_id(), "kind": kind.discriminant() }),
        )
        .await;
    }
    Ok(outcome)
  }

  fn check_job_kind(
    &self,
    document: &FiscalDocument,
    kind: JobKind,
  ) -> Result<()> {
    let applies = match kind {
      JobKind::SendDocument => {
        !document.kind.is_batch() && document.artifacts.is_some()
      }
      JobKind::SendSummary => {
        document.kind.is_batch() && document.artifacts.is_some()
      }
      JobKind::PollTicket => document.remote.ticket().is_some(),
    };
    if applies {
      Ok(())
    } else if document.artifacts.is_none() && kind != JobKind::PollTicket {
      Err(Error::Core(quipu_core::Error::NotSigned(document.document_id)))
    } else {
      Err(Error::WrongJobKind { document_id: document.document_id, kind })
    }
  }

  // ── Retry ─────────────────────────────────────────────────────────────────

  /// Resume the flow for a document stuck in `Error`, reusing the existing
  /// signed artifact.
  ///
  /// `Rejected` counts as retryable by the state machine, but a rejection is
  /// a judgment on the document's content: resubmitting the identical
  /// artifact is refused. The path forward there is a corrected, re-derived
  /// document via the privileged re-sign.
  pub async fn retry(
    &self,
    document_id: Uuid,
    actor: &Actor,
  ) -> Result<EnqueueOutcome> {
    let document = self.require_document(document_id).await?;
    self.require_enabled(document.tenant_id).await?;

    if !document.status.is_retryable() {
      return Err(Error::Core(quipu_core::Error::RetryNotAllowed(
        document.status,
      )));
    }
    if document.status == DocumentStatus::Rejected {
      return Err(Error::Core(quipu_core::Error::RejectedArtifact(document_id)));
    }
    if document.artifacts.is_none() {
      return Err(Error::Core(quipu_core::Error::NotSigned(document_id)));
    }

    self
      .store
      .set_status(document_id, DocumentStatus::Signed)
      .await
      .map_err(Error::store)?;

    let kind = if document.kind.is_batch() {
      JobKind::SendSummary
    } else {
      JobKind::SendDocument
    };
    let outcome = self
      .store
      .enqueue(NewJob::new(document.tenant_id, document_id, kind))
      .await
      .map_err(Error::store)?;

    self
      .audit(
        &document,
        Some(actor),
        "document.retry",
        AuditSeverity::Info,
        json!({ "job_id": outcome.job_id(), "from_status": document.status.discriminant() }),
      )
      .await;

    Ok(outcome)
  }

  // ── Requeue ───────────────────────────────────────────────────────────────

  /// Bulk recovery for documents stuck without an active job: `Signed` that
  /// never got a send, `Error` after an exhausted job, and `Sent` awaiting a
  /// ticket poll that died mid-flight. Operator privilege required.
  pub async fn requeue(
    &self,
    filter: DocumentFilter,
    actor: &Actor,
  ) -> Result<Vec<Uuid>> {
    if !actor.operator {
      return Err(Error::OperatorRequired);
    }

    let statuses = match filter.status {
      Some(s)
        if matches!(
          s,
          DocumentStatus::Signed | DocumentStatus::Error | DocumentStatus::Sent
        ) =>
      {
        vec![s]
      }
      Some(s) => {
        return Err(Error::Core(quipu_core::Error::RetryNotAllowed(s)));
      }
      None => vec![
        DocumentStatus::Signed,
        DocumentStatus::Error,
        DocumentStatus::Sent,
      ],
    };

    let limit = filter.limit.unwrap_or(100);
    let mut created = Vec::new();

    for status in statuses {
      if created.len() >= limit {
        break;
      }
      let documents = self
        .store
        .list_documents(DocumentFilter {
          status: Some(status),
          tenant_id: filter.tenant_id,
          document_id: filter.document_id,
          limit: Some(limit),
        })
        .await
        .map_err(Error::store)?;

      for document in documents {
        if created.len() >= limit {
          break;
        }
        let Some(kind) = requeue_kind(&document) else { continue };

        // Skip documents that already have an active job.
        let active = self
          .store
          .active_job(document.document_id, kind)
          .await
          .map_err(Error::store)?;
        if active.is_some() {
          continue;
        }

        if document.status == DocumentStatus::Error {
          self
            .store
            .set_status(document.document_id, DocumentStatus::Signed)
            .await
            .map_err(Error::store)?;
        }

        let mut job = NewJob::new(document.tenant_id, document.document_id, kind);
        if kind == JobKind::PollTicket {
          job = job.not_before(
            Utc::now()
              + chrono::Duration::from_std(self.config.ticket_poll_delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(90)),
          );
        }
        let outcome = self.store.enqueue(job).await.map_err(Error::store)?;
        if outcome.created() {
          created.push(outcome.job_id());
        }
      }
    }

    self
      .audit
      .append(AuditEvent {
        tenant_id: filter.tenant_id.unwrap_or(Uuid::nil()),
        actor_id:  Some(actor.id),
        action:    "admin.requeue".into(),
        entity_id: filter.document_id.unwrap_or(Uuid::nil()),
        severity:  AuditSeverity::Warning,
        metadata:  json!({ "jobs_created": created.len() }),
      })
      .await;

    Ok(created)
  }

  // ── Void ──────────────────────────────────────────────────────────────────

  /// Mark the document `Canceled`. In-flight jobs are not killed; the worker
  /// discards their outcome when it sees the terminal status.
  pub async fn void(
    &self,
    document_id: Uuid,
    reason: Option<String>,
    actor: &Actor,
  ) -> Result<()> {
    let document = self.require_document(document_id).await?;
    self
      .store
      .set_status(document_id, DocumentStatus::Canceled)
      .await
      .map_err(Error::store)?;

    self
      .audit(
        &document,
        Some(actor),
        "document.voided",
        AuditSeverity::Warning,
        json!({ "reason": reason }),
      )
      .await;
    Ok(())
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// The job a stuck document needs, or `None` when nothing can help it.
fn requeue_kind(document: &FiscalDocument) -> Option<JobKind> {
  match document.status {
    DocumentStatus::Sent => {
      document.remote.ticket().map(|_| JobKind::PollTicket)
    }
    DocumentStatus::Signed | DocumentStatus::Error => {
      if document.artifacts.is_none() {
        None
      } else if document.kind.is_batch() {
        Some(JobKind::SendSummary)
      } else {
        Some(JobKind::SendDocument)
      }
    }
    _ => None,
  }
}

/// The pipe-delimited payload printed as a QR code on the physical receipt.
pub fn qr_payload(document: &FiscalDocument, content_hash: &str) -> String {
  format!(
    "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
    document.issuer_tax_id,
    type_code(document.kind),
    document.number.series,
    document.number.sequence,
    document.tax,
    document.total,
    document.issued_at.format("%Y-%m-%d"),
    document.customer_id.kind.scheme_code(),
    document.customer_id.value,
    content_hash,
  )
}
