//! The background worker: claims due jobs, talks to the authority, and
//! advances the document state machine with the outcome.
//!
//! Any number of worker processes may run against the same store — the
//! job-claim conditional update guarantees each job has at most one
//! executor. Failures are per-job: one bad job never stops the loop.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use quipu_core::{
  document::{FiscalDocument, RemoteState},
  hooks::{AuditEvent, AuditSeverity},
  job::{JobKind, NewJob, SubmissionJob},
  settings::TenantFiscalSettings,
  status::DocumentStatus,
  store::{DocumentStore, JobStore},
};

use crate::{
  backoff::backoff,
  client::{ClientError, Submission, TaxAuthorityClient, TicketStatus},
  service::Pipeline,
};

// ─── Worker ──────────────────────────────────────────────────────────────────

/// One polling consumer over the shared job queue.
pub struct Worker<S, C> {
  pipeline: Pipeline<S, C>,
}

impl<S, C> Worker<S, C>
where
  S: DocumentStore + JobStore,
  C: TaxAuthorityClient,
{
  pub fn new(pipeline: Pipeline<S, C>) -> Self { Self { pipeline } }

  /// Poll forever. Spawn this onto the runtime; abort the task to stop.
  pub async fn run(self) {
    info!(
      interval_ms = self.pipeline.config.poll_interval.as_millis() as u64,
      "submission worker started"
    );
    loop {
      match self.tick().await {
        Ok(0) => {}
        Ok(n) => debug!(jobs = n, "worker tick finished"),
        Err(e) => error!(error = %e, "worker tick failed"),
      }
      tokio::time::sleep(self.pipeline.config.poll_interval).await;
    }
  }

  /// Claim and execute every currently due job, one at a time.
  pub async fn tick(&self) -> crate::Result<usize> {
    let mut executed = 0;
    while let Some(job) = self
      .pipeline
      .store
      .claim_due(Utc::now())
      .await
      .map_err(crate::Error::store)?
    {
      self.execute(job).await;
      executed += 1;
    }
    Ok(executed)
  }

  // ── Job execution ─────────────────────────────────────────────────────────

  async fn execute(&self, job: SubmissionJob) {
    debug!(
      job_id = %job.job_id,
      document_id = %job.document_id,
      kind = job.kind.discriminant(),
      attempt = job.attempts + 1,
      "executing job"
    );

    let document = match self.pipeline.store.get_document(job.document_id).await
    {
      Ok(Some(doc)) => doc,
      Ok(None) => {
        self
          .close_permanent(&job, None, "document record missing", None)
          .await;
        return;
      }
      Err(e) => {
        error!(job_id = %job.job_id, error = %e, "cannot load document");
        return;
      }
    };

    // Last-writer-does-not-override-terminal: a void that landed while this
    // job was queued wins, and the outcome is discarded.
    if document.status == DocumentStatus::Canceled {
      self.discard_for_canceled(&job, &document).await;
      return;
    }

    let settings = match self
      .pipeline
      .settings
      .fiscal_settings(job.tenant_id)
      .await
    {
      Ok(Some(s)) => s,
      Ok(None) => {
        self
          .close_permanent(
            &job,
            Some(&document),
            "fiscal settings missing",
            Some(DocumentStatus::Error),
          )
          .await;
        return;
      }
      Err(e) => {
        // Collaborator outage, not a judgment on the job.
        self.handle_transient(&job, &e.to_string()).await;
        return;
      }
    };

    match job.kind {
      JobKind::SendDocument | JobKind::SendSummary => {
        self.execute_send(&job, &document, &settings).await;
      }
      JobKind::PollTicket => {
        self.execute_poll(&job, &document, &settings).await;
      }
    }
  }

  async fn execute_send(
    &self,
    job: &SubmissionJob,
    document: &FiscalDocument,
    settings: &TenantFiscalSettings,
  ) {
    let Some(artifacts) = &document.artifacts else {
      self
        .close_permanent(
          job,
          Some(document),
          "no signed artifact to submit",
          Some(DocumentStatus::Error),
        )
        .await;
      return;
    };

    let filename = submission_filename(document);
    let outcome = self
      .pipeline
      .client
      .submit(
        settings.environment,
        &settings.credentials,
        &filename,
        artifacts.xml.as_bytes(),
        document.kind.is_batch(),
      )
      .await;

    match outcome {
      Ok(Submission::Accepted { code, message, cdr }) => {
        self.mark_sent_if_signed(document).await;
        let remote = RemoteState::Closed {
          code,
          message,
          received_at: Utc::now(),
          has_cdr: cdr.is_some(),
        };
        self
          .finalize(job, document, remote, cdr, DocumentStatus::Accepted)
          .await;
      }
      Ok(Submission::Rejected { code, message }) => {
        self.mark_sent_if_signed(document).await;
        let remote = RemoteState::Closed {
          code:        code.clone(),
          message:     message.clone(),
          received_at: Utc::now(),
          has_cdr:     false,
        };
        if let Err(e) = self
          .pipeline
          .store
          .record_remote(document.document_id, remote, None)
          .await
        {
          error!(job_id = %job.job_id, error = %e, "cannot record rejection");
        }
        self.advance_unless_canceled(document.document_id, DocumentStatus::Rejected).await;
        self.fail_job_permanent(job, &format!("{code}: {message}")).await;
        self
          .audit(
            job,
            document.tenant_id,
            "document.rejected",
            AuditSeverity::Warning,
            json!({ "code": code, "error_class": "permanent" }),
          )
          .await;
      }
      Ok(Submission::Ticket(ticket)) => {
        self.mark_sent_if_signed(document).await;
        let remote = RemoteState::TicketPending {
          ticket:    ticket.clone(),
          issued_at: Utc::now(),
        };
        if let Err(e) = self
          .pipeline
          .store
          .record_remote(document.document_id, remote, None)
          .await
        {
          error!(job_id = %job.job_id, error = %e, "cannot record ticket");
          return;
        }
        if let Err(e) = self.pipeline.store.complete_job(job.job_id).await {
          error!(job_id = %job.job_id, error = %e, "cannot complete job");
          return;
        }
        // Hand off to the polling flow, honouring the minimum interval.
        let poll = NewJob::new(job.tenant_id, job.document_id, JobKind::PollTicket)
          .not_before(Utc::now() + self.ticket_delay());
        if let Err(e) = self.pipeline.store.enqueue(poll).await {
          error!(job_id = %job.job_id, error = %e, "cannot enqueue ticket poll");
        }
        self
          .audit(
            job,
            document.tenant_id,
            "ticket.issued",
            AuditSeverity::Info,
            json!({ "ticket": mask_ticket(&ticket) }),
          )
          .await;
      }
      Err(ClientError::Transient(e)) => {
        // The remote service was never reached (or never answered); the
        // document keeps its pre-attempt status.
        self.handle_transient(job, &e).await;
      }
      Err(ClientError::Permanent(e)) => {
        self
          .close_permanent(job, Some(document), &e, Some(DocumentStatus::Error))
          .await;
      }
    }
  }

  async fn execute_poll(
    &self,
    job: &SubmissionJob,
    document: &FiscalDocument,
    settings: &TenantFiscalSettings,
  ) {
    let Some(ticket) = document.remote.ticket() else {
      self
        .close_permanent(job, Some(document), "no ticket to poll", None)
        .await;
      return;
    };

    let outcome = self
      .pipeline
      .client
      .query_ticket(settings.environment, &settings.credentials, ticket)
      .await;

    match outcome {
      Ok(TicketStatus::Pending) => {
        // Not a failure: push the job back without burning an attempt.
        let next = Utc::now() + self.ticket_delay();
        if let Err(e) = self.pipeline.store.reschedule(job.job_id, next).await {
          error!(job_id = %job.job_id, error = %e, "cannot reschedule poll");
        }
        debug!(job_id = %job.job_id, "ticket still pending");
      }
      Ok(TicketStatus::Accepted { code, message, cdr }) => {
        let remote = RemoteState::Closed {
          code,
          message,
          received_at: Utc::now(),
          has_cdr: cdr.is_some(),
        };
        self
          .finalize(job, document, remote, cdr, DocumentStatus::Accepted)
          .await;
      }
      Ok(TicketStatus::Observed { code, message, cdr }) => {
        let remote = RemoteState::Closed {
          code,
          message,
          received_at: Utc::now(),
          has_cdr: cdr.is_some(),
        };
        self
          .finalize(job, document, remote, cdr, DocumentStatus::Observed)
          .await;
      }
      Ok(TicketStatus::Rejected { code, message }) => {
        let remote = RemoteState::Closed {
          code:        code.clone(),
          message:     message.clone(),
          received_at: Utc::now(),
          has_cdr:     false,
        };
        if let Err(e) = self
          .pipeline
          .store
          .record_remote(document.document_id, remote, None)
          .await
        {
          error!(job_id = %job.job_id, error = %e, "cannot record rejection");
        }
        self.advance_unless_canceled(document.document_id, DocumentStatus::Rejected).await;
        self.fail_job_permanent(job, &format!("{code}: {message}")).await;
        self
          .audit(
            job,
            document.tenant_id,
            "document.rejected",
            AuditSeverity::Warning,
            json!({ "code": code, "error_class": "permanent" }),
          )
          .await;
      }
      Err(ClientError::Transient(e)) => self.handle_transient(job, &e).await,
      Err(ClientError::Permanent(e)) => {
        self
          .close_permanent(job, Some(document), &e, Some(DocumentStatus::Error))
          .await;
      }
    }
  }

  // ── Outcome plumbing ──────────────────────────────────────────────────────

  /// Record the remote answer, advance the document (unless voided
  /// meanwhile), and close the job.
  async fn finalize(
    &self,
    job: &SubmissionJob,
    document: &FiscalDocument,
    remote: RemoteState,
    cdr: Option<Vec<u8>>,
    to: DocumentStatus,
  ) {
    if let Err(e) = self
      .pipeline
      .store
      .record_remote(document.document_id, remote, cdr)
      .await
    {
      error!(job_id = %job.job_id, error = %e, "cannot record remote outcome");
      return;
    }
    self.advance_unless_canceled(document.document_id, to).await;
    if let Err(e) = self.pipeline.store.complete_job(job.job_id).await {
      error!(job_id = %job.job_id, error = %e, "cannot complete job");
    }
    self
      .audit(
        job,
        document.tenant_id,
        match to {
          DocumentStatus::Observed => "document.observed",
          _ => "document.accepted",
        },
        AuditSeverity::Info,
        json!({ "attempts": job.attempts + 1 }),
      )
      .await;
  }

  /// `Signed -> Sent` at the moment the remote service has demonstrably been
  /// reached. Transient failures before that leave the document `Signed`.
  async fn mark_sent_if_signed(&self, document: &FiscalDocument) {
    if document.status == DocumentStatus::Signed {
      if let Err(e) = self
        .pipeline
        .store
        .set_status(document.document_id, DocumentStatus::Sent)
        .await
      {
        warn!(document_id = %document.document_id, error = %e, "cannot mark sent");
      }
    }
  }

  /// Apply a final status unless a void won the race.
  async fn advance_unless_canceled(&self, document_id: Uuid, to: DocumentStatus) {
    match self.pipeline.store.get_document(document_id).await {
      Ok(Some(current)) if current.status == DocumentStatus::Canceled => {
        info!(%document_id, "outcome discarded: document was voided mid-flight");
      }
      Ok(Some(_)) => {
        if let Err(e) =
          self.pipeline.store.set_status(document_id, to).await
        {
          warn!(%document_id, to = to.discriminant(), error = %e, "cannot advance document");
        }
      }
      Ok(None) => warn!(%document_id, "document vanished before advance"),
      Err(e) => error!(%document_id, error = %e, "cannot re-read document"),
    }
  }

  /// Transient failure bookkeeping: retry with exponential backoff below the
  /// ceiling, fail the job and move the document to `Error` at the ceiling.
  async fn handle_transient(&self, job: &SubmissionJob, cause: &str) {
    let attempt = job.attempts + 1;
    if attempt >= self.pipeline.config.max_attempts {
      warn!(
        job_id = %job.job_id,
        attempts = attempt,
        "retry ceiling reached"
      );
      self.fail_job_permanent(job, cause).await;
      self.advance_unless_canceled(job.document_id, DocumentStatus::Error).await;
      self
        .audit(
          job,
          job.tenant_id,
          "job.exhausted",
          AuditSeverity::Warning,
          json!({ "attempts": attempt, "error_class": "transient" }),
        )
        .await;
      return;
    }

    let delay = backoff(
      self.pipeline.config.backoff_base,
      attempt,
      self.pipeline.config.backoff_cap,
    );
    let next_run_at = Utc::now()
      + ChronoDuration::milliseconds(delay.as_millis() as i64);
    if let Err(e) = self
      .pipeline
      .store
      .fail_transient(job.job_id, cause, next_run_at)
      .await
    {
      error!(job_id = %job.job_id, error = %e, "cannot requeue after transient failure");
      return;
    }
    debug!(
      job_id = %job.job_id,
      attempt,
      retry_in_s = delay.as_secs(),
      "transient failure, retry scheduled"
    );
  }

  /// Permanent failure: close the job, optionally move the document, audit.
  async fn close_permanent(
    &self,
    job: &SubmissionJob,
    document: Option<&FiscalDocument>,
    cause: &str,
    document_to: Option<DocumentStatus>,
  ) {
    self.fail_job_permanent(job, cause).await;
    if let Some(to) = document_to {
      self.advance_unless_canceled(job.document_id, to).await;
    }
    self
      .audit(
        job,
        document.map(|d| d.tenant_id).unwrap_or(job.tenant_id),
        "job.failed",
        AuditSeverity::Warning,
        json!({ "attempts": job.attempts + 1, "error_class": "permanent" }),
      )
      .await;
  }

  async fn fail_job_permanent(&self, job: &SubmissionJob, cause: &str) {
    if let Err(e) =
      self.pipeline.store.fail_permanent(job.job_id, cause).await
    {
      error!(job_id = %job.job_id, error = %e, "cannot fail job");
    }
  }

  async fn discard_for_canceled(
    &self,
    job: &SubmissionJob,
    document: &FiscalDocument,
  ) {
    if let Err(e) = self.pipeline.store.complete_job(job.job_id).await {
      error!(job_id = %job.job_id, error = %e, "cannot close discarded job");
    }
    self
      .audit(
        job,
        document.tenant_id,
        "job.discarded",
        AuditSeverity::Info,
        json!({ "reason": "document canceled" }),
      )
      .await;
  }

  async fn audit(
    &self,
    job: &SubmissionJob,
    tenant_id: Uuid,
    action: &str,
    severity: AuditSeverity,
    mut metadata: serde_json::Value,
  ) {
    if let Some(map) = metadata.as_object_mut() {
      map.insert("job_id".into(), json!(job.job_id));
      map.insert("kind".into(), json!(job.kind.discriminant()));
    }
    self
      .pipeline
      .audit
      .append(AuditEvent {
        tenant_id,
        actor_id: None,
        action: action.to_string(),
        entity_id: job.document_id,
        severity,
        metadata,
      })
      .await;
  }

  fn ticket_delay(&self) -> ChronoDuration {
    ChronoDuration::milliseconds(
      self.pipeline.config.ticket_poll_delay.as_millis() as i64,
    )
  }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// `RUC-TYPE-SERIES-SEQUENCE.xml`, the filename convention the authority
/// keys its duplicate detection on.
fn submission_filename(document: &FiscalDocument) -> String {
  let type_part = match quipu_xml::render::type_code(document.kind) {
    "" => document.kind.discriminant().to_string(),
    code => code.to_string(),
  };
  format!(
    "{}-{}-{}.xml",
    document.issuer_tax_id,
    type_part,
    document.number.full()
  )
}

/// Tickets are remote identifiers; read models and audit trails only ever
/// see the masked form.
pub fn mask_ticket(ticket: &str) -> String {
  if ticket.len() <= 4 {
    "****".to_string()
  } else {
    format!("****{}", &ticket[ticket.len() - 4..])
  }
}
