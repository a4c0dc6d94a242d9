//! Submission jobs — the durable work items executed by the worker.
//!
//! A job is the only carrier of retry state. Documents never track attempts;
//! jobs never track fiscal content. The claim (`Queued -> Processing`) is an
//! atomic conditional update in the store and acts as the cross-process
//! mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Kind & status ───────────────────────────────────────────────────────────

/// What a job does when the worker executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
  /// Submit a single signed document synchronously.
  SendDocument,
  /// Submit a batch document (summary/voided-set); yields a ticket.
  SendSummary,
  /// Poll a previously issued ticket for the final outcome.
  PollTicket,
}

impl JobKind {
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::SendDocument => "send_document",
      Self::SendSummary => "send_summary",
      Self::PollTicket => "poll_ticket",
    }
  }
}

/// Execution state of a job.
///
/// `Done` and `Failed` are terminal; a failed job never reopens — recovery
/// goes through `requeue`, which creates a fresh job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Queued,
  Processing,
  Done,
  Failed,
}

impl JobStatus {
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Queued => "queued",
      Self::Processing => "processing",
      Self::Done => "done",
      Self::Failed => "failed",
    }
  }

  /// Active jobs block a second enqueue for the same (document, kind).
  pub fn is_active(self) -> bool {
    matches!(self, Self::Queued | Self::Processing)
  }
}

// ─── SubmissionJob ───────────────────────────────────────────────────────────

/// One unit of asynchronous work against the remote authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionJob {
  pub job_id:       Uuid,
  pub tenant_id:    Uuid,
  pub document_id:  Uuid,
  pub kind:         JobKind,
  pub status:       JobStatus,
  /// Incremented only when the worker actually executes, never on enqueue.
  pub attempts:     u32,
  pub last_error:   Option<String>,
  /// Earliest instant the worker may claim this job. Strictly increases on
  /// every transient failure.
  pub next_run_at:  DateTime<Utc>,
  pub created_at:   DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

// ─── NewJob ──────────────────────────────────────────────────────────────────

/// Input to [`crate::store::JobStore::enqueue`].
/// `created_at` is always set by the store; it is not accepted from callers.
#[derive(Debug, Clone)]
pub struct NewJob {
  pub tenant_id:   Uuid,
  pub document_id: Uuid,
  pub kind:        JobKind,
  /// Earliest eligible run; `None` means immediately.
  pub not_before:  Option<DateTime<Utc>>,
}

impl NewJob {
  pub fn new(tenant_id: Uuid, document_id: Uuid, kind: JobKind) -> Self {
    Self { tenant_id, document_id, kind, not_before: None }
  }

  pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
    self.not_before = Some(at);
    self
  }
}

// ─── Enqueue outcome ─────────────────────────────────────────────────────────

/// Result of an idempotent enqueue: either a fresh job, or the id of the
/// already-active job for the same (document, kind).
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
  Created(SubmissionJob),
  AlreadyActive(Uuid),
}

impl EnqueueOutcome {
  pub fn job_id(&self) -> Uuid {
    match self {
      Self::Created(job) => job.job_id,
      Self::AlreadyActive(id) => *id,
    }
  }

  pub fn created(&self) -> bool { matches!(self, Self::Created(_)) }
}
