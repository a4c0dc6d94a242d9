//! The `DocumentStore` and `JobStore` traits and supporting query types.
//!
//! Implemented by storage backends (e.g. `quipu-store-sqlite`). The pipeline
//! and HTTP layers depend on these abstractions, not on any concrete backend.
//! All status mutation flows through the store methods below; no component
//! writes status fields by any other path.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
  document::{FiscalDocument, RemoteState, SignedArtifacts},
  job::{EnqueueOutcome, JobKind, NewJob, SubmissionJob},
  status::DocumentStatus,
};

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`DocumentStore::list_documents`] and the admin requeue.
#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
  pub status:      Option<DocumentStatus>,
  pub tenant_id:   Option<Uuid>,
  pub document_id: Option<Uuid>,
  pub limit:       Option<usize>,
}

// ─── DocumentStore ───────────────────────────────────────────────────────────

/// Abstraction over fiscal-document persistence.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait DocumentStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist a new document. Fails if the (tenant, series, sequence) triple
  /// is already taken.
  fn insert_document(
    &self,
    document: FiscalDocument,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Retrieve a document by id. Returns `None` if not found.
  fn get_document(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<FiscalDocument>, Self::Error>> + Send + '_;

  fn list_documents(
    &self,
    filter: DocumentFilter,
  ) -> impl Future<Output = Result<Vec<FiscalDocument>, Self::Error>> + Send + '_;

  /// Atomically store the signed artifacts and move the document to
  /// `Signed`. All-or-nothing: a document that already carries artifacts is
  /// refused unless `allow_resign` is set (the audited privileged path).
  fn set_signed(
    &self,
    id: Uuid,
    artifacts: SignedArtifacts,
    allow_resign: bool,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Guarded status transition per
  /// [`DocumentStatus::can_transition`](crate::status::DocumentStatus).
  fn set_status(
    &self,
    id: Uuid,
    to: DocumentStatus,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Record the remote-protocol state, and the opaque receipt archive when
  /// the authority returned one. The archive is stored as-is, never parsed.
  fn record_remote(
    &self,
    id: Uuid,
    remote: RemoteState,
    cdr: Option<Vec<u8>>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Whether a receipt archive exists for the document (presence only; the
  /// bytes are not inlined in read models).
  fn has_cdr(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

// ─── JobStore ────────────────────────────────────────────────────────────────

/// Abstraction over the durable submission-job queue.
pub trait JobStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Idempotent enqueue: if an active (queued/processing) job for the same
  /// (document, kind) exists, no new job is created and the existing id is
  /// returned.
  fn enqueue(
    &self,
    input: NewJob,
  ) -> impl Future<Output = Result<EnqueueOutcome, Self::Error>> + Send + '_;

  /// Claim one due queued job by atomically transitioning it to
  /// `Processing`. The conditional update is the cross-process mutex: at
  /// most one claimant wins a given job. Returns `None` when nothing is due.
  fn claim_due(
    &self,
    now: DateTime<Utc>,
  ) -> impl Future<Output = Result<Option<SubmissionJob>, Self::Error>> + Send + '_;

  /// Close a processing job as `Done`.
  fn complete_job(
    &self,
    job_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Record a transient failure: attempts+1, remember the error, return the
  /// job to `Queued` with the given next eligible run.
  fn fail_transient(
    &self,
    job_id: Uuid,
    error: &str,
    next_run_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Return a processing job to `Queued` for a later run without counting
  /// an attempt — used when a ticket poll comes back still pending.
  fn reschedule(
    &self,
    job_id: Uuid,
    next_run_at: DateTime<Utc>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Record a final failure: attempts+1, `Failed`, never retried.
  fn fail_permanent(
    &self,
    job_id: Uuid,
    error: &str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// The active (queued/processing) job for a (document, kind), if any.
  fn active_job(
    &self,
    document_id: Uuid,
    kind: JobKind,
  ) -> impl Future<Output = Result<Option<SubmissionJob>, Self::Error>> + Send + '_;

  /// Most recent jobs for a document, newest first, bounded by `limit`.
  fn job_history(
    &self,
    document_id: Uuid,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<SubmissionJob>, Self::Error>> + Send + '_;
}
