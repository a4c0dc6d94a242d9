//! Handlers for the operator surface.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/documents` | filtered list; artifacts never inlined |
//! | `GET`  | `/documents/{id}` | read model: status, remote outcome, masked ticket, job history |
//! | `POST` | `/documents/{id}/sign` | body: [`SignBody`] |
//! | `POST` | `/documents/{id}/enqueue` | body: [`EnqueueBody`] |
//! | `POST` | `/documents/{id}/retry` | error/rejected documents only |
//! | `POST` | `/documents/{id}/void` | body: [`VoidBody`] |
//! | `POST` | `/admin/requeue` | operator only; body: [`RequeueBody`] |

use axum::{
  Json,
  extract::{Path, Query, State},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use quipu_core::{
  document::{FiscalDocument, RemoteState},
  job::{JobKind, SubmissionJob},
  status::DocumentStatus,
  store::{DocumentFilter, DocumentStore, JobStore},
};
use quipu_pipeline::{client::TaxAuthorityClient, worker::mask_ticket};

use crate::{AppState, auth::Authenticated, error::ApiError};

/// Most recent jobs shown in the detail read model.
const JOB_HISTORY_LIMIT: usize = 20;

// ─── Read models ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct DocumentSummary {
  pub document_id: Uuid,
  pub kind:        String,
  pub number:      String,
  pub status:      String,
  pub total:       String,
  pub currency:    String,
  pub issued_at:   DateTime<Utc>,
}

impl From<&FiscalDocument> for DocumentSummary {
  fn from(doc: &FiscalDocument) -> Self {
    Self {
      document_id: doc.document_id,
      kind:        doc.kind.discriminant().to_string(),
      number:      doc.number.full(),
      status:      doc.status.discriminant().to_string(),
      total:       doc.total.to_decimal(),
      currency:    doc.currency.clone(),
      issued_at:   doc.issued_at,
    }
  }
}

#[derive(Debug, Serialize)]
pub struct JobSummary {
  pub job_id:       Uuid,
  pub kind:         String,
  pub status:       String,
  pub attempts:     u32,
  pub last_error:   Option<String>,
  pub next_run_at:  DateTime<Utc>,
  pub created_at:   DateTime<Utc>,
  pub completed_at: Option<DateTime<Utc>>,
}

impl From<SubmissionJob> for JobSummary {
  fn from(job: SubmissionJob) -> Self {
    Self {
      job_id:       job.job_id,
      kind:         job.kind.discriminant().to_string(),
      status:       job.status.discriminant().to_string(),
      attempts:     job.attempts,
      last_error:   job.last_error,
      next_run_at:  job.next_run_at,
      created_at:   job.created_at,
      completed_at: job.completed_at,
    }
  }
}

/// Detail read model. Raw artifacts and the receipt archive are exposed as
/// presence flags only; the ticket is masked.
#[derive(Debug, Serialize)]
pub struct DocumentDetail {
  #[serde(flatten)]
  pub summary:        DocumentSummary,
  pub customer_name:  String,
  pub remote_code:    Option<String>,
  pub remote_message: Option<String>,
  pub ticket:         Option<String>,
  pub has_signed_xml: bool,
  pub has_cdr:        bool,
  pub content_hash:   Option<String>,
  pub job_history:    Vec<JobSummary>,
}

// ─── List ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub status:    Option<DocumentStatus>,
  pub tenant_id: Option<Uuid>,
  pub limit:     Option<usize>,
}

/// `GET /documents?status=...&tenant_id=...&limit=...`
pub async fn list<S, C>(
  State(state): State<AppState<S, C>>,
  _auth: Authenticated,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<DocumentSummary>>, ApiError>
where
  S: DocumentStore + JobStore + 'static,
  C: TaxAuthorityClient + 'static,
{
  let documents = state
    .pipeline
    .store()
    .list_documents(DocumentFilter {
      status:      params.status,
      tenant_id:   params.tenant_id,
      document_id: None,
      limit:       params.limit,
    })
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  Ok(Json(documents.iter().map(DocumentSummary::from).collect()))
}

// ─── Detail ──────────────────────────────────────────────────────────────────

/// `GET /documents/{id}`
pub async fn detail<S, C>(
  State(state): State<AppState<S, C>>,
  _auth: Authenticated,
  Path(id): Path<Uuid>,
) -> Result<Json<DocumentDetail>, ApiError>
where
  S: DocumentStore + JobStore + 'static,
  C: TaxAuthorityClient + 'static,
{
  let store = state.pipeline.store();
  let document = store
    .get_document(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?
    .ok_or(ApiError::NotFound)?;

  let has_cdr = store
    .has_cdr(id)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;
  let history = store
    .job_history(id, JOB_HISTORY_LIMIT)
    .await
    .map_err(|e| ApiError::Store(Box::new(e)))?;

  let (remote_code, remote_message, ticket) = match &document.remote {
    RemoteState::Idle => (None, None, None),
    RemoteState::TicketPending { ticket, .. } => {
      (None, None, Some(mask_ticket(ticket)))
    }
    RemoteState::Closed { code, message, .. } => {
      (Some(code.clone()), Some(message.clone()), None)
    }
  };

  Ok(Json(DocumentDetail {
    summary: DocumentSummary::from(&document),
    customer_name: document.customer_name.clone(),
    remote_code,
    remote_message,
    ticket,
    has_signed_xml: document.artifacts.is_some(),
    has_cdr,
    content_hash: document.artifacts.as_ref().map(|a| a.content_hash.clone()),
    job_history: history.into_iter().map(JobSummary::from).collect(),
  }))
}

// ─── Sign ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct SignBody {
  /// Re-sign a document that already carries an artifact. Operator only;
  /// audited as a high-severity event.
  #[serde(default, rename = "override")]
  pub override_resign: bool,
}

#[derive(Debug, Serialize)]
pub struct SignResponse {
  pub status:       String,
  pub content_hash: String,
}

/// `POST /documents/{id}/sign`
pub async fn sign<S, C>(
  State(state): State<AppState<S, C>>,
  Authenticated(actor): Authenticated,
  Path(id): Path<Uuid>,
  Json(body): Json<SignBody>,
) -> Result<Json<SignResponse>, ApiError>
where
  S: DocumentStore + JobStore + 'static,
  C: TaxAuthorityClient + 'static,
{
  let outcome = state
    .pipeline
    .sign(id, &actor, body.override_resign)
    .await?;
  Ok(Json(SignResponse {
    status:       outcome.status.discriminant().to_string(),
    content_hash: outcome.content_hash,
  }))
}

// ─── Enqueue ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
  pub kind: JobKind,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
  pub job_id:  Uuid,
  /// `false` when an active job for the same (document, kind) already
  /// existed and its id was returned instead.
  pub created: bool,
}

/// `POST /documents/{id}/enqueue`
pub async fn enqueue<S, C>(
  State(state): State<AppState<S, C>>,
  Authenticated(actor): Authenticated,
  Path(id): Path<Uuid>,
  Json(body): Json<EnqueueBody>,
) -> Result<Json<EnqueueResponse>, ApiError>
where
  S: DocumentStore + JobStore + 'static,
  C: TaxAuthorityClient + 'static,
{
  let outcome = state.pipeline.enqueue(id, body.kind, Some(&actor)).await?;
  Ok(Json(EnqueueResponse {
    job_id:  outcome.job_id(),
    created: outcome.created(),
  }))
}

// ─── Retry ───────────────────────────────────────────────────────────────────

/// `POST /documents/{id}/retry`
pub async fn retry<S, C>(
  State(state): State<AppState<S, C>>,
  Authenticated(actor): Authenticated,
  Path(id): Path<Uuid>,
) -> Result<Json<EnqueueResponse>, ApiError>
where
  S: DocumentStore + JobStore + 'static,
  C: TaxAuthorityClient + 'static,
{
  let outcome = state.pipeline.retry(id, &actor).await?;
  Ok(Json(EnqueueResponse {
    job_id:  outcome.job_id(),
    created: outcome.created(),
  }))
}

// ─── Void ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct VoidBody {
  pub reason: Option<String>,
}

/// `POST /documents/{id}/void`
pub async fn void_document<S, C>(
  State(state): State<AppState<S, C>>,
  Authenticated(actor): Authenticated,
  Path(id): Path<Uuid>,
  Json(body): Json<VoidBody>,
) -> Result<impl IntoResponse, ApiError>
where
  S: DocumentStore + JobStore + 'static,
  C: TaxAuthorityClient + 'static,
{
  state.pipeline.void(id, body.reason, &actor).await?;
  Ok(StatusCode::NO_CONTENT)
}

// ─── Requeue ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
pub struct RequeueBody {
  pub status:      Option<DocumentStatus>,
  pub tenant_id:   Option<Uuid>,
  pub document_id: Option<Uuid>,
  pub limit:       Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RequeueResponse {
  pub jobs_created: Vec<Uuid>,
}

/// `POST /admin/requeue` — operator only.
pub async fn requeue<S, C>(
  State(state): State<AppState<S, C>>,
  Authenticated(actor): Authenticated,
  Json(body): Json<RequeueBody>,
) -> Result<Json<RequeueResponse>, ApiError>
where
  S: DocumentStore + JobStore + 'static,
  C: TaxAuthorityClient + 'static,
{
  let jobs_created = state
    .pipeline
    .requeue(
      DocumentFilter {
        status:      body.status,
        tenant_id:   body.tenant_id,
        document_id: body.document_id,
        limit:       body.limit,
      },
      &actor,
    )
    .await?;
  Ok(Json(RequeueResponse { jobs_created }))
}
