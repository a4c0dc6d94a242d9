//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, Utc};
use quipu_core::{
  document::{
    DocumentKind, DocumentNumber, FiscalDocument, Money, RemoteState,
    SignedArtifacts,
  },
  job::{JobKind, NewJob},
  payload::{PartyId, PartyIdKind},
  status::DocumentStatus,
  store::{DocumentFilter, DocumentStore, JobStore},
};
use uuid::Uuid;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory().await.expect("in-memory store")
}

fn draft(tenant: Uuid, sequence: u32) -> FiscalDocument {
  FiscalDocument {
    document_id:   Uuid::new_v4(),
    tenant_id:     tenant,
    kind:          DocumentKind::Invoice,
    number:        DocumentNumber::new("F001", sequence),
    issuer_tax_id: "20100070970".into(),
    issuer_name:   "Comercial Andina S.A.C.".into(),
    customer_id:   PartyId::new(PartyIdKind::Ruc, "20506397815"),
    customer_name: "Cliente Corporativo S.A.".into(),
    currency:      "PEN".into(),
    taxable:       Money(2000),
    tax:           Money(360),
    total:         Money(2360),
    issued_at:     Utc::now(),
    created_at:    Utc::now(),
    reference:     None,
    status:        DocumentStatus::Draft,
    artifacts:     None,
    remote:        RemoteState::Idle,
  }
}

fn artifacts() -> SignedArtifacts {
  SignedArtifacts {
    xml:          "<Invoice>signed</Invoice>".into(),
    digest_b64:   "ZGlnZXN0".into(),
    content_hash: "abc123".into(),
    qr_payload:   "20100070970|01|F001|1|3.60|23.60".into(),
  }
}

// ─── Documents ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_get_document() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();

  let fetched = s.get_document(doc.document_id).await.unwrap().unwrap();
  assert_eq!(fetched.document_id, doc.document_id);
  assert_eq!(fetched.number.full(), "F001-1");
  assert_eq!(fetched.total, Money(2360));
  assert_eq!(fetched.status, DocumentStatus::Draft);
  assert!(fetched.artifacts.is_none());
  assert_eq!(fetched.remote, RemoteState::Idle);
}

#[tokio::test]
async fn get_document_missing_returns_none() {
  let s = store().await;
  assert!(s.get_document(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_number_is_rejected() {
  let s = store().await;
  let tenant = Uuid::new_v4();
  s.insert_document(draft(tenant, 7)).await.unwrap();

  let err = s.insert_document(draft(tenant, 7)).await.unwrap_err();
  assert!(matches!(err, crate::Error::DuplicateNumber { sequence: 7, .. }));
}

#[tokio::test]
async fn same_number_different_tenant_is_fine() {
  let s = store().await;
  s.insert_document(draft(Uuid::new_v4(), 7)).await.unwrap();
  s.insert_document(draft(Uuid::new_v4(), 7)).await.unwrap();
}

#[tokio::test]
async fn list_documents_by_status() {
  let s = store().await;
  let tenant = Uuid::new_v4();
  let a = draft(tenant, 1);
  let b = draft(tenant, 2);
  s.insert_document(a.clone()).await.unwrap();
  s.insert_document(b.clone()).await.unwrap();
  s.set_signed(a.document_id, artifacts(), false).await.unwrap();

  let signed = s
    .list_documents(DocumentFilter {
      status: Some(DocumentStatus::Signed),
      ..Default::default()
    })
    .await
    .unwrap();
  assert_eq!(signed.len(), 1);
  assert_eq!(signed[0].document_id, a.document_id);
}

// ─── Signing ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn set_signed_stores_artifacts_and_advances_status() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();

  s.set_signed(doc.document_id, artifacts(), false).await.unwrap();

  let fetched = s.get_document(doc.document_id).await.unwrap().unwrap();
  assert_eq!(fetched.status, DocumentStatus::Signed);
  let a = fetched.artifacts.as_ref().unwrap();
  assert_eq!(a.content_hash, "abc123");
  assert!(fetched.invariants_hold());
}

#[tokio::test]
async fn set_signed_twice_is_refused() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();
  s.set_signed(doc.document_id, artifacts(), false).await.unwrap();

  let err = s
    .set_signed(doc.document_id, artifacts(), false)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::AlreadySigned(_)));
}

#[tokio::test]
async fn set_signed_with_resign_override_is_allowed() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();
  s.set_signed(doc.document_id, artifacts(), false).await.unwrap();

  let mut second = artifacts();
  second.content_hash = "def456".into();
  s.set_signed(doc.document_id, second, true).await.unwrap();

  let fetched = s.get_document(doc.document_id).await.unwrap().unwrap();
  assert_eq!(fetched.artifacts.unwrap().content_hash, "def456");
}

// ─── Status transitions ──────────────────────────────────────────────────────

#[tokio::test]
async fn illegal_transition_is_rejected() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();

  // Draft -> Sent skips signing.
  let err = s
    .set_status(doc.document_id, DocumentStatus::Sent)
    .await
    .unwrap_err();
  assert!(matches!(
    err,
    crate::Error::Core(quipu_core::Error::IllegalTransition { .. })
  ));
}

#[tokio::test]
async fn legal_transition_chain() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();
  s.set_signed(doc.document_id, artifacts(), false).await.unwrap();
  s.set_status(doc.document_id, DocumentStatus::Sent).await.unwrap();
  s.set_status(doc.document_id, DocumentStatus::Accepted).await.unwrap();

  let fetched = s.get_document(doc.document_id).await.unwrap().unwrap();
  assert_eq!(fetched.status, DocumentStatus::Accepted);
}

// ─── Remote state & CDR ──────────────────────────────────────────────────────

#[tokio::test]
async fn record_remote_round_trips_and_stores_cdr() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();

  assert!(!s.has_cdr(doc.document_id).await.unwrap());

  let closed = RemoteState::Closed {
    code:        "0".into(),
    message:     "accepted".into(),
    received_at: Utc::now(),
    has_cdr:     true,
  };
  s.record_remote(doc.document_id, closed.clone(), Some(vec![0x50, 0x4b]))
    .await
    .unwrap();

  let fetched = s.get_document(doc.document_id).await.unwrap().unwrap();
  assert_eq!(fetched.remote, closed);
  assert!(s.has_cdr(doc.document_id).await.unwrap());
}

// ─── Job queue ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn enqueue_is_idempotent_per_document_and_kind() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();

  let first = s
    .enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::SendDocument))
    .await
    .unwrap();
  assert!(first.created());

  let second = s
    .enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::SendDocument))
    .await
    .unwrap();
  assert!(!second.created());
  assert_eq!(first.job_id(), second.job_id());

  // A different kind gets its own job.
  let poll = s
    .enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::PollTicket))
    .await
    .unwrap();
  assert!(poll.created());
}

#[tokio::test]
async fn claim_due_is_exclusive() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();
  s.enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::SendDocument))
    .await
    .unwrap();

  let claimed = s.claim_due(Utc::now()).await.unwrap();
  assert!(claimed.is_some());

  // The same job cannot be claimed twice.
  let second = s.claim_due(Utc::now()).await.unwrap();
  assert!(second.is_none());
}

#[tokio::test]
async fn claim_respects_next_run_at() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();
  let future = Utc::now() + Duration::minutes(10);
  s.enqueue(
    NewJob::new(doc.tenant_id, doc.document_id, JobKind::PollTicket)
      .not_before(future),
  )
  .await
  .unwrap();

  assert!(s.claim_due(Utc::now()).await.unwrap().is_none());
  assert!(
    s.claim_due(future + Duration::seconds(1)).await.unwrap().is_some()
  );
}

#[tokio::test]
async fn transient_failure_requeues_with_incremented_attempts() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();
  s.enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::SendDocument))
    .await
    .unwrap();

  let job = s.claim_due(Utc::now()).await.unwrap().unwrap();
  assert_eq!(job.attempts, 0);

  let next = Utc::now() + Duration::seconds(30);
  s.fail_transient(job.job_id, "connection refused", next).await.unwrap();

  let requeued = s.claim_due(next + Duration::seconds(1)).await.unwrap().unwrap();
  assert_eq!(requeued.job_id, job.job_id);
  assert_eq!(requeued.attempts, 1);
  assert_eq!(requeued.last_error.as_deref(), Some("connection refused"));
  assert!(requeued.next_run_at > job.next_run_at);
}

#[tokio::test]
async fn complete_closes_the_job_and_frees_the_slot() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();
  s.enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::SendDocument))
    .await
    .unwrap();

  let job = s.claim_due(Utc::now()).await.unwrap().unwrap();
  s.complete_job(job.job_id).await.unwrap();

  assert!(
    s.active_job(doc.document_id, JobKind::SendDocument)
      .await
      .unwrap()
      .is_none()
  );

  // The slot is free again for a fresh job.
  let again = s
    .enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::SendDocument))
    .await
    .unwrap();
  assert!(again.created());
  assert_ne!(again.job_id(), job.job_id);
}

#[tokio::test]
async fn reschedule_does_not_count_an_attempt() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();
  s.enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::PollTicket))
    .await
    .unwrap();

  let job = s.claim_due(Utc::now()).await.unwrap().unwrap();
  let later = Utc::now() + Duration::minutes(2);
  s.reschedule(job.job_id, later).await.unwrap();

  let again = s.claim_due(later + Duration::seconds(1)).await.unwrap().unwrap();
  assert_eq!(again.job_id, job.job_id);
  assert_eq!(again.attempts, 0);
}

#[tokio::test]
async fn permanent_failure_is_terminal() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();
  s.enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::SendDocument))
    .await
    .unwrap();

  let job = s.claim_due(Utc::now()).await.unwrap().unwrap();
  s.fail_permanent(job.job_id, "code 2335: content rejected").await.unwrap();

  assert!(s.claim_due(Utc::now()).await.unwrap().is_none());
  let history = s.job_history(doc.document_id, 10).await.unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].status, quipu_core::job::JobStatus::Failed);
  assert_eq!(history[0].attempts, 1);
  assert!(history[0].completed_at.is_some());
}

#[tokio::test]
async fn job_history_is_bounded_and_newest_first() {
  let s = store().await;
  let doc = draft(Uuid::new_v4(), 1);
  s.insert_document(doc.clone()).await.unwrap();

  for _ in 0..3 {
    s.enqueue(NewJob::new(doc.tenant_id, doc.document_id, JobKind::SendDocument))
      .await
      .unwrap();
    let job = s.claim_due(Utc::now()).await.unwrap().unwrap();
    s.complete_job(job.job_id).await.unwrap();
  }

  let history = s.job_history(doc.document_id, 2).await.unwrap();
  assert_eq!(history.len(), 2);

  let full = s.job_history(doc.document_id, 10).await.unwrap();
  assert_eq!(full.len(), 3);
}
