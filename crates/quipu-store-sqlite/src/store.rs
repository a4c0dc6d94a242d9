//! [`SqliteStore`] — the SQLite implementation of [`DocumentStore`] and
//! [`JobStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use quipu_core::{
  document::{FiscalDocument, RemoteState, SignedArtifacts},
  job::{EnqueueOutcome, JobKind, NewJob, SubmissionJob},
  status::DocumentStatus,
  store::{DocumentFilter, DocumentStore, JobStore},
};

use crate::{
  Error, Result,
  encode::{
    RawDocument, RawJob, encode_artifacts, encode_dt, encode_party_kind,
    encode_remote, encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Quipu store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Current status + artifact presence for a document.
  async fn document_state(
    &self,
    id: Uuid,
  ) -> Result<(DocumentStatus, bool)> {
    let id_str = encode_uuid(id);
    let row: Option<(String, bool)> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT status, artifacts IS NOT NULL FROM documents
               WHERE document_id = ?1",
              rusqlite::params![id_str],
              |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?,
        )
      })
      .await?;

    let (status_str, has_artifacts) =
      row.ok_or(Error::DocumentNotFound(id))?;
    Ok((crate::encode::decode_status(&status_str)?, has_artifacts))
  }
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for SqliteStore {
  type Error = Error;

  async fn insert_document(&self, document: FiscalDocument) -> Result<()> {
    let series = document.number.series.clone();
    let sequence = document.number.sequence;

    let doc_id = encode_uuid(document.document_id);
    let tenant = encode_uuid(document.tenant_id);
    let kind = document.kind.discriminant().to_owned();
    let customer_kind = encode_party_kind(document.customer_id.kind).to_owned();
    let issued_at = encode_dt(document.issued_at);
    let created_at = encode_dt(document.created_at);
    let reference = document.reference.map(encode_uuid);
    let status = document.status.discriminant().to_owned();
    let artifacts = document
      .artifacts
      .as_ref()
      .map(encode_artifacts)
      .transpose()?;
    let remote = encode_remote(&document.remote)?;

    let insert_series = series.clone();
    let result = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "INSERT INTO documents (
             document_id, tenant_id, kind, series, sequence,
             issuer_tax_id, issuer_name, customer_kind, customer_value,
             customer_name, currency, taxable_cents, tax_cents, total_cents,
             issued_at, created_at, reference_id, status, artifacts, remote
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                     ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
          rusqlite::params![
            doc_id,
            tenant,
            kind,
            insert_series,
            sequence,
            document.issuer_tax_id,
            document.issuer_name,
            customer_kind,
            document.customer_id.value,
            document.customer_name,
            document.currency,
            document.taxable.0,
            document.tax.0,
            document.total.0,
            issued_at,
            created_at,
            reference,
            status,
            artifacts,
            remote,
          ],
        ))
      })
      .await?;

    match result {
      Ok(_) => Ok(()),
      Err(rusqlite::Error::SqliteFailure(e, _))
        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
      {
        Err(Error::DuplicateNumber { series, sequence })
      }
      Err(e) => Err(tokio_rusqlite::Error::Rusqlite(e).into()),
    }
  }

  async fn get_document(&self, id: Uuid) -> Result<Option<FiscalDocument>> {
    let id_str = encode_uuid(id);
    let raw: Option<RawDocument> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM documents WHERE document_id = ?1",
                RawDocument::COLUMNS
              ),
              rusqlite::params![id_str],
              RawDocument::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawDocument::into_document).transpose()
  }

  async fn list_documents(
    &self,
    filter: DocumentFilter,
  ) -> Result<Vec<FiscalDocument>> {
    let status_str = filter.status.map(|s| s.discriminant().to_owned());
    let tenant_str = filter.tenant_id.map(encode_uuid);
    let doc_str = filter.document_id.map(encode_uuid);
    let limit = filter.limit.unwrap_or(100) as i64;

    let raws: Vec<RawDocument> = self
      .conn
      .call(move |conn| {
        // Build WHERE clause dynamically.
        let mut conds: Vec<&'static str> = vec![];
        if status_str.is_some() {
          conds.push("status = ?1");
        }
        if tenant_str.is_some() {
          conds.push("tenant_id = ?2");
        }
        if doc_str.is_some() {
          conds.push("document_id = ?3");
        }

        let where_clause = if conds.is_empty() {
          String::new()
        } else {
          format!("WHERE {}", conds.join(" AND "))
        };

        let sql = format!(
          "SELECT {} FROM documents {where_clause}
           ORDER BY created_at LIMIT ?4",
          RawDocument::COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![
              status_str.as_deref(),
              tenant_str.as_deref(),
              doc_str.as_deref(),
              limit,
            ],
            RawDocument::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDocument::into_document).collect()
  }

  async fn set_signed(
    &self,
    id: Uuid,
    artifacts: SignedArtifacts,
    allow_resign: bool,
  ) -> Result<()> {
    let (status, has_artifacts) = self.document_state(id).await?;

    if has_artifacts && !allow_resign {
      return Err(Error::AlreadySigned(id));
    }
    if !allow_resign {
      status.transition(DocumentStatus::Signed).map_err(Error::Core)?;
    }

    let id_str = encode_uuid(id);
    let artifacts_json = encode_artifacts(&artifacts)?;
    let expected = status.discriminant().to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE documents SET artifacts = ?2, status = 'signed'
           WHERE document_id = ?1 AND status = ?3",
          rusqlite::params![id_str, artifacts_json, expected],
        )?)
      })
      .await?;

    if changed == 0 {
      // Lost a race with a concurrent writer; surface as not-found so the
      // caller re-reads and re-evaluates.
      return Err(Error::DocumentNotFound(id));
    }
    Ok(())
  }

  async fn set_status(&self, id: Uuid, to: DocumentStatus) -> Result<()> {
    let (status, _) = self.document_state(id).await?;
    status.transition(to).map_err(Error::Core)?;

    let id_str = encode_uuid(id);
    let to_str = to.discriminant().to_owned();
    let expected = status.discriminant().to_owned();

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE documents SET status = ?2
           WHERE document_id = ?1 AND status = ?3",
          rusqlite::params![id_str, to_str, expected],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::DocumentNotFound(id));
    }
    Ok(())
  }

  async fn record_remote(
    &self,
    id: Uuid,
    remote: RemoteState,
    cdr: Option<Vec<u8>>,
  ) -> Result<()> {
    let id_str = encode_uuid(id);
    let remote_json = encode_remote(&remote)?;

    let changed = self
      .conn
      .call(move |conn| {
        let n = if let Some(bytes) = cdr {
          conn.execute(
            "UPDATE documents SET remote = ?2, cdr = ?3 WHERE document_id = ?1",
            rusqlite::params![id_str, remote_json, bytes],
          )?
        } else {
          conn.execute(
            "UPDATE documents SET remote = ?2 WHERE document_id = ?1",
            rusqlite::params![id_str, remote_json],
          )?
        };
        Ok(n)
      })
      .await?;

    if changed == 0 {
      return Err(Error::DocumentNotFound(id));
    }
    Ok(())
  }

  async fn has_cdr(&self, id: Uuid) -> Result<bool> {
    let id_str = encode_uuid(id);
    let present: Option<bool> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT cdr IS NOT NULL FROM documents WHERE document_id = ?1",
              rusqlite::params![id_str],
              |r| r.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    present.ok_or(Error::DocumentNotFound(id))
  }
}

// ─── JobStore impl ───────────────────────────────────────────────────────────

impl JobStore for SqliteStore {
  type Error = Error;

  async fn enqueue(&self, input: NewJob) -> Result<EnqueueOutcome> {
    let now = Utc::now();
    let job = SubmissionJob {
      job_id:       Uuid::new_v4(),
      tenant_id:    input.tenant_id,
      document_id:  input.document_id,
      kind:         input.kind,
      status:       quipu_core::job::JobStatus::Queued,
      attempts:     0,
      last_error:   None,
      next_run_at:  input.not_before.unwrap_or(now),
      created_at:   now,
      completed_at: None,
    };

    let job_id = encode_uuid(job.job_id);
    let tenant = encode_uuid(job.tenant_id);
    let doc_id = encode_uuid(job.document_id);
    let kind = job.kind.discriminant().to_owned();
    let next_run = encode_dt(job.next_run_at);
    let created = encode_dt(job.created_at);

    let existing: Option<String> = self
      .conn
      .call(move |conn| {
        // A pre-check keeps the common double-enqueue quiet; the partial
        // unique index still catches the cross-process race below.
        let active: Option<String> = conn
          .query_row(
            "SELECT job_id FROM jobs
             WHERE document_id = ?1 AND kind = ?2
               AND status IN ('queued', 'processing')",
            rusqlite::params![doc_id, kind],
            |r| r.get(0),
          )
          .optional()?;
        if let Some(id) = active {
          return Ok(Some(id));
        }

        let inserted = conn.execute(
          "INSERT INTO jobs (
             job_id, tenant_id, document_id, kind, status,
             attempts, next_run_at, created_at
           ) VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5, ?6)",
          rusqlite::params![job_id, tenant, doc_id, kind, next_run, created],
        );
        match inserted {
          Ok(_) => Ok(None),
          Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
          {
            let id: String = conn.query_row(
              "SELECT job_id FROM jobs
               WHERE document_id = ?1 AND kind = ?2
                 AND status IN ('queued', 'processing')",
              rusqlite::params![doc_id, kind],
              |r| r.get(0),
            )?;
            Ok(Some(id))
          }
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    match existing {
      Some(id) => Ok(EnqueueOutcome::AlreadyActive(crate::encode::decode_uuid(&id)?)),
      None => Ok(EnqueueOutcome::Created(job)),
    }
  }

  async fn claim_due(
    &self,
    now: DateTime<Utc>,
  ) -> Result<Option<SubmissionJob>> {
    let now_str = encode_dt(now);

    // The conditional update is the cross-process mutex: the claim succeeds
    // only if the row is still queued at claim time.
    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "UPDATE jobs SET status = 'processing'
                 WHERE job_id = (
                   SELECT job_id FROM jobs
                   WHERE status = 'queued' AND next_run_at <= ?1
                   ORDER BY next_run_at, created_at
                   LIMIT 1
                 ) AND status = 'queued'
                 RETURNING {}",
                RawJob::COLUMNS
              ),
              rusqlite::params![now_str],
              RawJob::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawJob::into_job).transpose()
  }

  async fn complete_job(&self, job_id: Uuid) -> Result<()> {
    let id_str = encode_uuid(job_id);
    let done_at = encode_dt(Utc::now());

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE jobs SET status = 'done', completed_at = ?2
           WHERE job_id = ?1 AND status = 'processing'",
          rusqlite::params![id_str, done_at],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::JobNotFound(job_id));
    }
    Ok(())
  }

  fn fail_transient(
    &self,
    job_id: Uuid,
    error: &str,
    next_run_at: DateTime<Utc>,
  ) -> impl std::future::Future<Output = Result<()>> + Send + '_ {
    let id_str = encode_uuid(job_id);
    let error = error.to_owned();
    let next_str = encode_dt(next_run_at);

    async move {
      let changed = self
        .conn
        .call(move |conn| {
          Ok(conn.execute(
            "UPDATE jobs
             SET status = 'queued', attempts = attempts + 1,
                 last_error = ?2, next_run_at = ?3
             WHERE job_id = ?1 AND status = 'processing'",
            rusqlite::params![id_str, error, next_str],
          )?)
        })
        .await?;

      if changed == 0 {
        return Err(Error::JobNotFound(job_id));
      }
      Ok(())
    }
  }

  async fn reschedule(
    &self,
    job_id: Uuid,
    next_run_at: DateTime<Utc>,
  ) -> Result<()> {
    let id_str = encode_uuid(job_id);
    let next_str = encode_dt(next_run_at);

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE jobs SET status = 'queued', next_run_at = ?2
           WHERE job_id = ?1 AND status = 'processing'",
          rusqlite::params![id_str, next_str],
        )?)
      })
      .await?;

    if changed == 0 {
      return Err(Error::JobNotFound(job_id));
    }
    Ok(())
  }

  fn fail_permanent(
    &self,
    job_id: Uuid,
    error: &str,
  ) -> impl std::future::Future<Output = Result<()>> + Send + '_ {
    let id_str = encode_uuid(job_id);
    let error = error.to_owned();
    let done_at = encode_dt(Utc::now());

    async move {
      let changed = self
        .conn
        .call(move |conn| {
          Ok(conn.execute(
            "UPDATE jobs
             SET status = 'failed', attempts = attempts + 1,
                 last_error = ?2, completed_at = ?3
             WHERE job_id = ?1 AND status = 'processing'",
            rusqlite::params![id_str, error, done_at],
          )?)
        })
        .await?;

      if changed == 0 {
        return Err(Error::JobNotFound(job_id));
      }
      Ok(())
    }
  }

  async fn active_job(
    &self,
    document_id: Uuid,
    kind: JobKind,
  ) -> Result<Option<SubmissionJob>> {
    let doc_str = encode_uuid(document_id);
    let kind_str = kind.discriminant().to_owned();

    let raw: Option<RawJob> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!(
                "SELECT {} FROM jobs
                 WHERE document_id = ?1 AND kind = ?2
                   AND status IN ('queued', 'processing')",
                RawJob::COLUMNS
              ),
              rusqlite::params![doc_str, kind_str],
              RawJob::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawJob::into_job).transpose()
  }

  async fn job_history(
    &self,
    document_id: Uuid,
    limit: usize,
  ) -> Result<Vec<SubmissionJob>> {
    let doc_str = encode_uuid(document_id);
    let limit = limit as i64;

    let raws: Vec<RawJob> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM jobs WHERE document_id = ?1
           ORDER BY created_at DESC, job_id DESC LIMIT ?2",
          RawJob::COLUMNS
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![doc_str, limit], RawJob::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawJob::into_job).collect()
  }
}
