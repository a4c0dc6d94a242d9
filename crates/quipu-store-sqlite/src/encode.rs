//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. Structured fields
//! (artifacts, remote state) are stored as compact JSON. UUIDs are stored as
//! hyphenated lowercase strings.

use chrono::{DateTime, Utc};
use quipu_core::{
  document::{
    DocumentKind, DocumentNumber, FiscalDocument, Money, RemoteState,
    SignedArtifacts,
  },
  job::{JobKind, JobStatus, SubmissionJob},
  payload::{PartyId, PartyIdKind},
  status::DocumentStatus,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Discriminants ───────────────────────────────────────────────────────────

pub fn decode_document_kind(s: &str) -> Result<DocumentKind> {
  match s {
    "invoice" => Ok(DocumentKind::Invoice),
    "receipt" => Ok(DocumentKind::Receipt),
    "credit_note" => Ok(DocumentKind::CreditNote),
    "debit_note" => Ok(DocumentKind::DebitNote),
    "summary" => Ok(DocumentKind::Summary),
    "voided_set" => Ok(DocumentKind::VoidedSet),
    other => Err(Error::DateParse(format!("unknown document kind: {other:?}"))),
  }
}

pub fn decode_status(s: &str) -> Result<DocumentStatus> {
  match s {
    "draft" => Ok(DocumentStatus::Draft),
    "signed" => Ok(DocumentStatus::Signed),
    "sent" => Ok(DocumentStatus::Sent),
    "accepted" => Ok(DocumentStatus::Accepted),
    "rejected" => Ok(DocumentStatus::Rejected),
    "observed" => Ok(DocumentStatus::Observed),
    "error" => Ok(DocumentStatus::Error),
    "canceled" => Ok(DocumentStatus::Canceled),
    other => Err(Error::DateParse(format!("unknown status: {other:?}"))),
  }
}

pub fn decode_job_kind(s: &str) -> Result<JobKind> {
  match s {
    "send_document" => Ok(JobKind::SendDocument),
    "send_summary" => Ok(JobKind::SendSummary),
    "poll_ticket" => Ok(JobKind::PollTicket),
    other => Err(Error::DateParse(format!("unknown job kind: {other:?}"))),
  }
}

pub fn decode_job_status(s: &str) -> Result<JobStatus> {
  match s {
    "queued" => Ok(JobStatus::Queued),
    "processing" => Ok(JobStatus::Processing),
    "done" => Ok(JobStatus::Done),
    "failed" => Ok(JobStatus::Failed),
    other => Err(Error::DateParse(format!("unknown job status: {other:?}"))),
  }
}

pub fn encode_party_kind(k: PartyIdKind) -> &'static str {
  match k {
    PartyIdKind::Ruc => "ruc",
    PartyIdKind::Dni => "dni",
    PartyIdKind::Passport => "passport",
    PartyIdKind::ForeignerCard => "foreigner_card",
    PartyIdKind::Unidentified => "unidentified",
  }
}

pub fn decode_party_kind(s: &str) -> Result<PartyIdKind> {
  match s {
    "ruc" => Ok(PartyIdKind::Ruc),
    "dni" => Ok(PartyIdKind::Dni),
    "passport" => Ok(PartyIdKind::Passport),
    "foreigner_card" => Ok(PartyIdKind::ForeignerCard),
    "unidentified" => Ok(PartyIdKind::Unidentified),
    other => Err(Error::DateParse(format!("unknown party id kind: {other:?}"))),
  }
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_artifacts(a: &SignedArtifacts) -> Result<String> {
  Ok(serde_json::to_string(a)?)
}

pub fn encode_remote(r: &RemoteState) -> Result<String> {
  Ok(serde_json::to_string(r)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `documents` row.
pub struct RawDocument {
  pub document_id:    String,
  pub tenant_id:      String,
  pub kind:           String,
  pub series:         String,
  pub sequence:       i64,
  pub issuer_tax_id:  String,
  pub issuer_name:    String,
  pub customer_kind:  String,
  pub customer_value: String,
  pub customer_name:  String,
  pub currency:       String,
  pub taxable_cents:  i64,
  pub tax_cents:      i64,
  pub total_cents:    i64,
  pub issued_at:      String,
  pub created_at:     String,
  pub reference_id:   Option<String>,
  pub status:         String,
  pub artifacts:      Option<String>,
  pub remote:         String,
}

impl RawDocument {
  pub const COLUMNS: &'static str = "document_id, tenant_id, kind, series, \
     sequence, issuer_tax_id, issuer_name, customer_kind, customer_value, \
     customer_name, currency, taxable_cents, tax_cents, total_cents, \
     issued_at, created_at, reference_id, status, artifacts, remote";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      document_id:    row.get(0)?,
      tenant_id:      row.get(1)?,
      kind:           row.get(2)?,
      series:         row.get(3)?,
      sequence:       row.get(4)?,
      issuer_tax_id:  row.get(5)?,
      issuer_name:    row.get(6)?,
      customer_kind:  row.get(7)?,
      customer_value: row.get(8)?,
      customer_name:  row.get(9)?,
      currency:       row.get(10)?,
      taxable_cents:  row.get(11)?,
      tax_cents:      row.get(12)?,
      total_cents:    row.get(13)?,
      issued_at:      row.get(14)?,
      created_at:     row.get(15)?,
      reference_id:   row.get(16)?,
      status:         row.get(17)?,
      artifacts:      row.get(18)?,
      remote:         row.get(19)?,
    })
  }

  pub fn into_document(self) -> Result<FiscalDocument> {
    let artifacts: Option<SignedArtifacts> = self
      .artifacts
      .as_deref()
      .map(serde_json::from_str)
      .transpose()?;
    let remote: RemoteState = serde_json::from_str(&self.remote)?;

    Ok(FiscalDocument {
      document_id:   decode_uuid(&self.document_id)?,
      tenant_id:     decode_uuid(&self.tenant_id)?,
      kind:          decode_document_kind(&self.kind)?,
      number:        DocumentNumber {
        series:   self.series,
        sequence: self.sequence as u32,
      },
      issuer_tax_id: self.issuer_tax_id,
      issuer_name:   self.issuer_name,
      customer_id:   PartyId {
        kind:  decode_party_kind(&self.customer_kind)?,
        value: self.customer_value,
      },
      customer_name: self.customer_name,
      currency:      self.currency,
      taxable:       Money(self.taxable_cents),
      tax:           Money(self.tax_cents),
      total:         Money(self.total_cents),
      issued_at:     decode_dt(&self.issued_at)?,
      created_at:    decode_dt(&self.created_at)?,
      reference:     self.reference_id.as_deref().map(decode_uuid).transpose()?,
      status:        decode_status(&self.status)?,
      artifacts,
      remote,
    })
  }
}

/// Raw strings read directly from a `jobs` row.
pub struct RawJob {
  pub job_id:       String,
  pub tenant_id:    String,
  pub document_id:  String,
  pub kind:         String,
  pub status:       String,
  pub attempts:     i64,
  pub last_error:   Option<String>,
  pub next_run_at:  String,
  pub created_at:   String,
  pub completed_at: Option<String>,
}

impl RawJob {
  pub const COLUMNS: &'static str = "job_id, tenant_id, document_id, kind, \
     status, attempts, last_error, next_run_at, created_at, completed_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      job_id:       row.get(0)?,
      tenant_id:    row.get(1)?,
      document_id:  row.get(2)?,
      kind:         row.get(3)?,
      status:       row.get(4)?,
      attempts:     row.get(5)?,
      last_error:   row.get(6)?,
      next_run_at:  row.get(7)?,
      created_at:   row.get(8)?,
      completed_at: row.get(9)?,
    })
  }

  pub fn into_job(self) -> Result<SubmissionJob> {
    Ok(SubmissionJob {
      job_id:       decode_uuid(&self.job_id)?,
      tenant_id:    decode_uuid(&self.tenant_id)?,
      document_id:  decode_uuid(&self.document_id)?,
      kind:         decode_job_kind(&self.kind)?,
      status:       decode_job_status(&self.status)?,
      attempts:     self.attempts as u32,
      last_error:   self.last_error,
      next_run_at:  decode_dt(&self.next_run_at)?,
      created_at:   decode_dt(&self.created_at)?,
      completed_at: self.completed_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}
