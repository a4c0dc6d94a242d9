//! The fiscal document record and its value types.
//!
//! A [`FiscalDocument`] is the unit the pipeline moves through the compliance
//! state machine. Fields that are only meaningful past a given status live in
//! explicit sum types ([`SignedArtifacts`], [`RemoteState`]) rather than as
//! bare optionals, so "null means not-yet" never leaks into business logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{payload::PartyId, status::DocumentStatus};

// ─── Money ───────────────────────────────────────────────────────────────────

/// A monetary amount in integer cents. Fiscal math never touches floats, so
/// digests over rendered amounts are bit-stable across platforms.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(pub i64);

impl Money {
  pub fn cents(self) -> i64 { self.0 }

  /// Decimal rendering with exactly two fraction digits, e.g. `"20.00"`.
  /// This is the form written into XML amount elements.
  pub fn to_decimal(self) -> String {
    let sign = if self.0 < 0 { "-" } else { "" };
    let abs = self.0.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
  }
}

impl std::ops::Add for Money {
  type Output = Money;
  fn add(self, rhs: Money) -> Money { Money(self.0 + rhs.0) }
}

impl std::fmt::Display for Money {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.to_decimal())
  }
}

// ─── Document kind ───────────────────────────────────────────────────────────

/// The kind of electronic tax document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
  Invoice,
  Receipt,
  CreditNote,
  DebitNote,
  /// Daily summary of receipts; submitted as a batch, answered by ticket.
  Summary,
  /// Batch communication voiding previously issued documents.
  VoidedSet,
}

impl DocumentKind {
  /// The discriminant string stored in the `kind` column.
  /// Must match the `rename_all = "snake_case"` serde tags above.
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Invoice => "invoice",
      Self::Receipt => "receipt",
      Self::CreditNote => "credit_note",
      Self::DebitNote => "debit_note",
      Self::Summary => "summary",
      Self::VoidedSet => "voided_set",
    }
  }

  /// Batch kinds are submitted through the ticket protocol and must be
  /// polled for their final outcome.
  pub fn is_batch(self) -> bool {
    matches!(self, Self::Summary | Self::VoidedSet)
  }

  /// Notes and voided-sets must reference the document they modify.
  pub fn requires_reference(self) -> bool {
    matches!(self, Self::CreditNote | Self::DebitNote | Self::VoidedSet)
  }
}

// ─── Document number ─────────────────────────────────────────────────────────

/// Series + sequence identity, rendered `F001-123`. Unique per tenant+series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentNumber {
  pub series:   String,
  pub sequence: u32,
}

impl DocumentNumber {
  pub fn new(series: impl Into<String>, sequence: u32) -> Self {
    Self { series: series.into(), sequence }
  }

  /// The composed full number, e.g. `"F001-123"`.
  pub fn full(&self) -> String { format!("{}-{}", self.series, self.sequence) }
}

impl std::fmt::Display for DocumentNumber {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}-{}", self.series, self.sequence)
  }
}

// ─── Signed artifacts ────────────────────────────────────────────────────────

/// The immutable output of a successful signing operation. Present iff the
/// document status is `Signed` or later; never modified once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedArtifacts {
  /// Final signed XML, with the enveloped `ds:Signature` spliced in.
  pub xml:          String,
  /// Base64 SHA-256 digest embedded in the signature's `DigestValue`.
  pub digest_b64:   String,
  /// Hex SHA-256 over the final signed bytes; stored hash and QR component.
  pub content_hash: String,
  /// Pipe-delimited QR payload printed on the physical receipt.
  pub qr_payload:   String,
}

// ─── Remote interaction state ────────────────────────────────────────────────

/// Progress of the document through the remote authority's protocol.
///
/// A tagged union keyed by protocol phase: a ticket exists only between a
/// batch submission and its final poll; response code/message exist only once
/// the authority has answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RemoteState {
  /// No interaction with the authority yet.
  Idle,
  /// A batch submission was accepted for processing; poll for the outcome.
  TicketPending {
    ticket:    String,
    issued_at: DateTime<Utc>,
  },
  /// The authority produced a final answer.
  Closed {
    code:        String,
    message:     String,
    received_at: DateTime<Utc>,
    /// Whether a receipt archive (CDR) was returned and stored. The archive
    /// itself is an opaque blob held by the store, never inlined here.
    has_cdr:     bool,
  },
}

impl RemoteState {
  pub fn ticket(&self) -> Option<&str> {
    match self {
      Self::TicketPending { ticket, .. } => Some(ticket),
      _ => None,
    }
  }
}

// ─── FiscalDocument ──────────────────────────────────────────────────────────

/// The tax-document record moved through the compliance pipeline.
///
/// Created in `Draft`; mutated only by the signer (`Draft -> Signed`) and by
/// the worker/protocol client thereafter. Never deleted — superseded by a
/// referencing credit note or voided-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalDocument {
  pub document_id:   Uuid,
  pub tenant_id:     Uuid,
  pub kind:          DocumentKind,
  pub number:        DocumentNumber,
  pub issuer_tax_id: String,
  pub issuer_name:   String,
  pub customer_id:   PartyId,
  pub customer_name: String,
  /// ISO 4217 code, e.g. `"PEN"`.
  pub currency:      String,
  pub taxable:       Money,
  pub tax:           Money,
  pub total:         Money,
  pub issued_at:     DateTime<Utc>,
  pub created_at:    DateTime<Utc>,
  /// Prior document modified by this one (credit/debit notes, voided-sets).
  pub reference:     Option<Uuid>,
  pub status:        DocumentStatus,
  pub artifacts:     Option<SignedArtifacts>,
  pub remote:        RemoteState,
}

impl FiscalDocument {
  /// `signed-XML is present iff status >= SIGNED`.
  pub fn invariants_hold(&self) -> bool {
    let signed = self.status != DocumentStatus::Draft
      && self.status != DocumentStatus::Canceled;
    // A document canceled after signing keeps its artifact; one canceled in
    // Draft never had it. Either way Draft must not carry an artifact.
    match self.status {
      DocumentStatus::Draft => self.artifacts.is_none(),
      DocumentStatus::Canceled => true,
      _ => signed == self.artifacts.is_some(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn money_decimal_rendering() {
    assert_eq!(Money(0).to_decimal(), "0.00");
    assert_eq!(Money(5).to_decimal(), "0.05");
    assert_eq!(Money(2000).to_decimal(), "20.00");
    assert_eq!(Money(123_456).to_decimal(), "1234.56");
    assert_eq!(Money(-360).to_decimal(), "-3.60");
  }

  #[test]
  fn full_number_composition() {
    let n = DocumentNumber::new("F001", 123);
    assert_eq!(n.full(), "F001-123");
  }

  #[test]
  fn batch_kinds_use_tickets() {
    assert!(DocumentKind::Summary.is_batch());
    assert!(DocumentKind::VoidedSet.is_batch());
    assert!(!DocumentKind::Invoice.is_batch());
  }
}
