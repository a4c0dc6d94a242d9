//! The fiscal payload and its builder.
//!
//! The payload is the schema-agnostic intermediate between a sale and the
//! XML generator: issuer block, customer block, ordered line items, totals.
//! Building validates business rules first and never mutates the document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  document::{DocumentKind, DocumentNumber, FiscalDocument, Money},
};

// ─── Party identity ──────────────────────────────────────────────────────────

/// National identity scheme a customer id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartyIdKind {
  /// 11-digit business taxpayer registration.
  Ruc,
  /// 8-digit national identity document.
  Dni,
  Passport,
  ForeignerCard,
  /// Walk-in customer below the identification threshold.
  Unidentified,
}

impl PartyIdKind {
  /// Scheme code used in the XML `schemeID` attribute.
  pub fn scheme_code(self) -> &'static str {
    match self {
      Self::Ruc => "6",
      Self::Dni => "1",
      Self::Passport => "7",
      Self::ForeignerCard => "4",
      Self::Unidentified => "0",
    }
  }
}

/// A tax-relevant identity: scheme + value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyId {
  pub kind:  PartyIdKind,
  pub value: String,
}

impl PartyId {
  pub fn new(kind: PartyIdKind, value: impl Into<String>) -> Self {
    Self { kind, value: value.into() }
  }

  /// Check the value against the format its declared kind requires.
  pub fn validate(&self) -> Result<()> {
    let ok = match self.kind {
      PartyIdKind::Ruc => {
        self.value.len() == 11 && self.value.bytes().all(|b| b.is_ascii_digit())
      }
      PartyIdKind::Dni => {
        self.value.len() == 8 && self.value.bytes().all(|b| b.is_ascii_digit())
      }
      PartyIdKind::Passport | PartyIdKind::ForeignerCard => {
        !self.value.is_empty() && self.value.len() <= 15
      }
      PartyIdKind::Unidentified => true,
    };
    if ok {
      Ok(())
    } else {
      Err(Error::InvalidCustomerData(format!(
        "{:?} id {:?} does not match the declared scheme",
        self.kind, self.value
      )))
    }
  }
}

/// A party block: issuer or customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
  pub id:      PartyId,
  pub name:    String,
  pub address: Option<String>,
}

// ─── Line items ──────────────────────────────────────────────────────────────

/// Tax treatment of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxCategory {
  /// Standard 18% rate.
  Standard,
  Exempt,
  Unaffected,
  Export,
}

impl TaxCategory {
  /// Tax on a subtotal; integer half-up rounding so results are
  /// platform-stable.
  pub fn tax_on(self, subtotal: Money) -> Money {
    match self {
      Self::Standard => Money((subtotal.0 * 18 + 50) / 100),
      Self::Exempt | Self::Unaffected | Self::Export => Money(0),
    }
  }
}

/// One ordered line of the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
  pub description:    String,
  /// Quantity in thousandths, e.g. `2_000` for two units.
  pub quantity_milli: i64,
  pub unit_price:     Money,
  pub subtotal:       Money,
  pub tax_category:   TaxCategory,
}

/// The totals block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Totals {
  pub taxable:  Money,
  pub tax:      Money,
  pub total:    Money,
  pub currency: String,
}

// ─── Sale snapshot ───────────────────────────────────────────────────────────

/// What the checkout subsystem hands over for a document — interface only;
/// how the sale was computed is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleSnapshot {
  pub lines: Vec<SaleLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleLine {
  pub description:    String,
  pub quantity_milli: i64,
  pub unit_price:     Money,
  pub tax_category:   TaxCategory,
}

// ─── FiscalPayload ───────────────────────────────────────────────────────────

/// The structured, schema-agnostic input to the XML generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiscalPayload {
  pub kind:      DocumentKind,
  pub number:    DocumentNumber,
  pub issuer:    Party,
  pub customer:  Party,
  pub lines:     Vec<LineItem>,
  pub totals:    Totals,
  pub issued_at: DateTime<Utc>,
  /// Full number of the referenced prior document, for notes.
  pub reference: Option<String>,
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Subtotal of a sale line: `quantity * unit_price`, half-up on the
/// thousandths quantity scale.
fn line_subtotal(line: &SaleLine) -> Money {
  Money((line.quantity_milli * line.unit_price.0 + 500) / 1000)
}

/// Build a validated payload from a document in `Draft` and its sale.
///
/// Validation order: line items non-empty, customer id format, kind-specific
/// id requirements, totals cross-check. Fails without touching either input.
pub fn build_payload(
  document: &FiscalDocument,
  sale: &SaleSnapshot,
  reference_number: Option<String>,
) -> Result<FiscalPayload> {
  if sale.lines.is_empty() {
    return Err(Error::EmptyDocument);
  }

  document.customer_id.validate()?;

  if document.kind == DocumentKind::Invoice
    && document.customer_id.kind != PartyIdKind::Ruc
  {
    return Err(Error::InvalidCustomerData(
      "an invoice requires a business tax id (RUC), not a personal id".into(),
    ));
  }

  let mut lines = Vec::with_capacity(sale.lines.len());
  let mut taxable = Money(0);
  let mut tax = Money(0);
  for sl in &sale.lines {
    let subtotal = line_subtotal(sl);
    taxable = taxable + subtotal;
    tax = tax + sl.tax_category.tax_on(subtotal);
    lines.push(LineItem {
      description:    sl.description.clone(),
      quantity_milli: sl.quantity_milli,
      unit_price:     sl.unit_price,
      subtotal,
      tax_category:   sl.tax_category,
    });
  }
  let total = taxable + tax;

  // The sale computation owns the amounts; we refuse to sign a document whose
  // stored totals drift from its lines by even one cent.
  if taxable != document.taxable || tax != document.tax || total != document.total
  {
    return Err(Error::TotalsMismatch(format!(
      "document says {}/{}/{}, lines compute {}/{}/{}",
      document.taxable, document.tax, document.total, taxable, tax, total
    )));
  }

  Ok(FiscalPayload {
    kind:      document.kind,
    number:    document.number.clone(),
    issuer:    Party {
      id:      PartyId::new(PartyIdKind::Ruc, document.issuer_tax_id.clone()),
      name:    document.issuer_name.clone(),
      address: None,
    },
    customer:  Party {
      id:      document.customer_id.clone(),
      name:    document.customer_name.clone(),
      address: None,
    },
    lines,
    totals:    Totals {
      taxable,
      tax,
      total,
      currency: document.currency.clone(),
    },
    issued_at: document.issued_at,
    reference: reference_number,
  })
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use uuid::Uuid;

  use super::*;
  use crate::status::DocumentStatus;

  fn draft(kind: DocumentKind, customer: PartyId) -> FiscalDocument {
    FiscalDocument {
      document_id:   Uuid::new_v4(),
      tenant_id:     Uuid::new_v4(),
      kind,
      number:        DocumentNumber::new("F001", 1),
      issuer_tax_id: "20100070970".into(),
      issuer_name:   "Comercial Andina S.A.C.".into(),
      customer_id:   customer,
      customer_name: "Cliente".into(),
      currency:      "PEN".into(),
      taxable:       Money(2000),
      tax:           Money(360),
      total:         Money(2360),
      issued_at:     Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 0).unwrap(),
      created_at:    Utc::now(),
      reference:     None,
      status:        DocumentStatus::Draft,
      artifacts:     None,
      remote:        crate::document::RemoteState::Idle,
    }
  }

  fn one_line_sale() -> SaleSnapshot {
    SaleSnapshot {
      lines: vec![SaleLine {
        description:    "Widget".into(),
        quantity_milli: 2_000,
        unit_price:     Money(1000),
        tax_category:   TaxCategory::Standard,
      }],
    }
  }

  fn ruc() -> PartyId { PartyId::new(PartyIdKind::Ruc, "20506397815") }

  #[test]
  fn builds_payload_for_valid_invoice() {
    let doc = draft(DocumentKind::Invoice, ruc());
    let payload = build_payload(&doc, &one_line_sale(), None).unwrap();

    assert_eq!(payload.lines.len(), 1);
    assert_eq!(payload.lines[0].subtotal, Money(2000));
    assert_eq!(payload.totals.tax, Money(360));
    assert_eq!(payload.totals.total, Money(2360));
  }

  #[test]
  fn empty_sale_is_rejected() {
    let doc = draft(DocumentKind::Invoice, ruc());
    let err =
      build_payload(&doc, &SaleSnapshot { lines: vec![] }, None).unwrap_err();
    assert!(matches!(err, Error::EmptyDocument));
  }

  #[test]
  fn invoice_with_personal_id_is_rejected() {
    let doc =
      draft(DocumentKind::Invoice, PartyId::new(PartyIdKind::Dni, "40123456"));
    let err = build_payload(&doc, &one_line_sale(), None).unwrap_err();
    assert!(matches!(err, Error::InvalidCustomerData(_)));
  }

  #[test]
  fn receipt_with_personal_id_is_fine() {
    let doc =
      draft(DocumentKind::Receipt, PartyId::new(PartyIdKind::Dni, "40123456"));
    assert!(build_payload(&doc, &one_line_sale(), None).is_ok());
  }

  #[test]
  fn malformed_ruc_is_rejected() {
    let doc =
      draft(DocumentKind::Invoice, PartyId::new(PartyIdKind::Ruc, "123"));
    let err = build_payload(&doc, &one_line_sale(), None).unwrap_err();
    assert!(matches!(err, Error::InvalidCustomerData(_)));
  }

  #[test]
  fn one_cent_drift_is_rejected() {
    let mut doc = draft(DocumentKind::Invoice, ruc());
    doc.total = Money(2361);
    let err = build_payload(&doc, &one_line_sale(), None).unwrap_err();
    assert!(matches!(err, Error::TotalsMismatch(_)));
  }

  #[test]
  fn standard_tax_rounds_half_up() {
    // 18% of 0.05 is 0.009 -> rounds to 0.01
    assert_eq!(TaxCategory::Standard.tax_on(Money(5)), Money(1));
    assert_eq!(TaxCategory::Exempt.tax_on(Money(1000)), Money(0));
  }

  #[test]
  fn fractional_quantity_subtotal_rounds() {
    // 1.5 * 0.99 = 1.485 -> 1.49
    let line = SaleLine {
      description:    "Bulk".into(),
      quantity_milli: 1_500,
      unit_price:     Money(99),
      tax_category:   TaxCategory::Standard,
    };
    assert_eq!(line_subtotal(&line), Money(149));
  }
}
