//! Unsigned tax-document XML generation.
//!
//! Uses `quick-xml`'s writer API. Each document kind has its own root
//! structure; all of them share the `ext:UBLExtensions` container where the
//! enveloped signature will later live. The generator writes a placeholder
//! comment at that exact spot; the signer removes it before canonicalization
//! and splices the assembled signature at the same offset.

use std::io::Cursor;

use quick_xml::{
  Writer,
  events::{BytesEnd, BytesStart, BytesText, Event},
};

use quipu_core::{
  document::{DocumentKind, Money},
  payload::{FiscalPayload, LineItem, Party},
};

use crate::{Error, Result};

// ─── Namespaces ──────────────────────────────────────────────────────────────

pub const NS_INVOICE: &str =
  "urn:oasis:names:specification:ubl:schema:xsd:Invoice-2";
pub const NS_CREDIT_NOTE: &str =
  "urn:oasis:names:specification:ubl:schema:xsd:CreditNote-2";
pub const NS_DEBIT_NOTE: &str =
  "urn:oasis:names:specification:ubl:schema:xsd:DebitNote-2";
pub const NS_SUMMARY: &str =
  "urn:sunat:names:specification:ubl:peru:schema:xsd:SummaryDocuments-1";
pub const NS_VOIDED: &str =
  "urn:sunat:names:specification:ubl:peru:schema:xsd:VoidedDocuments-1";
pub const NS_CAC: &str =
  "urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2";
pub const NS_CBC: &str =
  "urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2";
pub const NS_EXT: &str =
  "urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2";
pub const NS_SAC: &str =
  "urn:sunat:names:specification:ubl:peru:schema:xsd:SunatAggregateComponents-1";
pub const NS_DS: &str = "http://www.w3.org/2000/09/xmldsig#";

/// The marker the signer replaces. Comments never survive canonicalization,
/// so digest computation is unaffected by whether removal happened first.
pub const SIGNATURE_PLACEHOLDER: &str = "<!--signature-->";

/// UBL invoice/note type codes per the authority's catalogue. Also the
/// second field of the printed QR payload.
pub fn type_code(kind: DocumentKind) -> &'static str {
  match kind {
    DocumentKind::Invoice => "01",
    DocumentKind::Receipt => "03",
    DocumentKind::CreditNote => "07",
    DocumentKind::DebitNote => "08",
    // Batch kinds carry no invoice type code; callers never ask.
    DocumentKind::Summary | DocumentKind::VoidedSet => "",
  }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

/// Render an unsigned document for `payload`, placeholder included.
pub fn render(payload: &FiscalPayload) -> Result<String> {
  let bytes = match payload.kind {
    DocumentKind::Invoice | DocumentKind::Receipt => {
      render_invoice_like(payload, "Invoice", NS_INVOICE)?
    }
    DocumentKind::CreditNote => {
      render_invoice_like(payload, "CreditNote", NS_CREDIT_NOTE)?
    }
    DocumentKind::DebitNote => {
      render_invoice_like(payload, "DebitNote", NS_DEBIT_NOTE)?
    }
    DocumentKind::Summary => render_batch(payload, "SummaryDocuments", NS_SUMMARY)?,
    DocumentKind::VoidedSet => render_batch(payload, "VoidedDocuments", NS_VOIDED)?,
  };
  String::from_utf8(bytes)
    .map_err(|_| Error::Malformed("writer produced non-UTF-8 output".into()))
}

// ─── Invoice / note roots ────────────────────────────────────────────────────

fn render_invoice_like(
  payload: &FiscalPayload,
  root: &str,
  root_ns: &str,
) -> Result<Vec<u8>> {
  let mut w = Writer::new(Cursor::new(Vec::new()));

  w.write_event(Event::Decl(quick_xml::events::BytesDecl::new(
    "1.0",
    Some("UTF-8"),
    None,
  )))?;

  let mut start = BytesStart::new(root);
  start.push_attribute(("xmlns", root_ns));
  start.push_attribute(("xmlns:cac", NS_CAC));
  start.push_attribute(("xmlns:cbc", NS_CBC));
  start.push_attribute(("xmlns:ds", NS_DS));
  start.push_attribute(("xmlns:ext", NS_EXT));
  w.write_event(Event::Start(start))?;

  write_extension_container(&mut w)?;

  write_text_elem(&mut w, "cbc:UBLVersionID", "2.1")?;
  write_text_elem(&mut w, "cbc:CustomizationID", "2.0")?;
  write_text_elem(&mut w, "cbc:ID", &payload.number.full())?;
  write_text_elem(
    &mut w,
    "cbc:IssueDate",
    &payload.issued_at.format("%Y-%m-%d").to_string(),
  )?;
  write_text_elem(
    &mut w,
    "cbc:IssueTime",
    &payload.issued_at.format("%H:%M:%S").to_string(),
  )?;
  if matches!(payload.kind, DocumentKind::Invoice | DocumentKind::Receipt) {
    write_text_elem(&mut w, "cbc:InvoiceTypeCode", type_code(payload.kind))?;
  }
  write_text_elem(&mut w, "cbc:DocumentCurrencyCode", &payload.totals.currency)?;

  // Notes reference the document they modify.
  if let Some(reference) = &payload.reference {
    write_start(&mut w, "cac:BillingReference")?;
    write_start(&mut w, "cac:InvoiceDocumentReference")?;
    write_text_elem(&mut w, "cbc:ID", reference)?;
    write_end(&mut w, "cac:InvoiceDocumentReference")?;
    write_end(&mut w, "cac:BillingReference")?;
  }

  write_party(&mut w, "cac:AccountingSupplierParty", &payload.issuer)?;
  write_party(&mut w, "cac:AccountingCustomerParty", &payload.customer)?;

  write_start(&mut w, "cac:TaxTotal")?;
  write_amount(&mut w, "cbc:TaxAmount", payload.totals.tax, &payload.totals.currency)?;
  write_end(&mut w, "cac:TaxTotal")?;

  write_start(&mut w, "cac:LegalMonetaryTotal")?;
  write_amount(
    &mut w,
    "cbc:LineExtensionAmount",
    payload.totals.taxable,
    &payload.totals.currency,
  )?;
  write_amount(
    &mut w,
    "cbc:TaxInclusiveAmount",
    payload.totals.total,
    &payload.totals.currency,
  )?;
  write_amount(
    &mut w,
    "cbc:PayableAmount",
    payload.totals.total,
    &payload.totals.currency,
  )?;
  write_end(&mut w, "cac:LegalMonetaryTotal")?;

  let line_tag = match payload.kind {
    DocumentKind::CreditNote => "cac:CreditNoteLine",
    DocumentKind::DebitNote => "cac:DebitNoteLine",
    _ => "cac:InvoiceLine",
  };
  for (index, line) in payload.lines.iter().enumerate() {
    write_line(&mut w, line_tag, index + 1, line, &payload.totals.currency)?;
  }

  w.write_event(Event::End(BytesEnd::new(root)))?;
  Ok(w.into_inner().into_inner())
}

// ─── Batch roots (summary / voided) ──────────────────────────────────────────

fn render_batch(
  payload: &FiscalPayload,
  root: &str,
  root_ns: &str,
) -> Result<Vec<u8>> {
  let mut w = Writer::new(Cursor::new(Vec::new()));

  w.write_event(Event::Decl(quick_xml::events::BytesDecl::new(
    "1.0",
    Some("UTF-8"),
    None,
  )))?;

  let mut start = BytesStart::new(root);
  start.push_attribute(("xmlns", root_ns));
  start.push_attribute(("xmlns:cac", NS_CAC));
  start.push_attribute(("xmlns:cbc", NS_CBC));
  start.push_attribute(("xmlns:ds", NS_DS));
  start.push_attribute(("xmlns:ext", NS_EXT));
  start.push_attribute(("xmlns:sac", NS_SAC));
  w.write_event(Event::Start(start))?;

  write_extension_container(&mut w)?;

  write_text_elem(&mut w, "cbc:UBLVersionID", "2.0")?;
  write_text_elem(&mut w, "cbc:CustomizationID", "1.1")?;
  write_text_elem(&mut w, "cbc:ID", &payload.number.full())?;
  write_text_elem(
    &mut w,
    "cbc:ReferenceDate",
    &payload.issued_at.format("%Y-%m-%d").to_string(),
  )?;
  write_text_elem(&mut w, "cbc:IssueDate", &payload.issued_at.format("%Y-%m-%d").to_string())?;

  write_party(&mut w, "cac:AccountingSupplierParty", &payload.issuer)?;

  // Each batch line references one underlying document by full number.
  for (index, line) in payload.lines.iter().enumerate() {
    write_start(&mut w, "sac:SummaryDocumentsLine")?;
    write_text_elem(&mut w, "cbc:LineID", &(index + 1).to_string())?;
    write_text_elem(&mut w, "cbc:DocumentTypeCode", type_code(DocumentKind::Receipt))?;
    write_text_elem(&mut w, "cbc:ID", &line.description)?;
    write_amount(&mut w, "cbc:TotalAmount", line.subtotal, &payload.totals.currency)?;
    write_end(&mut w, "sac:SummaryDocumentsLine")?;
  }

  w.write_event(Event::End(BytesEnd::new(root)))?;
  Ok(w.into_inner().into_inner())
}

// ─── Shared blocks ───────────────────────────────────────────────────────────

/// `ext:UBLExtensions` with the empty extension-content slot holding the
/// signature placeholder.
fn write_extension_container(w: &mut Writer<Cursor<Vec<u8>>>) -> Result<()> {
  write_start(w, "ext:UBLExtensions")?;
  write_start(w, "ext:UBLExtension")?;
  write_start(w, "ext:ExtensionContent")?;
  w.write_event(Event::Comment(BytesText::new("signature")))?;
  write_end(w, "ext:ExtensionContent")?;
  write_end(w, "ext:UBLExtension")?;
  write_end(w, "ext:UBLExtensions")?;
  Ok(())
}

fn write_party(
  w: &mut Writer<Cursor<Vec<u8>>>,
  wrapper: &str,
  party: &Party,
) -> Result<()> {
  write_start(w, wrapper)?;
  write_start(w, "cac:Party")?;

  write_start(w, "cac:PartyIdentification")?;
  let mut id = BytesStart::new("cbc:ID");
  id.push_attribute(("schemeID", party.id.kind.scheme_code()));
  w.write_event(Event::Start(id))?;
  w.write_event(Event::Text(BytesText::new(&party.id.value)))?;
  write_end(w, "cbc:ID")?;
  write_end(w, "cac:PartyIdentification")?;

  write_start(w, "cac:PartyLegalEntity")?;
  write_text_elem(w, "cbc:RegistrationName", &party.name)?;
  if let Some(address) = &party.address {
    write_start(w, "cac:RegistrationAddress")?;
    write_text_elem(w, "cbc:Line", address)?;
    write_end(w, "cac:RegistrationAddress")?;
  }
  write_end(w, "cac:PartyLegalEntity")?;

  write_end(w, "cac:Party")?;
  write_end(w, wrapper)?;
  Ok(())
}

fn write_line(
  w: &mut Writer<Cursor<Vec<u8>>>,
  tag: &str,
  index: usize,
  line: &LineItem,
  currency: &str,
) -> Result<()> {
  write_start(w, tag)?;
  write_text_elem(w, "cbc:ID", &index.to_string())?;

  let mut qty = BytesStart::new("cbc:InvoicedQuantity");
  qty.push_attribute(("unitCode", "NIU"));
  w.write_event(Event::Start(qty))?;
  w.write_event(Event::Text(BytesText::new(&quantity_decimal(
    line.quantity_milli,
  ))))?;
  write_end(w, "cbc:InvoicedQuantity")?;

  write_amount(w, "cbc:LineExtensionAmount", line.subtotal, currency)?;

  write_start(w, "cac:Item")?;
  write_text_elem(w, "cbc:Description", &line.description)?;
  write_end(w, "cac:Item")?;

  write_start(w, "cac:Price")?;
  write_amount(w, "cbc:PriceAmount", line.unit_price, currency)?;
  write_end(w, "cac:Price")?;

  write_end(w, tag)?;
  Ok(())
}

// ─── Writer helpers ──────────────────────────────────────────────────────────

fn write_start(w: &mut Writer<Cursor<Vec<u8>>>, tag: &str) -> Result<()> {
  w.write_event(Event::Start(BytesStart::new(tag)))?;
  Ok(())
}

fn write_end(w: &mut Writer<Cursor<Vec<u8>>>, tag: &str) -> Result<()> {
  w.write_event(Event::End(BytesEnd::new(tag)))?;
  Ok(())
}

fn write_text_elem(
  w: &mut Writer<Cursor<Vec<u8>>>,
  tag: &str,
  text: &str,
) -> Result<()> {
  write_start(w, tag)?;
  w.write_event(Event::Text(BytesText::new(text)))?;
  write_end(w, tag)
}

fn write_amount(
  w: &mut Writer<Cursor<Vec<u8>>>,
  tag: &str,
  amount: Money,
  currency: &str,
) -> Result<()> {
  let mut start = BytesStart::new(tag);
  start.push_attribute(("currencyID", currency));
  w.write_event(Event::Start(start))?;
  w.write_event(Event::Text(BytesText::new(&amount.to_decimal())))?;
  write_end(w, tag)
}

/// Decimal rendering of a thousandths quantity with trailing zeros trimmed:
/// `2000 -> "2"`, `1500 -> "1.5"`, `1005 -> "1.005"`.
fn quantity_decimal(quantity_milli: i64) -> String {
  let whole = quantity_milli / 1000;
  let frac = (quantity_milli % 1000).unsigned_abs();
  if frac == 0 {
    whole.to_string()
  } else {
    let s = format!("{whole}.{frac:03}");
    s.trim_end_matches('0').to_string()
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use quipu_core::{
    document::{DocumentKind, DocumentNumber, Money},
    payload::{
      FiscalPayload, LineItem, Party, PartyId, PartyIdKind, TaxCategory, Totals,
    },
  };

  use super::*;

  fn payload(kind: DocumentKind) -> FiscalPayload {
    FiscalPayload {
      kind,
      number:    DocumentNumber::new("F001", 42),
      issuer:    Party {
        id:      PartyId::new(PartyIdKind::Ruc, "20100070970"),
        name:    "Comercial Andina S.A.C.".into(),
        address: Some("Av. Arequipa 1234, Lima".into()),
      },
      customer:  Party {
        id:      PartyId::new(PartyIdKind::Ruc, "20506397815"),
        name:    "Cliente Corporativo S.A.".into(),
        address: None,
      },
      lines:     vec![LineItem {
        description:    "Widget <premium>".into(),
        quantity_milli: 2_000,
        unit_price:     Money(1000),
        subtotal:       Money(2000),
        tax_category:   TaxCategory::Standard,
      }],
      totals:    Totals {
        taxable:  Money(2000),
        tax:      Money(360),
        total:    Money(2360),
        currency: "PEN".into(),
      },
      issued_at: Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 0).unwrap(),
      reference: None,
    }
  }

  #[test]
  fn invoice_contains_placeholder_exactly_once() {
    let xml = render(&payload(DocumentKind::Invoice)).unwrap();
    assert_eq!(xml.matches(SIGNATURE_PLACEHOLDER).count(), 1);
    assert!(xml.contains("<ext:ExtensionContent>"));
  }

  #[test]
  fn invoice_structure_and_amounts() {
    let xml = render(&payload(DocumentKind::Invoice)).unwrap();
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    assert!(xml.contains("<cbc:ID>F001-42</cbc:ID>"));
    assert!(xml.contains("<cbc:InvoiceTypeCode>01</cbc:InvoiceTypeCode>"));
    assert!(xml.contains("<cbc:IssueDate>2026-03-14</cbc:IssueDate>"));
    assert!(
      xml.contains("<cbc:PayableAmount currencyID=\"PEN\">23.60</cbc:PayableAmount>")
    );
    assert!(xml.contains("schemeID=\"6\""));
  }

  #[test]
  fn item_description_is_escaped() {
    let xml = render(&payload(DocumentKind::Invoice)).unwrap();
    assert!(xml.contains("Widget &lt;premium&gt;"));
    assert!(!xml.contains("Widget <premium>"));
  }

  #[test]
  fn credit_note_uses_its_own_root_and_reference() {
    let mut p = payload(DocumentKind::CreditNote);
    p.reference = Some("F001-41".into());
    let xml = render(&p).unwrap();
    assert!(xml.contains("<CreditNote "));
    assert!(xml.contains("CreditNote-2"));
    assert!(xml.contains("<cac:CreditNoteLine>"));
    assert!(xml.contains("<cbc:ID>F001-41</cbc:ID>"));
    assert!(!xml.contains("InvoiceTypeCode"));
  }

  #[test]
  fn summary_uses_batch_root() {
    let xml = render(&payload(DocumentKind::Summary)).unwrap();
    assert!(xml.contains("<SummaryDocuments "));
    assert!(xml.contains("SummaryDocumentsLine"));
    assert_eq!(xml.matches(SIGNATURE_PLACEHOLDER).count(), 1);
  }

  #[test]
  fn quantity_rendering() {
    assert_eq!(quantity_decimal(2_000), "2");
    assert_eq!(quantity_decimal(1_500), "1.5");
    assert_eq!(quantity_decimal(1_005), "1.005");
    assert_eq!(quantity_decimal(10_050), "10.05");
  }

  #[test]
  fn rendering_is_deterministic() {
    let p = payload(DocumentKind::Invoice);
    assert_eq!(render(&p).unwrap(), render(&p).unwrap());
  }
}
