//! Self-test verification of a signed document.
//!
//! This re-derives the digest the way an external validator would: strip the
//! signature element, canonicalize identically, hash, and compare with the
//! embedded `DigestValue`. Equality is necessary but NOT sufficient — the
//! RSA signature over `SignedInfo` is not cryptographically re-verified
//! here. That matches the behaviour operators rely on today (the authority
//! performs the full check); deepening it is a deliberate future change,
//! not something to slip in silently.

use quipu_xml::{c14n::canonicalize, digest::sha256_b64};

use crate::{Error, Result};

/// Extract the base64 `ds:DigestValue` embedded in a signed document.
pub fn extract_digest_value(signed_xml: &str) -> Result<String> {
  const OPEN: &str = "<ds:DigestValue>";
  const CLOSE: &str = "</ds:DigestValue>";
  let start = signed_xml
    .find(OPEN)
    .ok_or_else(|| Error::signature_failed(quipu_xml::Error::MissingSignature))?
    + OPEN.len();
  let end = signed_xml[start..]
    .find(CLOSE)
    .ok_or_else(|| Error::signature_failed(quipu_xml::Error::MissingSignature))?
    + start;
  Ok(signed_xml[start..end].trim().to_string())
}

/// Remove the enveloped `ds:Signature` element, leaving the rest untouched.
pub fn strip_signature(signed_xml: &str) -> Result<String> {
  const OPEN: &str = "<ds:Signature ";
  const CLOSE: &str = "</ds:Signature>";
  let start = signed_xml
    .find(OPEN)
    .ok_or_else(|| Error::signature_failed(quipu_xml::Error::MissingSignature))?;
  let end = signed_xml[start..]
    .find(CLOSE)
    .ok_or_else(|| Error::signature_failed(quipu_xml::Error::MissingSignature))?
    + start
    + CLOSE.len();
  Ok(format!("{}{}", &signed_xml[..start], &signed_xml[end..]))
}

/// Digest-only round-trip check: `true` when the recomputed digest over the
/// signature-stripped canonical form equals the stored `DigestValue`.
pub fn verify_digest(signed_xml: &str) -> Result<bool> {
  let stored = extract_digest_value(signed_xml)?;
  let stripped = strip_signature(signed_xml)?;
  let canonical = canonicalize(&stripped).map_err(Error::signature_failed)?;
  Ok(sha256_b64(canonical.as_bytes()) == stored)
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use quipu_core::{
    document::{DocumentKind, DocumentNumber, Money},
    payload::{
      FiscalPayload, LineItem, Party, PartyId, PartyIdKind, TaxCategory, Totals,
    },
    settings::CertBundle,
  };
  use quipu_xml::render::render;

  use super::*;
  use crate::{CertificateMaterial, sign_document};

  fn signed_invoice() -> String {
    let payload = FiscalPayload {
      kind:      DocumentKind::Invoice,
      number:    DocumentNumber::new("F001", 9),
      issuer:    Party {
        id:      PartyId::new(PartyIdKind::Ruc, "20100070970"),
        name:    "Comercial Andina S.A.C.".into(),
        address: None,
      },
      customer:  Party {
        id:      PartyId::new(PartyIdKind::Ruc, "20506397815"),
        name:    "Cliente Corporativo S.A.".into(),
        address: None,
      },
      lines:     vec![LineItem {
        description:    "Widget".into(),
        quantity_milli: 1_000,
        unit_price:     Money(5000),
        subtotal:       Money(5000),
        tax_category:   TaxCategory::Standard,
      }],
      totals:    Totals {
        taxable:  Money(5000),
        tax:      Money(900),
        total:    Money(5900),
        currency: "PEN".into(),
      },
      issued_at: Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 0).unwrap(),
      reference: None,
    };
    let unsigned = render(&payload).unwrap();
    let material = CertificateMaterial::load(Some(&CertBundle {
      pem:        include_str!("../testdata/test_bundle.pem").into(),
      passphrase: "test-passphrase".into(),
    }))
    .unwrap();
    let now = Utc.with_ymd_and_hms(2027, 6, 1, 12, 0, 0).unwrap();
    sign_document(&unsigned, &material, now).unwrap().xml
  }

  #[test]
  fn round_trip_digest_check_passes() {
    assert!(verify_digest(&signed_invoice()).unwrap());
  }

  #[test]
  fn tampered_content_fails_the_check() {
    let tampered = signed_invoice().replace("5900", "5901");
    assert!(!verify_digest(&tampered).unwrap());
  }

  #[test]
  fn unsigned_document_is_an_error() {
    assert!(verify_digest("<Invoice></Invoice>").is_err());
  }

  #[test]
  fn strip_removes_only_the_signature() {
    let signed = signed_invoice();
    let stripped = strip_signature(&signed).unwrap();
    assert!(!stripped.contains("ds:SignatureValue"));
    assert!(stripped.contains("<cbc:ID>F001-9</cbc:ID>"));
    assert!(stripped.contains("<ext:ExtensionContent>"));
  }
}
