//! The enveloped XML-DSig signer.
//!
//! The step order below is interoperability-critical: the authority's
//! validator re-derives the digest from the canonical form of the document
//! with the signature excluded, so the bytes digested here must be exactly
//! the bytes it will reconstruct.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use rsa::signature::{SignatureEncoding as _, Signer as _};
use sha2::Sha256;

use quipu_xml::{
  c14n::canonicalize,
  digest::{sha256_b64, sha256_hex},
  render::{NS_DS, SIGNATURE_PLACEHOLDER},
};

use crate::{Error, Result, material::CertificateMaterial};

// ─── Algorithm identifiers ───────────────────────────────────────────────────

const ALG_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
const ALG_RSA_SHA256: &str =
  "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const ALG_ENVELOPED: &str =
  "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";

// ─── Output ──────────────────────────────────────────────────────────────────

/// The atomic result of a successful signing run.
#[derive(Debug, Clone)]
pub struct SignedDocument {
  /// Final document with the `ds:Signature` element spliced in.
  pub xml:          String,
  /// Base64 SHA-256 digest stored in `ds:DigestValue`.
  pub digest_b64:   String,
  /// Hex SHA-256 over the final signed bytes.
  pub content_hash: String,
}

// ─── Signing ─────────────────────────────────────────────────────────────────

/// Sign `unsigned_xml` (as produced by the generator, placeholder included).
///
/// Validity of the certificate is re-checked against `now` on every call.
/// Any step failure surfaces as [`Error::SignatureFailed`] and leaves no
/// partial artifact behind.
pub fn sign_document(
  unsigned_xml: &str,
  material: &CertificateMaterial,
  now: DateTime<Utc>,
) -> Result<SignedDocument> {
  material.ensure_valid_at(now)?;

  // 1. Remove the placeholder so the digested form matches what a validator
  //    reconstructs by stripping the signature.
  if !unsigned_xml.contains(SIGNATURE_PLACEHOLDER) {
    return Err(Error::signature_failed(quipu_xml::Error::MissingPlaceholder));
  }
  let without_placeholder = unsigned_xml.replacen(SIGNATURE_PLACEHOLDER, "", 1);

  // 2–3. Canonicalize and digest.
  let canonical =
    canonicalize(&without_placeholder).map_err(Error::signature_failed)?;
  let digest_b64 = sha256_b64(canonical.as_bytes());

  // 4. SignedInfo referencing the digest.
  let signed_info = build_signed_info(&digest_b64);

  // 5. Canonicalize SignedInfo the same way, then sign its bytes.
  let canonical_si =
    canonicalize(&signed_info).map_err(Error::signature_failed)?;
  let signing_key =
    rsa::pkcs1v15::SigningKey::<Sha256>::new(material.private_key().clone());
  let signature = signing_key
    .try_sign(canonical_si.as_bytes())
    .map_err(Error::signature_failed)?;
  let signature_b64 = B64.encode(signature.to_vec());

  // 6. Assemble the full signature element.
  let signature_element =
    build_signature_element(&signed_info, &signature_b64, &material.cert_b64());

  // 7. Splice at the placeholder's position in the *original* document.
  let signed_xml =
    unsigned_xml.replacen(SIGNATURE_PLACEHOLDER, &signature_element, 1);

  // 8. Content hash over the final bytes.
  let content_hash = sha256_hex(signed_xml.as_bytes());

  Ok(SignedDocument { xml: signed_xml, digest_b64, content_hash })
}

/// `ds:SignedInfo`, carrying its own namespace declaration so it can be
/// canonicalized standalone and extracted verbatim later.
fn build_signed_info(digest_b64: &str) -> String {
  format!(
    concat!(
      "<ds:SignedInfo xmlns:ds=\"{ns}\">",
      "<ds:CanonicalizationMethod Algorithm=\"{c14n}\"></ds:CanonicalizationMethod>",
      "<ds:SignatureMethod Algorithm=\"{sig}\"></ds:SignatureMethod>",
      "<ds:Reference URI=\"\">",
      "<ds:Transforms>",
      "<ds:Transform Algorithm=\"{env}\"></ds:Transform>",
      "</ds:Transforms>",
      "<ds:DigestMethod Algorithm=\"{dig}\"></ds:DigestMethod>",
      "<ds:DigestValue>{value}</ds:DigestValue>",
      "</ds:Reference>",
      "</ds:SignedInfo>"
    ),
    ns = NS_DS,
    c14n = ALG_C14N,
    sig = ALG_RSA_SHA256,
    env = ALG_ENVELOPED,
    dig = ALG_SHA256,
    value = digest_b64,
  )
}

fn build_signature_element(
  signed_info: &str,
  signature_b64: &str,
  cert_b64: &str,
) -> String {
  format!(
    concat!(
      "<ds:Signature xmlns:ds=\"{ns}\" Id=\"SignatureSP\">",
      "{signed_info}",
      "<ds:SignatureValue>{signature}</ds:SignatureValue>",
      "<ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>",
      "</ds:Signature>"
    ),
    ns = NS_DS,
    signed_info = signed_info,
    signature = signature_b64,
    cert = cert_b64,
  )
}
