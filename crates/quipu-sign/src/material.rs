//! Parsing the encrypted certificate bundle into usable key material.
//!
//! The bundle is a PEM file carrying an `ENCRYPTED PRIVATE KEY` block
//! (PKCS#8, PBES2) and a `CERTIFICATE` block. Decryption happens here and
//! nowhere else; the passphrase is dropped as soon as the key is derived.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chrono::{DateTime, Utc};
use rsa::{RsaPrivateKey, pkcs8::DecodePrivateKey as _};
use x509_cert::{
  Certificate,
  der::{DecodePem as _, Encode as _},
};

use quipu_core::settings::CertBundle;

use crate::{Error, Result};

// ─── CertificateMaterial ─────────────────────────────────────────────────────

/// Parsed signing material for one tenant. In-memory only; never persisted,
/// never logged, never shared across tenants.
pub struct CertificateMaterial {
  private_key:    RsaPrivateKey,
  cert_der:       Vec<u8>,
  pub not_before: DateTime<Utc>,
  pub not_after:  DateTime<Utc>,
}

// Key material must not leak through debug formatting.
impl std::fmt::Debug for CertificateMaterial {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CertificateMaterial")
      .field("not_before", &self.not_before)
      .field("not_after", &self.not_after)
      .finish_non_exhaustive()
  }
}

impl CertificateMaterial {
  /// Parse and decrypt a tenant's bundle. `None` means the tenant never
  /// configured one.
  pub fn load(bundle: Option<&CertBundle>) -> Result<Self> {
    let bundle = bundle.ok_or(Error::NotConfigured)?;

    let key_block = extract_pem_block(&bundle.pem, "ENCRYPTED PRIVATE KEY")
      .ok_or_else(|| Error::Malformed("bundle contains no private key".into()))?;
    let cert_block = extract_pem_block(&bundle.pem, "CERTIFICATE")
      .ok_or_else(|| Error::Malformed("bundle contains no certificate".into()))?;

    // Any failure past the armor check is a decryption failure: PBES2 has no
    // password-specific error, a wrong passphrase just yields garbage DER.
    let private_key = RsaPrivateKey::from_pkcs8_encrypted_pem(
      &key_block,
      bundle.passphrase.as_bytes(),
    )
    .map_err(|_| Error::InvalidPassword)?;

    let certificate = Certificate::from_pem(cert_block.as_bytes())
      .map_err(|e| Error::Malformed(format!("certificate: {e}")))?;

    let validity = &certificate.tbs_certificate.validity;
    let not_before =
      DateTime::<Utc>::from(validity.not_before.to_system_time());
    let not_after = DateTime::<Utc>::from(validity.not_after.to_system_time());

    let cert_der = certificate
      .to_der()
      .map_err(|e| Error::Malformed(format!("certificate DER: {e}")))?;

    Ok(Self { private_key, cert_der, not_before, not_after })
  }

  /// Mandatory before every signing operation, not just at load time.
  pub fn ensure_valid_at(&self, now: DateTime<Utc>) -> Result<()> {
    if now < self.not_before {
      return Err(Error::NotYetValid(self.not_before));
    }
    if now > self.not_after {
      return Err(Error::Expired(self.not_after));
    }
    Ok(())
  }

  pub fn private_key(&self) -> &RsaPrivateKey { &self.private_key }

  /// Certificate body as it appears in `ds:X509Certificate`: DER, base64,
  /// PEM armor stripped.
  pub fn cert_b64(&self) -> String { B64.encode(&self.cert_der) }
}

// ─── PEM helpers ─────────────────────────────────────────────────────────────

/// Extract one armored block (`-----BEGIN <label>-----` … END) from a PEM
/// file that may contain several.
fn extract_pem_block(pem: &str, label: &str) -> Option<String> {
  let begin = format!("-----BEGIN {label}-----");
  let end = format!("-----END {label}-----");
  let start = pem.find(&begin)?;
  let stop = pem[start..].find(&end)? + start + end.len();
  Some(pem[start..stop].to_string())
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  const BUNDLE_PEM: &str = include_str!("../testdata/test_bundle.pem");

  fn bundle(passphrase: &str) -> CertBundle {
    CertBundle { pem: BUNDLE_PEM.into(), passphrase: passphrase.into() }
  }

  #[test]
  fn loads_with_correct_passphrase() {
    let material = CertificateMaterial::load(Some(&bundle("test-passphrase")))
      .expect("bundle should load");
    assert!(!material.cert_b64().is_empty());
    assert!(material.not_before < material.not_after);
  }

  #[test]
  fn missing_bundle_is_not_configured() {
    assert!(matches!(
      CertificateMaterial::load(None),
      Err(Error::NotConfigured)
    ));
  }

  #[test]
  fn wrong_passphrase_is_invalid_password() {
    assert!(matches!(
      CertificateMaterial::load(Some(&bundle("nope"))),
      Err(Error::InvalidPassword)
    ));
  }

  #[test]
  fn bundle_without_key_is_malformed() {
    let only_cert = extract_pem_block(BUNDLE_PEM, "CERTIFICATE").unwrap();
    let b = CertBundle { pem: only_cert, passphrase: "test-passphrase".into() };
    assert!(matches!(
      CertificateMaterial::load(Some(&b)),
      Err(Error::Malformed(_))
    ));
  }

  #[test]
  fn bundle_without_cert_is_malformed() {
    let only_key =
      extract_pem_block(BUNDLE_PEM, "ENCRYPTED PRIVATE KEY").unwrap();
    let b = CertBundle { pem: only_key, passphrase: "test-passphrase".into() };
    assert!(matches!(
      CertificateMaterial::load(Some(&b)),
      Err(Error::Malformed(_))
    ));
  }

  #[test]
  fn validity_window_is_enforced() {
    let material =
      CertificateMaterial::load(Some(&bundle("test-passphrase"))).unwrap();

    let past = Utc.with_ymd_and_hms(1990, 1, 1, 0, 0, 0).unwrap();
    assert!(matches!(
      material.ensure_valid_at(past),
      Err(Error::NotYetValid(_))
    ));

    let far_future = Utc.with_ymd_and_hms(2200, 1, 1, 0, 0, 0).unwrap();
    assert!(matches!(
      material.ensure_valid_at(far_future),
      Err(Error::Expired(_))
    ));

    let inside = material.not_before + chrono::Duration::days(1);
    assert!(material.ensure_valid_at(inside).is_ok());
  }

  #[test]
  fn debug_output_redacts_key_material() {
    let material =
      CertificateMaterial::load(Some(&bundle("test-passphrase"))).unwrap();
    let debug = format!("{material:?}");
    assert!(debug.contains("not_after"));
    assert!(!debug.contains("PrivateKey"));
  }
}
