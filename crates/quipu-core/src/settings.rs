//! Per-tenant fiscal configuration.
//!
//! Resolved by a [`SettingsSource`](crate::hooks::SettingsSource) — the
//! pipeline never reads configuration storage directly. Secret references
//! arrive already resolved; the structs here hold material, not pointers.

use serde::{Deserialize, Serialize};

// ─── Environment ─────────────────────────────────────────────────────────────

/// Which remote authority endpoint a tenant talks to.
///
/// Switching a tenant from sandbox to production is a deliberate, audited
/// configuration change — never inferred from anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
  /// Non-binding endpoint for integration testing.
  Sandbox,
  Production,
}

impl Environment {
  pub fn discriminant(self) -> &'static str {
    match self {
      Self::Sandbox => "sandbox",
      Self::Production => "production",
    }
  }
}

// ─── Credentials ─────────────────────────────────────────────────────────────

/// Remote-service login, scoped to one environment.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
  pub username: String,
  pub password: String,
}

// Credentials never appear in logs or debug output.
impl std::fmt::Debug for ClientCredentials {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ClientCredentials")
      .field("username", &self.username)
      .field("password", &"<redacted>")
      .finish()
  }
}

// ─── TenantFiscalSettings ────────────────────────────────────────────────────

/// Everything the pipeline needs to act on behalf of one tenant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TenantFiscalSettings {
  pub tax_id:        String,
  pub business_name: String,
  pub address:       Option<String>,
  pub environment:   Environment,
  /// PEM bundle: encrypted PKCS#8 private key + certificate.
  pub cert_bundle:   Option<CertBundle>,
  pub credentials:   ClientCredentials,
  pub enabled:       bool,
}

/// The encrypted signing-key bundle and its passphrase.
#[derive(Clone, Serialize, Deserialize)]
pub struct CertBundle {
  pub pem:        String,
  pub passphrase: String,
}

impl std::fmt::Debug for CertBundle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CertBundle")
      .field("pem", &format!("<{} bytes>", self.pem.len()))
      .field("passphrase", &"<redacted>")
      .finish()
  }
}
