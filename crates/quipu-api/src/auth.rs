//! HTTP Basic-auth extractor with a standard and an operator credential set.
//!
//! Passwords are stored as argon2 PHC strings; the verified identity maps to
//! a pipeline [`Actor`] whose id is derived deterministically from the
//! username so audit trails stay stable across restarts.

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, request::Parts};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use uuid::Uuid;

use quipu_core::store::{DocumentStore, JobStore};
use quipu_pipeline::{client::TaxAuthorityClient, service::Actor};

use crate::{AppState, error::ApiError};

/// Credentials accepted as valid for this server instance.
#[derive(Clone)]
pub struct AuthConfig {
  pub username:               String,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  pub password_hash:          String,
  pub operator_username:      String,
  pub operator_password_hash: String,
}

/// Present in a handler means the request was authenticated.
pub struct Authenticated(pub Actor);

fn verify(password: &str, phc: &str) -> bool {
  PasswordHash::new(phc)
    .and_then(|hash| Argon2::default().verify_password(password.as_bytes(), &hash))
    .is_ok()
}

fn actor_for(username: &str, operator: bool) -> Actor {
  Actor {
    id: Uuid::new_v5(&Uuid::NAMESPACE_OID, username.as_bytes()),
    operator,
  }
}

/// Verify credentials directly from headers.
pub fn verify_auth(
  headers: &HeaderMap,
  config: &AuthConfig,
) -> Result<Actor, ApiError> {
  let header_val = headers
    .get(axum::http::header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .ok_or(ApiError::Unauthorized)?;

  let encoded = header_val
    .strip_prefix("Basic ")
    .ok_or(ApiError::Unauthorized)?;

  let decoded = B64.decode(encoded).map_err(|_| ApiError::Unauthorized)?;
  let creds = std::str::from_utf8(&decoded).map_err(|_| ApiError::Unauthorized)?;

  let (username, password) = creds.split_once(':').ok_or(ApiError::Unauthorized)?;

  if username == config.operator_username
    && verify(password, &config.operator_password_hash)
  {
    return Ok(actor_for(username, true));
  }
  if username == config.username && verify(password, &config.password_hash) {
    return Ok(actor_for(username, false));
  }
  Err(ApiError::Unauthorized)
}

impl<S, C> FromRequestParts<AppState<S, C>> for Authenticated
where
  S: DocumentStore + JobStore + 'static,
  C: TaxAuthorityClient + 'static,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &AppState<S, C>,
  ) -> Result<Self, Self::Rejection> {
    verify_auth(&parts.headers, &state.auth).map(Authenticated)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use argon2::{PasswordHasher, password_hash::SaltString};
  use axum::http::header;
  use rand_core::OsRng;

  fn hash(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
      .hash_password(password.as_bytes(), &salt)
      .unwrap()
      .to_string()
  }

  fn config() -> AuthConfig {
    AuthConfig {
      username:               "clerk".into(),
      password_hash:          hash("clerk-pw"),
      operator_username:      "ops".into(),
      operator_password_hash: hash("ops-pw"),
    }
  }

  fn headers_with(user: &str, pass: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let value = format!("Basic {}", B64.encode(format!("{user}:{pass}")));
    headers.insert(header::AUTHORIZATION, value.parse().unwrap());
    headers
  }

  #[test]
  fn clerk_credentials_are_not_operator() {
    let actor = verify_auth(&headers_with("clerk", "clerk-pw"), &config()).unwrap();
    assert!(!actor.operator);
  }

  #[test]
  fn operator_credentials_are_operator() {
    let actor = verify_auth(&headers_with("ops", "ops-pw"), &config()).unwrap();
    assert!(actor.operator);
  }

  #[test]
  fn wrong_password_is_unauthorized() {
    assert!(verify_auth(&headers_with("clerk", "wrong"), &config()).is_err());
    assert!(verify_auth(&headers_with("ops", "clerk-pw"), &config()).is_err());
  }

  #[test]
  fn missing_header_is_unauthorized() {
    assert!(verify_auth(&HeaderMap::new(), &config()).is_err());
  }

  #[test]
  fn actor_id_is_stable_per_username() {
    let a = verify_auth(&headers_with("clerk", "clerk-pw"), &config()).unwrap();
    let b = verify_auth(&headers_with("clerk", "clerk-pw"), &config()).unwrap();
    assert_eq!(a.id, b.id);
  }
}
