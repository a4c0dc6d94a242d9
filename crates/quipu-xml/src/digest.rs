//! SHA-256 digest helpers shared by the signer, the verifier, and the
//! content-hash/QR computation.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use sha2::{Digest, Sha256};

/// Base64 SHA-256, the form used by `ds:DigestValue`.
pub fn sha256_b64(bytes: &[u8]) -> String {
  B64.encode(Sha256::digest(bytes))
}

/// Hex SHA-256, the form used for stored content hashes.
pub fn sha256_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn known_vector() {
    // SHA-256("abc")
    assert_eq!(
      sha256_hex(b"abc"),
      "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert_eq!(sha256_b64(b"abc"), "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=");
  }

  #[test]
  fn deterministic() {
    assert_eq!(sha256_b64(b"payload"), sha256_b64(b"payload"));
    assert_ne!(sha256_b64(b"payload"), sha256_b64(b"payloae"));
  }
}
