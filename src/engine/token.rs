//! Approval tokens: single-use bearer credentials embedded in action links.
//!
//! 32 random bytes from the OS CSPRNG, base64url without padding. Only the
//! SHA-256 digest is persisted.

use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 32;

/// A freshly issued plaintext token. Not `Debug`/`Serialize` so it cannot
/// end up in logs by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct ApprovalToken(String);

impl ApprovalToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        Self(engine.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> String {
        hash_token(&self.0)
    }
}

/// Hex SHA-256 digest of a token as it is stored.
pub fn hash_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)
}

/// Constant-time check of a presented token against a stored digest.
pub fn verify_token(token: &str, stored_hash: &str) -> bool {
    let presented = hash_token(token);
    presented.as_bytes().ct_eq(stored_hash.as_bytes()).into()
}

/// Short, non-reversible prefix of the digest for log correlation.
pub fn log_fingerprint(token: &str) -> String {
    hash_token(token)[..8].to_string()
}
