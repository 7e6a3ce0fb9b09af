//! Login digest computation.
//!
//! Devices exist in two authentication generations. Irreversible devices
//! store a salted hash of `username + salt + password` and expect the
//! challenge to be mixed in after that first hash; older devices expect the
//! challenge appended to the hashed password before any extra rounds.

use sha2::{Digest, Sha256};

/// Parameters handed out by the capabilities query for one login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChallenge {
    /// Session id to echo back in the login request.
    pub session_id: String,

    /// Server nonce.
    pub challenge: String,

    /// Total number of hash applications the device expects.
    pub iterations: i64,

    /// Whether the device stores an irreversible salted hash.
    pub is_irreversible: bool,

    /// Salt for irreversible devices, possibly empty.
    pub salt: String,
}

/// Lowercase hex SHA-256 of the UTF-8 bytes of `input`.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Computes the digest submitted in place of the password.
pub fn compute_digest(challenge: &SessionChallenge, username: &str, password: &str) -> String {
    if challenge.is_irreversible {
        let first = sha256_hex(&format!("{username}{}{password}", challenge.salt));
        let digest = sha256_hex(&format!("{first}{}", challenge.challenge));
        rehash(digest, challenge.iterations - 2)
    } else {
        let digest = format!("{}{}", sha256_hex(password), challenge.challenge);
        rehash(digest, challenge.iterations - 1)
    }
}

fn rehash(mut digest: String, rounds: i64) -> String {
    for _ in 0..rounds.max(0) {
        digest = sha256_hex(&digest);
    }
    digest
}
