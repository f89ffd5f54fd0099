//! Single-use opaque tokens for email verification and password reset.
//!
//! The raw token only ever leaves the process in an email; the database keeps
//! its SHA-256 digest.

use rand::Rng;
use sha2::{Digest, Sha256};

pub fn generate() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns `(raw, digest)`.
pub fn generate_pair() -> (String, String) {
    let raw = generate();
    let digest = hash_token(&raw);
    (raw, digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_tokens_are_unique_hex() {
        let a = generate();
        let b = generate();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_is_stable_and_differs_from_raw() {
        let (raw, digest) = generate_pair();
        assert_eq!(hash_token(&raw), digest);
        assert_ne!(raw, digest);
    }
}
