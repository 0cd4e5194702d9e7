//! Per-attempt authorization secrets
//!
//! The hub is a public OAuth client: every authorization URL it hands
//! out carries an S256 code challenge (RFC 7636) and a CSRF state
//! binding the eventual callback to the attempt that produced it. The
//! hub only ever generates this material; verification is the
//! authorization server's job.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Ephemeral secrets for one authorization round-trip. Lives exactly
/// as long as the pending flow that created it.
#[derive(Debug, Clone)]
pub struct PkceAttempt {
    verifier: String,
    challenge: String,
    csrf_state: String,
}

impl PkceAttempt {
    /// Challenge method advertised in the authorization URL.
    pub const CHALLENGE_METHOD: &'static str = "S256";

    pub fn new() -> Self {
        let verifier = random_token(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
            csrf_state: random_token(16),
        }
    }

    /// The secret proof, released only for the token exchange.
    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    /// Public digest of the verifier, sent in the authorization URL.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// State parameter the callback must echo back.
    pub fn csrf_state(&self) -> &str {
        &self.csrf_state
    }
}

impl Default for PkceAttempt {
    fn default() -> Self {
        Self::new()
    }
}

/// Base64url-encoded random bytes.
fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_is_the_s256_digest_of_the_verifier() {
        let attempt = PkceAttempt::new();
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(attempt.verifier().as_bytes()));
        assert_eq!(attempt.challenge(), expected);
    }

    #[test]
    fn verifier_satisfies_rfc_length_bounds() {
        // RFC 7636 requires 43..=128 characters.
        let attempt = PkceAttempt::new();
        assert!((43..=128).contains(&attempt.verifier().len()));
    }

    #[test]
    fn attempts_do_not_share_secrets() {
        let a = PkceAttempt::new();
        let b = PkceAttempt::new();
        assert_ne!(a.verifier(), b.verifier());
        assert_ne!(a.challenge(), b.challenge());
        assert_ne!(a.csrf_state(), b.csrf_state());
    }
}
