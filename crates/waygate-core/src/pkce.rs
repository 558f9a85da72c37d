//! PKCE (RFC 7636) verifier/challenge helpers.
//!
//! Only the `S256` method is supported; `plain` is rejected at ingest and
//! never reaches verification.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Minimum code-verifier length per RFC 7636 §4.1.
pub const VERIFIER_MIN_LEN: usize = 43;

/// Maximum code-verifier length per RFC 7636 §4.1.
pub const VERIFIER_MAX_LEN: usize = 128;

/// Compute the S256 code challenge for a verifier:
/// `base64url(SHA256(verifier))`, unpadded.
#[must_use]
pub fn challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Verify a code verifier against a stored S256 challenge.
///
/// Verifier length is enforced first so undersized or oversized input never
/// reaches the hash comparison.
#[must_use]
pub fn verify_s256(verifier: &str, challenge: &str) -> bool {
    if verifier.len() < VERIFIER_MIN_LEN || verifier.len() > VERIFIER_MAX_LEN {
        return false;
    }
    challenge_s256(verifier) == challenge
}

/// Generate a random 43-character code verifier (base64url of 32 bytes).
///
/// Servers only verify; this exists for clients and for the test suite.
#[must_use]
pub fn generate_verifier() -> String {
    let mut buf = [0u8; 32];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}
