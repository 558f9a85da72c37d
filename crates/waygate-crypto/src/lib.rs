//! # waygate-crypto
//!
//! AES-256-GCM cipher for OAuth token payloads stored inside sessions.
//!
//! Wire layout is `IV(12B) ‖ AUTH_TAG(16B) ‖ CIPHERTEXT`, base64-encoded.
//! A fresh random IV is drawn for every encryption. GCM authentication
//! means a tampered record in Redis fails decryption instead of silently
//! poisoning a session.

#![deny(unsafe_code)]

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

use waygate_core::OAuthTokens;

/// GCM nonce length in bytes.
const IV_LEN: usize = 12;

/// GCM authentication tag length in bytes.
const TAG_LEN: usize = 16;

/// Errors from cipher operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Key material is not 32 bytes.
    #[error("encryption key must be 32 bytes, got {0}")]
    BadKeyLength(usize),

    /// Ciphertext is not valid base64 or too short to hold IV + tag.
    #[error("malformed ciphertext")]
    Malformed,

    /// AES-GCM encryption failed (plaintext too large).
    #[error("encryption failed")]
    EncryptFailed,

    /// GCM authentication failed (wrong key or tampered data).
    #[error("decryption failed")]
    DecryptFailed,

    /// Token payload could not be (de)serialized.
    #[error("token serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// AES-256-GCM cipher bound to a single 32-byte data-encryption key.
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Build a cipher from a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        let cipher =
            Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::BadKeyLength(key.len()))?;
        Ok(Self { cipher })
    }

    /// Encrypt arbitrary bytes. Returns base64 of `IV ‖ TAG ‖ CT`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        // aes-gcm appends the tag to the ciphertext; re-arrange to the
        // IV ‖ TAG ‖ CT wire layout.
        let sealed = self
            .cipher
            .encrypt(nonce, Payload::from(plaintext))
            .map_err(|_| CryptoError::EncryptFailed)?;
        let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut out = Vec::with_capacity(IV_LEN + TAG_LEN + ct.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(tag);
        out.extend_from_slice(ct);
        Ok(STANDARD.encode(out))
    }

    /// Decrypt base64 of `IV ‖ TAG ‖ CT` back into plaintext bytes.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = STANDARD.decode(encoded).map_err(|_| CryptoError::Malformed)?;
        if raw.len() < IV_LEN + TAG_LEN {
            return Err(CryptoError::Malformed);
        }
        let (iv, rest) = raw.split_at(IV_LEN);
        let (tag, ct) = rest.split_at(TAG_LEN);

        let mut sealed = Vec::with_capacity(ct.len() + TAG_LEN);
        sealed.extend_from_slice(ct);
        sealed.extend_from_slice(tag);

        self.cipher
            .decrypt(Nonce::from_slice(iv), Payload::from(sealed.as_slice()))
            .map_err(|_| CryptoError::DecryptFailed)
    }

    /// Serialize an [`OAuthTokens`] record to JSON and encrypt it.
    pub fn encrypt_tokens(&self, tokens: &OAuthTokens) -> Result<String, CryptoError> {
        let json = serde_json::to_vec(tokens)?;
        self.encrypt(&json)
    }

    /// Decrypt and deserialize an [`OAuthTokens`] record.
    pub fn decrypt_tokens(&self, encoded: &str) -> Result<OAuthTokens, CryptoError> {
        let plain = self.decrypt(encoded)?;
        Ok(serde_json::from_slice(&plain)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
