//! # waygate-secrets
//!
//! Provider for the 256-bit data-encryption key used by the token cipher.
//!
//! The key lives in an external secret store as a JSON object with a hex
//! `key` field. Fetches are cached in memory for a bounded window (default
//! 5 minutes). Outside production, an environment-provided key bypasses the
//! remote store entirely, and a failed fetch falls back to it; in
//! production a fetch failure propagates.
//!
//! Every key access emits an `encryption_key_accessed` audit record with
//! the source and a hash fingerprint, never the key itself.

#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{info, warn};

use waygate_core::redact::key_fingerprint;
use waygate_settings::SecretsSettings;

/// Errors from key retrieval.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// Remote store request failed.
    #[error("secret fetch failed: {0}")]
    Fetch(String),

    /// Secret payload was not the expected JSON shape.
    #[error("secret payload malformed: {0}")]
    Malformed(String),

    /// The `key` field was not valid hex for 32 bytes.
    #[error("encryption key must be 64 hex chars (32 bytes)")]
    BadKey,

    /// No key available from any source.
    #[error("no encryption key configured")]
    NotConfigured,
}

/// Where a key ultimately came from, for the audit log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeySource {
    /// Remote secret store.
    Remote,
    /// Environment variable (dev bypass or fallback).
    Env,
    /// The in-memory cache.
    Cache,
}

/// Abstraction over the remote secret store.
///
/// The production implementation is a plain HTTPS JSON endpoint; tests
/// stand one up with wiremock.
#[async_trait]
pub trait SecretFetcher: Send + Sync {
    /// Fetch the named secret's raw string payload.
    async fn fetch(&self, name: &str) -> Result<String, SecretError>;
}

/// HTTP secret fetcher: `GET {endpoint}/{region}/{name}`.
pub struct HttpSecretFetcher {
    client: reqwest::Client,
    endpoint: String,
    region: String,
}

impl HttpSecretFetcher {
    /// Build a fetcher against the configured endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, region: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            region: region.into(),
        }
    }
}

#[async_trait]
impl SecretFetcher for HttpSecretFetcher {
    async fn fetch(&self, name: &str) -> Result<String, SecretError> {
        let url = format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.region,
            name
        );
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SecretError::Fetch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SecretError::Fetch(format!(
                "secret store returned {}",
                resp.status()
            )));
        }
        resp.text()
            .await
            .map_err(|e| SecretError::Fetch(e.to_string()))
    }
}

/// Expected secret payload shape.
#[derive(Deserialize)]
struct SecretPayload {
    key: String,
}

struct CachedKey {
    key: [u8; 32],
    fetched_at: Instant,
}

/// Cached provider for the data-encryption key.
pub struct SecretProvider {
    fetcher: Arc<dyn SecretFetcher>,
    settings: SecretsSettings,
    production: bool,
    cache: Mutex<Option<CachedKey>>,
}

impl SecretProvider {
    /// Build a provider from settings, using the HTTP fetcher.
    #[must_use]
    pub fn new(settings: SecretsSettings, production: bool) -> Self {
        let fetcher = Arc::new(HttpSecretFetcher::new(
            settings.endpoint.clone(),
            settings.region.clone(),
        ));
        Self::with_fetcher(fetcher, settings, production)
    }

    /// Build a provider with a custom fetcher (tests).
    #[must_use]
    pub fn with_fetcher(
        fetcher: Arc<dyn SecretFetcher>,
        settings: SecretsSettings,
        production: bool,
    ) -> Self {
        Self {
            fetcher,
            settings,
            production,
            cache: Mutex::new(None),
        }
    }

    /// Resolve the 32-byte data-encryption key.
    ///
    /// Checks the cache, then the dev env bypass, then the remote store.
    /// Outside production a remote failure falls back to the env key.
    pub async fn data_key(&self) -> Result<[u8; 32], SecretError> {
        if let Some(key) = self.cached_key() {
            audit_key_access(KeySource::Cache, &key, true);
            return Ok(key);
        }

        // Dev-mode bypass: env key wins outside production.
        if !self.production {
            if let Some(key) = self.env_key()? {
                audit_key_access(KeySource::Env, &key, true);
                self.store_cache(key);
                return Ok(key);
            }
        }

        match self.fetch_remote().await {
            Ok(key) => {
                audit_key_access(KeySource::Remote, &key, true);
                self.store_cache(key);
                Ok(key)
            }
            Err(e) if !self.production => {
                warn!(error = %e, "secret fetch failed, trying env fallback");
                match self.env_key()? {
                    Some(key) => {
                        audit_key_access(KeySource::Env, &key, true);
                        self.store_cache(key);
                        Ok(key)
                    }
                    None => Err(e),
                }
            }
            Err(e) => {
                tracing::error!(audit = true, event = "encryption_key_accessed", success = false, error = %e, "key fetch failed in production");
                Err(e)
            }
        }
    }

    /// Drop any cached key. Exposed for tests and key rotation.
    pub fn clear_cache(&self) {
        *self.cache.lock() = None;
    }

    fn cached_key(&self) -> Option<[u8; 32]> {
        let guard = self.cache.lock();
        let cached = guard.as_ref()?;
        let ttl = Duration::from_secs(self.settings.cache_ttl_secs);
        if cached.fetched_at.elapsed() < ttl {
            Some(cached.key)
        } else {
            None
        }
    }

    fn store_cache(&self, key: [u8; 32]) {
        *self.cache.lock() = Some(CachedKey {
            key,
            fetched_at: Instant::now(),
        });
    }

    fn env_key(&self) -> Result<Option<[u8; 32]>, SecretError> {
        match &self.settings.env_key {
            Some(hex) => decode_hex_key(hex).map(Some),
            None => Ok(None),
        }
    }

    async fn fetch_remote(&self) -> Result<[u8; 32], SecretError> {
        if self.settings.endpoint.is_empty() {
            return Err(SecretError::NotConfigured);
        }
        let raw = self.fetcher.fetch(&self.settings.secret_name).await?;
        let payload: SecretPayload =
            serde_json::from_str(&raw).map_err(|e| SecretError::Malformed(e.to_string()))?;
        decode_hex_key(&payload.key)
    }
}

/// Decode a 64-char hex string into a 32-byte key.
fn decode_hex_key(hex: &str) -> Result<[u8; 32], SecretError> {
    if hex.len() != 64 {
        return Err(SecretError::BadKey);
    }
    let mut key = [0u8; 32];
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        let s = std::str::from_utf8(chunk).map_err(|_| SecretError::BadKey)?;
        key[i] = u8::from_str_radix(s, 16).map_err(|_| SecretError::BadKey)?;
    }
    Ok(key)
}

fn audit_key_access(source: KeySource, key: &[u8; 32], success: bool) {
    info!(
        audit = true,
        event = "encryption_key_accessed",
        source = ?source,
        fingerprint = %key_fingerprint(key),
        success,
        "encryption key accessed"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
