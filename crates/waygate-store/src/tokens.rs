//! First-party bearer token storage (component C5).
//!
//! Tokens are opaque UUID handles under `api-token:<uuid>` with a 24-hour
//! TTL. Uniqueness is enforced with conditional-set-if-absent and a
//! bounded retry. Revocation is a single delete; per-session operations
//! cursor-scan the namespace in 100-key batches, which is O(N) over live
//! tokens and reserved for operator actions.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use waygate_core::constants::{API_TOKEN_PREFIX, BEARER_TOKEN_TTL_MS};
use waygate_core::redact::mask_token;
use waygate_core::{BearerTokenRecord, TokenMetadata};

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::kv::Kv;

/// Uniqueness retry budget.
const GENERATE_MAX_ATTEMPTS: u32 = 3;

/// Scan batch size for per-session operations.
const SCAN_BATCH: usize = 100;

/// Bearer token store.
pub struct BearerTokenStore {
    kv: Arc<dyn Kv>,
    clock: Arc<dyn Clock>,
}

impl BearerTokenStore {
    /// Build a store.
    #[must_use]
    pub fn new(kv: Arc<dyn Kv>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    fn key(token: &str) -> String {
        format!("{API_TOKEN_PREFIX}{token}")
    }

    /// Mint a token for a session.
    pub async fn generate(&self, session_id: &str) -> Result<String, StoreError> {
        self.generate_with(session_id, || Uuid::new_v4().to_string())
            .await
    }

    /// Mint a token using a caller-supplied generator. Exists so tests can
    /// force collisions.
    pub async fn generate_with(
        &self,
        session_id: &str,
        mut mint: impl FnMut() -> String + Send,
    ) -> Result<String, StoreError> {
        for attempt in 1..=GENERATE_MAX_ATTEMPTS {
            let token = mint();
            let now = self.clock.now_ms();
            let record = BearerTokenRecord {
                token: token.clone(),
                session_id: session_id.to_string(),
                created_at: now,
                expires_at: now + BEARER_TOKEN_TTL_MS,
            };
            let json = serde_json::to_string(&record)?;
            if self
                .kv
                .set_nx_ex(&Self::key(&token), &json, BEARER_TOKEN_TTL_MS)
                .await?
            {
                debug!(token = %mask_token(&token), session_id, "bearer token issued");
                return Ok(token);
            }
            warn!(attempt, "bearer token collision, regenerating");
        }
        Err(StoreError::Generation {
            attempts: GENERATE_MAX_ATTEMPTS,
        })
    }

    /// Validate a token and resolve its owning session.
    ///
    /// Returns `None` when the token is missing or expired. A token whose
    /// stored `expiresAt` has passed (possible when the key TTL outlives
    /// the audit field) is revoked as a side effect.
    pub async fn validate(&self, token: &str) -> Result<Option<String>, StoreError> {
        let Some(raw) = self.kv.get(&Self::key(token)).await? else {
            return Ok(None);
        };
        let record: BearerTokenRecord = serde_json::from_str(&raw)?;
        if record.expires_at <= self.clock.now_ms() {
            info!(
                audit = true,
                event = "token_revoked",
                token = %mask_token(token),
                reason = "expired_at_validation",
                "bearer token expired"
            );
            let _ = self.kv.delete(&Self::key(token)).await?;
            return Ok(None);
        }
        Ok(Some(record.session_id))
    }

    /// Revoke one token. Returns whether it existed.
    pub async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        let removed = self.kv.delete(&Self::key(token)).await?;
        if removed {
            info!(
                audit = true,
                event = "token_revoked",
                token = %mask_token(token),
                reason = "explicit",
                "bearer token revoked"
            );
        }
        Ok(removed)
    }

    /// Revoke every token owned by a session. Returns how many were
    /// removed. Callers must rate-limit: this scans all live tokens.
    pub async fn revoke_for_session(&self, session_id: &str) -> Result<usize, StoreError> {
        let mut removed = 0;
        for record in self.session_records(session_id).await? {
            if self.kv.delete(&Self::key(&record.token)).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(
                audit = true,
                event = "token_revoked",
                session_id,
                count = removed,
                reason = "session_bulk",
                "bearer tokens revoked for session"
            );
        }
        Ok(removed)
    }

    /// List display metadata for a session's tokens.
    pub async fn list_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<TokenMetadata>, StoreError> {
        Ok(self
            .session_records(session_id)
            .await?
            .iter()
            .map(TokenMetadata::from_record)
            .collect())
    }

    /// Read a token's full record.
    pub async fn get_data(&self, token: &str) -> Result<Option<BearerTokenRecord>, StoreError> {
        match self.kv.get(&Self::key(token)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Sweep tokens whose audit expiry has passed. Returns how many were
    /// removed.
    pub async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_ms();
        let mut removed = 0;
        for key in self.scan_keys().await? {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            let expired = serde_json::from_str::<BearerTokenRecord>(&raw)
                .map_or(true, |r| r.expires_at <= now);
            if expired && self.kv.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Count live tokens.
    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.scan_keys().await?.len())
    }

    async fn scan_keys(&self) -> Result<Vec<String>, StoreError> {
        self.kv
            .scan(&format!("{API_TOKEN_PREFIX}*"), SCAN_BATCH)
            .await
    }

    async fn session_records(
        &self,
        session_id: &str,
    ) -> Result<Vec<BearerTokenRecord>, StoreError> {
        let mut records = Vec::new();
        for key in self.scan_keys().await? {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            if let Ok(record) = serde_json::from_str::<BearerTokenRecord>(&raw) {
                if record.session_id == session_id {
                    records.push(record);
                }
            }
        }
        Ok(records)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
