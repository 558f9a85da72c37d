//! Session storage with encrypted tokens, dual expiry, and optimistic
//! concurrency.
//!
//! Sessions live under `sess:<uuid>` with the absolute TTL on the key.
//! Two expiry rules apply on every read, in order: absolute
//! (`expiresAt < now`), then idle (no access for `idle_ttl_ms`). Either
//! one deletes the record. Upstream OAuth tokens are ciphertext at rest;
//! the plaintext [`Session`] view exists only in process memory.
//!
//! `update` is a compare-and-swap loop: each attempt re-reads the
//! committed record, re-validates expiry against that committed view, and
//! swaps only if no concurrent writer got there first. Three lost races
//! surface as [`StoreError::Conflict`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use waygate_core::constants::{SESSION_IDLE_MS, SESSION_PREFIX, SESSION_TTL_MS};
use waygate_core::{OAuthTokens, Session, SessionId, SessionMetadata};
use waygate_crypto::TokenCipher;

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::kv::Kv;

/// Cleanup scan batch size.
const SCAN_BATCH: usize = 100;

/// CAS retry budget for `update`.
const UPDATE_MAX_RETRIES: u32 = 3;

/// Tunable lifetimes.
#[derive(Clone, Copy, Debug)]
pub struct SessionStoreConfig {
    /// Absolute lifetime from creation (default 4 h).
    pub absolute_ttl_ms: i64,
    /// Idle timeout between reads (default 30 min).
    pub idle_ttl_ms: i64,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            absolute_ttl_ms: SESSION_TTL_MS,
            idle_ttl_ms: SESSION_IDLE_MS,
        }
    }
}

/// Options for [`SessionStore::create`].
#[derive(Clone, Debug, Default)]
pub struct CreateSessionOptions {
    /// Override the absolute TTL (ms).
    pub ttl_ms: Option<i64>,
    /// Metadata recorded at creation.
    pub metadata: SessionMetadata,
}

/// Patch applied by [`SessionStore::update`]. Unset fields keep their
/// stored values; `id` and `lastAccessedAt` are always forced by the
/// store.
#[derive(Clone, Debug, Default)]
pub struct SessionPatch {
    /// Replace the stored tokens (encrypted before the write).
    pub tokens: Option<OAuthTokens>,
    /// Set the authenticated flag.
    pub authenticated: Option<bool>,
    /// Set the user email.
    pub user_email: Option<String>,
    /// Replace the metadata map.
    pub metadata: Option<SessionMetadata>,
}

/// The persisted record. Tokens appear only as ciphertext here.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    id: String,
    created_at: i64,
    expires_at: i64,
    last_accessed_at: i64,
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encrypted_tokens: Option<String>,
    #[serde(default)]
    metadata: SessionMetadata,
}

/// Redis-backed session store (component C3).
pub struct SessionStore {
    kv: Arc<dyn Kv>,
    cipher: Arc<TokenCipher>,
    clock: Arc<dyn Clock>,
    config: SessionStoreConfig,
}

impl SessionStore {
    /// Build a store.
    #[must_use]
    pub fn new(
        kv: Arc<dyn Kv>,
        cipher: Arc<TokenCipher>,
        clock: Arc<dyn Clock>,
        config: SessionStoreConfig,
    ) -> Self {
        Self {
            kv,
            cipher,
            clock,
            config,
        }
    }

    fn key(id: &SessionId) -> String {
        format!("{SESSION_PREFIX}{id}")
    }

    /// Create a new unauthenticated session.
    pub async fn create(&self, options: CreateSessionOptions) -> Result<Session, StoreError> {
        let now = self.clock.now_ms();
        let ttl = options.ttl_ms.unwrap_or(self.config.absolute_ttl_ms);
        let id = SessionId::new();
        let record = StoredSession {
            id: id.to_string(),
            created_at: now,
            expires_at: now + ttl,
            last_accessed_at: now,
            authenticated: false,
            user_email: None,
            encrypted_tokens: None,
            metadata: options.metadata,
        };
        let json = serde_json::to_string(&record)?;
        self.kv.set_ex(&Self::key(&id), &json, ttl).await?;
        debug!(session_id = %id, "session created");
        Ok(self.to_view(record))
    }

    /// Read a session, enforcing absolute then idle expiry, and stamp the
    /// access time.
    ///
    /// A failed access-time rewrite is non-critical: the read still
    /// returns its session.
    pub async fn get(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let key = Self::key(id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };
        let mut record: StoredSession = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(session_id = %id, error = %e, "unparseable session record, deleting");
                let _ = self.kv.delete(&key).await?;
                return Ok(None);
            }
        };

        let now = self.clock.now_ms();
        if let Some(reason) = self.expiry_reason(&record, now) {
            debug!(session_id = %id, reason, "session expired");
            let _ = self.kv.delete(&key).await?;
            return Ok(None);
        }

        record.last_accessed_at = now;
        let remaining = self
            .kv
            .pttl(&key)
            .await?
            .unwrap_or(self.config.absolute_ttl_ms);
        let json = serde_json::to_string(&record)?;
        if let Err(e) = self.kv.set_ex(&key, &json, remaining).await {
            warn!(session_id = %id, error = %e, "failed to stamp session access time");
        }

        Ok(Some(self.to_view(record)))
    }

    /// Apply a patch under optimistic concurrency.
    ///
    /// Returns `None` when the session is missing or expired.
    pub async fn update(
        &self,
        id: &SessionId,
        patch: SessionPatch,
    ) -> Result<Option<Session>, StoreError> {
        let key = Self::key(id);
        for _ in 0..UPDATE_MAX_RETRIES {
            let Some(raw) = self.kv.get(&key).await? else {
                return Ok(None);
            };
            let mut record: StoredSession = serde_json::from_str(&raw)?;

            // Expiry is evaluated against this committed read, so a
            // concurrent get that just refreshed lastAccessedAt is seen
            // here rather than racing a stale snapshot.
            let now = self.clock.now_ms();
            if self.expiry_reason(&record, now).is_some() {
                let _ = self.kv.delete(&key).await?;
                return Ok(None);
            }

            if let Some(tokens) = &patch.tokens {
                let ciphertext = self
                    .cipher
                    .encrypt_tokens(tokens)
                    .map_err(|e| StoreError::Backend(format!("token encryption failed: {e}")))?;
                record.encrypted_tokens = Some(ciphertext);
            }
            if let Some(authenticated) = patch.authenticated {
                record.authenticated = authenticated;
            }
            if let Some(email) = &patch.user_email {
                record.user_email = Some(email.clone());
            }
            if let Some(metadata) = &patch.metadata {
                record.metadata = metadata.clone();
            }
            record.id = id.to_string();
            record.last_accessed_at = now;

            let remaining = self
                .kv
                .pttl(&key)
                .await?
                .unwrap_or(self.config.absolute_ttl_ms);
            let json = serde_json::to_string(&record)?;
            if self
                .kv
                .compare_and_swap(&key, &raw, &json, remaining)
                .await?
            {
                return Ok(Some(self.to_view(record)));
            }
            debug!(session_id = %id, "session update conflicted, retrying");
        }
        Err(StoreError::Conflict { key })
    }

    /// Store upstream tokens and mark the session authenticated.
    pub async fn store_tokens(
        &self,
        id: &SessionId,
        tokens: OAuthTokens,
        user_email: Option<String>,
    ) -> Result<Option<Session>, StoreError> {
        self.update(
            id,
            SessionPatch {
                tokens: Some(tokens),
                authenticated: Some(true),
                user_email,
                metadata: None,
            },
        )
        .await
    }

    /// Delete a session. Returns whether it existed.
    pub async fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.kv.delete(&Self::key(id)).await
    }

    /// Extend a session's absolute lifetime from now.
    pub async fn refresh(&self, id: &SessionId) -> Result<Option<Session>, StoreError> {
        let key = Self::key(id);
        for _ in 0..UPDATE_MAX_RETRIES {
            let Some(raw) = self.kv.get(&key).await? else {
                return Ok(None);
            };
            let mut record: StoredSession = serde_json::from_str(&raw)?;
            let now = self.clock.now_ms();
            if self.expiry_reason(&record, now).is_some() {
                let _ = self.kv.delete(&key).await?;
                return Ok(None);
            }
            record.expires_at = now + self.config.absolute_ttl_ms;
            record.last_accessed_at = now;
            let json = serde_json::to_string(&record)?;
            if self
                .kv
                .compare_and_swap(&key, &raw, &json, self.config.absolute_ttl_ms)
                .await?
            {
                return Ok(Some(self.to_view(record)));
            }
        }
        Err(StoreError::Conflict { key })
    }

    /// Sweep the session keyspace, deleting expired or unparseable
    /// records. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let pattern = format!("{SESSION_PREFIX}*");
        let keys = self.kv.scan(&pattern, SCAN_BATCH).await?;
        let now = self.clock.now_ms();
        let mut removed = 0;
        for key in keys {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            let delete = match serde_json::from_str::<StoredSession>(&raw) {
                Ok(record) => record.expires_at < now,
                Err(_) => true,
            };
            if delete && self.kv.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn expiry_reason(&self, record: &StoredSession, now: i64) -> Option<&'static str> {
        if record.expires_at < now {
            return Some("absolute");
        }
        if now - record.last_accessed_at > self.config.idle_ttl_ms {
            return Some("idle");
        }
        None
    }

    /// Decrypt and project a stored record into the handler-facing view.
    ///
    /// A decryption failure is logged and yields a token-less,
    /// unauthenticated view; the stored record is left intact in case the
    /// failure is a transient key-rotation problem.
    fn to_view(&self, record: StoredSession) -> Session {
        let tokens = record.encrypted_tokens.as_deref().and_then(|ct| {
            match self.cipher.decrypt_tokens(ct) {
                Ok(t) => Some(t),
                Err(e) => {
                    warn!(session_id = %record.id, error = %e, "session token decryption failed");
                    None
                }
            }
        });
        let authenticated = record.authenticated && tokens.is_some();
        Session {
            id: SessionId::from_string(record.id),
            created_at: record.created_at,
            expires_at: record.expires_at,
            last_accessed_at: record.last_accessed_at,
            authenticated,
            user_email: record.user_email,
            tokens,
            metadata: record.metadata,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKv;

    const T0: i64 = 1_700_000_000_000;

    fn make_store() -> (SessionStore, Arc<MemoryKv>, Arc<ManualClock>) {
        let clock = ManualClock::new(T0);
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        let cipher = Arc::new(TokenCipher::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let store = SessionStore::new(
            kv.clone(),
            cipher,
            clock.clone(),
            SessionStoreConfig::default(),
        );
        (store, kv, clock)
    }

    fn make_tokens() -> OAuthTokens {
        OAuthTokens {
            access_token: "ya29.secret".into(),
            refresh_token: Some("1//refresh".into()),
            scope: Some("email".into()),
            token_type: Some("Bearer".into()),
            expiry_date: T0 + 3_600_000,
        }
    }

    #[tokio::test]
    async fn create_starts_unauthenticated() {
        let (store, _, _) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        assert!(!session.authenticated);
        assert!(session.tokens.is_none());
        assert_eq!(session.created_at, T0);
        assert_eq!(session.expires_at, T0 + SESSION_TTL_MS);
    }

    #[tokio::test]
    async fn get_round_trips() {
        let (store, _, _) = make_store();
        let created = store.create(CreateSessionOptions::default()).await.unwrap();
        let loaded = store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, created.id);
    }

    #[tokio::test]
    async fn get_missing_is_none() {
        let (store, _, _) = make_store();
        assert!(store.get(&SessionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tokens_are_ciphertext_at_rest() {
        let (store, kv, _) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        let _ = store
            .store_tokens(&session.id, make_tokens(), Some("user@example.com".into()))
            .await
            .unwrap();
        let raw = kv
            .get(&format!("sess:{}", session.id))
            .await
            .unwrap()
            .unwrap();
        assert!(!raw.contains("ya29"));
        assert!(!raw.contains("refresh_token"));
        assert!(raw.contains("encryptedTokens"));
    }

    #[tokio::test]
    async fn store_tokens_authenticates() {
        let (store, _, _) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        let updated = store
            .store_tokens(&session.id, make_tokens(), Some("user@example.com".into()))
            .await
            .unwrap()
            .unwrap();
        assert!(updated.authenticated);
        assert_eq!(updated.user_email.as_deref(), Some("user@example.com"));

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert!(loaded.authenticated);
        assert_eq!(loaded.tokens.unwrap().access_token, "ya29.secret");
    }

    #[tokio::test]
    async fn absolute_expiry_deletes() {
        let (store, kv, clock) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        let key = format!("sess:{}", session.id);
        // Give the stored record a longer storage TTL than its logical
        // expiry so the absolute check itself performs the deletion.
        let raw = kv.get(&key).await.unwrap().unwrap();
        kv.set_ex(&key, &raw, SESSION_TTL_MS * 2).await.unwrap();

        clock.advance(SESSION_TTL_MS + 1);
        assert!(store.get(&session.id).await.unwrap().is_none());
        // Deletion is observable in the keyspace.
        assert!(kv.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn idle_expiry_deletes() {
        let (store, kv, clock) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        // 29 minutes idle: fine.
        clock.advance(29 * 60 * 1000);
        assert!(store.get(&session.id).await.unwrap().is_some());
        // 31 more minutes idle: gone, well before the absolute deadline.
        clock.advance(31 * 60 * 1000);
        assert!(store.get(&session.id).await.unwrap().is_none());
        assert!(
            kv.get(&format!("sess:{}", session.id))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn access_resets_idle_window() {
        let (store, _, clock) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        for _ in 0..8 {
            clock.advance(29 * 60 * 1000);
            assert!(store.get(&session.id).await.unwrap().is_some());
        }
        // 9 × 29 min > 4 h absolute: the next read trips absolute expiry.
        clock.advance(29 * 60 * 1000);
        assert!(store.get(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_applies_patch() {
        let (store, _, _) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        let updated = store
            .update(
                &session.id,
                SessionPatch {
                    user_email: Some("u@example.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.user_email.as_deref(), Some("u@example.com"));
        // Unset fields untouched.
        assert!(!updated.authenticated);
    }

    #[tokio::test]
    async fn update_missing_is_none() {
        let (store, _, _) = make_store();
        let result = store
            .update(&SessionId::new(), SessionPatch::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn concurrent_updates_both_land() {
        let (store, _, _) = make_store();
        let store = Arc::new(store);
        let session = store.create(CreateSessionOptions::default()).await.unwrap();

        let s1 = store.clone();
        let s2 = store.clone();
        let id1 = session.id.clone();
        let id2 = session.id.clone();
        let (a, b) = tokio::join!(
            s1.update(
                &id1,
                SessionPatch {
                    user_email: Some("a@example.com".into()),
                    ..Default::default()
                },
            ),
            s2.update(
                &id2,
                SessionPatch {
                    authenticated: Some(false),
                    metadata: Some(SessionMetadata {
                        client_id: Some("mcp_x".into()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());

        let final_state = store.get(&session.id).await.unwrap().unwrap();
        // Neither patch may be silently lost.
        assert_eq!(final_state.user_email.as_deref(), Some("a@example.com"));
        assert_eq!(final_state.metadata.client_id.as_deref(), Some("mcp_x"));
    }

    #[tokio::test]
    async fn update_exhausts_retries_with_conflict() {
        use crate::kv::Kv;
        use async_trait::async_trait;

        /// Forwards everything to the inner store but loses every CAS.
        struct ContendedKv(Arc<MemoryKv>);

        #[async_trait]
        impl Kv for ContendedKv {
            async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
                self.0.get(key).await
            }
            async fn set_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<(), StoreError> {
                self.0.set_ex(key, value, ttl_ms).await
            }
            async fn set_nx_ex(
                &self,
                key: &str,
                value: &str,
                ttl_ms: i64,
            ) -> Result<bool, StoreError> {
                self.0.set_nx_ex(key, value, ttl_ms).await
            }
            async fn delete(&self, key: &str) -> Result<bool, StoreError> {
                self.0.delete(key).await
            }
            async fn pttl(&self, key: &str) -> Result<Option<i64>, StoreError> {
                self.0.pttl(key).await
            }
            async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
                self.0.get_del(key).await
            }
            async fn compare_and_swap(
                &self,
                _key: &str,
                _expected: &str,
                _value: &str,
                _ttl_ms: i64,
            ) -> Result<bool, StoreError> {
                Ok(false)
            }
            async fn incr_window(
                &self,
                key: &str,
                window_ms: i64,
                reset_on_change: bool,
            ) -> Result<(i64, i64), StoreError> {
                self.0.incr_window(key, window_ms, reset_on_change).await
            }
            async fn scan(&self, pattern: &str, batch: usize) -> Result<Vec<String>, StoreError> {
                self.0.scan(pattern, batch).await
            }
        }

        let clock = ManualClock::new(T0);
        let inner = Arc::new(MemoryKv::with_clock(clock.clone()));
        let cipher = Arc::new(TokenCipher::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let store = SessionStore::new(
            Arc::new(ContendedKv(inner.clone())),
            cipher,
            clock,
            SessionStoreConfig::default(),
        );

        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        let result = store
            .update(
                &session.id,
                SessionPatch {
                    user_email: Some("a@example.com".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn delete_removes() {
        let (store, _, _) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        assert!(store.delete(&session.id).await.unwrap());
        assert!(!store.delete(&session.id).await.unwrap());
        assert!(store.get(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn refresh_extends_absolute() {
        let (store, _, clock) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        clock.advance(20 * 60 * 1000);
        let refreshed = store.refresh(&session.id).await.unwrap().unwrap();
        assert_eq!(refreshed.expires_at, clock.now_ms() + SESSION_TTL_MS);
        assert!(refreshed.expires_at > session.expires_at);
    }

    #[tokio::test]
    async fn cleanup_removes_expired_and_garbage() {
        let (store, kv, clock) = make_store();
        let s1 = store.create(CreateSessionOptions::default()).await.unwrap();
        let _s2 = store.create(CreateSessionOptions::default()).await.unwrap();
        // Corrupt record with a long kv TTL.
        kv.set_ex("sess:garbage", "{not json", SESSION_TTL_MS * 2)
            .await
            .unwrap();
        // Make s1 absolutely expired but still present in the kv by
        // giving it a longer storage TTL than its logical expiry.
        let raw = kv.get(&format!("sess:{}", s1.id)).await.unwrap().unwrap();
        kv.set_ex(&format!("sess:{}", s1.id), &raw, SESSION_TTL_MS * 2)
            .await
            .unwrap();
        clock.advance(SESSION_TTL_MS + 1000);
        // s2's storage TTL elapsed naturally, so only s1 + garbage remain.
        let removed = store.cleanup_expired().await.unwrap();
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn corrupt_record_on_get_is_deleted() {
        let (store, kv, _) = make_store();
        kv.set_ex("sess:bad", "][", 60_000).await.unwrap();
        assert!(
            store
                .get(&SessionId::from_string("bad".into()))
                .await
                .unwrap()
                .is_none()
        );
        assert!(kv.get("sess:bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn decrypt_failure_returns_session_without_tokens() {
        let (store, kv, _) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        let _ = store
            .store_tokens(&session.id, make_tokens(), None)
            .await
            .unwrap();

        // Corrupt the ciphertext in place.
        let key = format!("sess:{}", session.id);
        let raw = kv.get(&key).await.unwrap().unwrap();
        let mut record: serde_json::Value = serde_json::from_str(&raw).unwrap();
        record["encryptedTokens"] = serde_json::Value::String("AAAA".into());
        kv.set_ex(&key, &record.to_string(), 60_000).await.unwrap();

        let loaded = store.get(&session.id).await.unwrap().unwrap();
        assert!(loaded.tokens.is_none());
        // Callers must treat this as unauthenticated.
        assert!(!loaded.authenticated);
        // The record is NOT deleted.
        assert!(kv.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn get_preserves_remaining_ttl() {
        let (store, kv, clock) = make_store();
        let session = store.create(CreateSessionOptions::default()).await.unwrap();
        clock.advance(20 * 60 * 1000);
        let _ = store.get(&session.id).await.unwrap().unwrap();
        let remaining = kv.pttl(&format!("sess:{}", session.id)).await.unwrap();
        // Twenty minutes elapsed of the four-hour TTL.
        assert_eq!(remaining, Some(SESSION_TTL_MS - 20 * 60 * 1000));
    }
}
