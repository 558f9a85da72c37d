//! The key-value abstraction the stores are built on, plus the in-memory
//! implementation used by tests.
//!
//! Three operations are contractually atomic on the server side:
//! [`Kv::get_del`] (single-use code consumption), [`Kv::compare_and_swap`]
//! (optimistic session updates), and [`Kv::incr_window`] (rate-limit
//! counters that never lose their TTL).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::errors::StoreError;

/// Key-value store contract.
///
/// Keys are logical (un-prefixed); implementations may apply a per-service
/// keyspace prefix transparently. TTLs are milliseconds.
#[async_trait]
pub trait Kv: Send + Sync {
    /// Read a key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a key with a TTL.
    async fn set_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<(), StoreError>;

    /// Write a key with a TTL only if it does not exist. Returns whether
    /// the write happened.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<bool, StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining TTL in milliseconds, `None` if the key is missing or has
    /// no expiry.
    async fn pttl(&self, key: &str) -> Result<Option<i64>, StoreError>;

    /// Atomically read and delete a key.
    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically replace `key` with `value` iff its current content
    /// equals `expected`. Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl_ms: i64,
    ) -> Result<bool, StoreError>;

    /// Atomically increment a windowed counter, attaching the window TTL
    /// on first hit (and on every hit when `reset_on_change`). Returns
    /// `(hits, remaining_ms)`.
    async fn incr_window(
        &self,
        key: &str,
        window_ms: i64,
        reset_on_change: bool,
    ) -> Result<(i64, i64), StoreError>;

    /// Collect all keys matching a glob pattern, iterating the keyspace
    /// cursor-based in `batch`-sized chunks (never a blocking full scan).
    async fn scan(&self, pattern: &str, batch: usize) -> Result<Vec<String>, StoreError>;
}

struct Entry {
    value: String,
    /// Absolute expiry (ms epoch); `None` means no TTL.
    expires_at: Option<i64>,
}

/// In-memory [`Kv`] for tests.
///
/// Expiry is evaluated lazily against the injected [`Clock`], so tests can
/// jump time forward instead of sleeping.
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKv {
    /// Create a store on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store on a custom clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.entries
            .lock()
            .values()
            .filter(|e| e.expires_at.is_none_or(|t| t > now))
            .count()
    }

    /// Whether the store holds no live keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.expires_at.is_none_or(|t| t > now) => Some(e.value.clone()),
            Some(_) => {
                let _ = entries.remove(key);
                None
            }
            None => None,
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

/// Translate a glob pattern with a trailing `*` into a prefix test.
fn glob_matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[async_trait]
impl Kv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.live_value(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<(), StoreError> {
        let expires_at = self.clock.now_ms() + ttl_ms;
        let _ = self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<bool, StoreError> {
        if self.live_value(key).is_some() {
            return Ok(false);
        }
        self.set_ex(key, value, ttl_ms).await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let existed = self.live_value(key).is_some();
        let _ = self.entries.lock().remove(key);
        Ok(existed)
    }

    async fn pttl(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let now = self.clock.now_ms();
        let entries = self.entries.lock();
        Ok(entries.get(key).and_then(|e| {
            e.expires_at
                .map(|t| t - now)
                .filter(|remaining| *remaining > 0)
        }))
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self.live_value(key);
        let _ = self.entries.lock().remove(key);
        Ok(value)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl_ms: i64,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let current = match entries.get(key) {
            Some(e) if e.expires_at.is_none_or(|t| t > now) => Some(e.value.as_str()),
            _ => None,
        };
        if current != Some(expected) {
            return Ok(false);
        }
        let _ = entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl_ms),
            },
        );
        Ok(true)
    }

    async fn incr_window(
        &self,
        key: &str,
        window_ms: i64,
        reset_on_change: bool,
    ) -> Result<(i64, i64), StoreError> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock();
        let live = entries
            .get(key)
            .filter(|e| e.expires_at.is_none_or(|t| t > now));
        let (hits, expires_at) = match live {
            Some(e) => {
                let hits = e.value.parse::<i64>().unwrap_or(0) + 1;
                let expires_at = if reset_on_change {
                    now + window_ms
                } else {
                    e.expires_at.unwrap_or(now + window_ms)
                };
                (hits, expires_at)
            }
            None => (1, now + window_ms),
        };
        let _ = entries.insert(
            key.to_string(),
            Entry {
                value: hits.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok((hits, expires_at - now))
    }

    async fn scan(&self, pattern: &str, _batch: usize) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now_ms();
        let entries = self.entries.lock();
        Ok(entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_none_or(|t| t > now))
            .filter(|(k, _)| glob_matches(pattern, k))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn kv_at(start_ms: i64) -> (MemoryKv, Arc<ManualClock>) {
        let clock = ManualClock::new(start_ms);
        (MemoryKv::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn set_and_get() {
        let (kv, _) = kv_at(0);
        kv.set_ex("k", "v", 1000).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn get_after_expiry_is_none() {
        let (kv, clock) = kv_at(0);
        kv.set_ex("k", "v", 1000).await.unwrap();
        clock.advance(1001);
        assert!(kv.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_nx_respects_existing() {
        let (kv, _) = kv_at(0);
        assert!(kv.set_nx_ex("k", "a", 1000).await.unwrap());
        assert!(!kv.set_nx_ex("k", "b", 1000).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn set_nx_succeeds_after_expiry() {
        let (kv, clock) = kv_at(0);
        assert!(kv.set_nx_ex("k", "a", 1000).await.unwrap());
        clock.advance(2000);
        assert!(kv.set_nx_ex("k", "b", 1000).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let (kv, _) = kv_at(0);
        kv.set_ex("k", "v", 1000).await.unwrap();
        assert!(kv.delete("k").await.unwrap());
        assert!(!kv.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn pttl_reports_remaining() {
        let (kv, clock) = kv_at(0);
        kv.set_ex("k", "v", 1000).await.unwrap();
        clock.advance(400);
        assert_eq!(kv.pttl("k").await.unwrap(), Some(600));
        assert_eq!(kv.pttl("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_del_consumes() {
        let (kv, _) = kv_at(0);
        kv.set_ex("k", "v", 1000).await.unwrap();
        assert_eq!(kv.get_del("k").await.unwrap().as_deref(), Some("v"));
        assert!(kv.get("k").await.unwrap().is_none());
        assert!(kv.get_del("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cas_swaps_only_on_match() {
        let (kv, _) = kv_at(0);
        kv.set_ex("k", "v1", 1000).await.unwrap();
        assert!(!kv.compare_and_swap("k", "stale", "v2", 1000).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v1"));
        assert!(kv.compare_and_swap("k", "v1", "v2", 1000).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn cas_fails_on_missing_key() {
        let (kv, _) = kv_at(0);
        assert!(!kv.compare_and_swap("k", "x", "y", 1000).await.unwrap());
    }

    #[tokio::test]
    async fn incr_window_counts_and_keeps_ttl() {
        let (kv, clock) = kv_at(0);
        let (hits, ttl) = kv.incr_window("rl:a", 1000, false).await.unwrap();
        assert_eq!((hits, ttl), (1, 1000));
        clock.advance(400);
        let (hits, ttl) = kv.incr_window("rl:a", 1000, false).await.unwrap();
        assert_eq!(hits, 2);
        // TTL continues from the first hit, not reset.
        assert_eq!(ttl, 600);
    }

    #[tokio::test]
    async fn incr_window_resets_after_expiry() {
        let (kv, clock) = kv_at(0);
        let _ = kv.incr_window("rl:a", 1000, false).await.unwrap();
        clock.advance(1500);
        let (hits, ttl) = kv.incr_window("rl:a", 1000, false).await.unwrap();
        assert_eq!((hits, ttl), (1, 1000));
    }

    #[tokio::test]
    async fn incr_window_reset_on_change() {
        let (kv, clock) = kv_at(0);
        let _ = kv.incr_window("rl:a", 1000, true).await.unwrap();
        clock.advance(800);
        let (hits, ttl) = kv.incr_window("rl:a", 1000, true).await.unwrap();
        assert_eq!(hits, 2);
        assert_eq!(ttl, 1000);
    }

    #[tokio::test]
    async fn scan_matches_prefix_and_skips_expired() {
        let (kv, clock) = kv_at(0);
        kv.set_ex("sess:a", "1", 1000).await.unwrap();
        kv.set_ex("sess:b", "2", 100).await.unwrap();
        kv.set_ex("api-token:x", "3", 1000).await.unwrap();
        clock.advance(500);

        let mut keys = kv.scan("sess:*", 100).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["sess:a"]);
    }

    #[tokio::test]
    async fn len_counts_live_only() {
        let (kv, clock) = kv_at(0);
        kv.set_ex("a", "1", 100).await.unwrap();
        kv.set_ex("b", "2", 1000).await.unwrap();
        assert_eq!(kv.len(), 2);
        clock.advance(500);
        assert_eq!(kv.len(), 1);
    }
}
