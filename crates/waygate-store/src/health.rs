//! Redis health tracking.
//!
//! [`TrackedKv`] wraps the production store and reports every round-trip
//! outcome to a [`HealthTracker`]; after a run of consecutive failures
//! the tracker flips to degraded, which `/health` reports. A single
//! success resets it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::kv::Kv;

/// Consecutive failures before the backend is considered degraded.
const DEGRADED_THRESHOLD: u32 = 3;

/// Tracks backend liveness from observed call outcomes.
#[derive(Debug, Default)]
pub struct HealthTracker {
    consecutive_failures: AtomicU32,
}

impl HealthTracker {
    /// Create a healthy tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful store round trip.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failed store round trip.
    pub fn record_failure(&self) {
        let _ = self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether the backend is currently considered degraded.
    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= DEGRADED_THRESHOLD
    }
}

/// [`Kv`] decorator that feeds call outcomes into a [`HealthTracker`].
pub struct TrackedKv {
    inner: Arc<dyn Kv>,
    tracker: Arc<HealthTracker>,
}

impl TrackedKv {
    /// Wrap a store.
    #[must_use]
    pub fn new(inner: Arc<dyn Kv>, tracker: Arc<HealthTracker>) -> Self {
        Self { inner, tracker }
    }

    fn observe<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        match &result {
            Ok(_) => self.tracker.record_success(),
            Err(_) => self.tracker.record_failure(),
        }
        result
    }
}

#[async_trait]
impl Kv for TrackedKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let r = self.inner.get(key).await;
        self.observe(r)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<(), StoreError> {
        let r = self.inner.set_ex(key, value, ttl_ms).await;
        self.observe(r)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_ms: i64) -> Result<bool, StoreError> {
        let r = self.inner.set_nx_ex(key, value, ttl_ms).await;
        self.observe(r)
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let r = self.inner.delete(key).await;
        self.observe(r)
    }

    async fn pttl(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let r = self.inner.pttl(key).await;
        self.observe(r)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let r = self.inner.get_del(key).await;
        self.observe(r)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
        ttl_ms: i64,
    ) -> Result<bool, StoreError> {
        let r = self
            .inner
            .compare_and_swap(key, expected, value, ttl_ms)
            .await;
        self.observe(r)
    }

    async fn incr_window(
        &self,
        key: &str,
        window_ms: i64,
        reset_on_change: bool,
    ) -> Result<(i64, i64), StoreError> {
        let r = self.inner.incr_window(key, window_ms, reset_on_change).await;
        self.observe(r)
    }

    async fn scan(&self, pattern: &str, batch: usize) -> Result<Vec<String>, StoreError> {
        let r = self.inner.scan(pattern, batch).await;
        self.observe(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[test]
    fn starts_healthy() {
        let tracker = HealthTracker::new();
        assert!(!tracker.is_degraded());
    }

    #[test]
    fn degrades_after_threshold() {
        let tracker = HealthTracker::new();
        tracker.record_failure();
        tracker.record_failure();
        assert!(!tracker.is_degraded());
        tracker.record_failure();
        assert!(tracker.is_degraded());
    }

    #[test]
    fn success_resets() {
        let tracker = HealthTracker::new();
        for _ in 0..5 {
            tracker.record_failure();
        }
        assert!(tracker.is_degraded());
        tracker.record_success();
        assert!(!tracker.is_degraded());
    }

    #[tokio::test]
    async fn tracked_kv_records_success() {
        let tracker = Arc::new(HealthTracker::new());
        for _ in 0..5 {
            tracker.record_failure();
        }
        let kv = TrackedKv::new(Arc::new(MemoryKv::new()), tracker.clone());
        kv.set_ex("k", "v", 1000).await.unwrap();
        assert!(!tracker.is_degraded());
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
