//! Distributed rate limiting on windowed counters.
//!
//! Each named limiter increments `rl:<scope>:<key>` through the atomic
//! INCR+EXPIRE script, so a counter can never exist without its TTL. The
//! auth and token limiters fail closed on a backend error; the general
//! limiter fails open (deployment choice, recorded per limiter).

use std::sync::Arc;

use tracing::warn;

use waygate_core::constants::RATE_LIMIT_PREFIX;

use crate::errors::StoreError;
use crate::kv::Kv;

/// Scan batch size for bulk clears.
const SCAN_BATCH: usize = 100;

/// The named limiters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LimiterKind {
    /// `/auth/login` and `/oauth2callback`.
    Auth,
    /// `/api/generate-token`.
    Token,
    /// Authenticated RPC endpoints.
    Api,
    /// SSE connection attempts.
    Sse,
    /// Fallback for all routes.
    General,
    /// `DELETE /api/gdpr/user-data`.
    GdprDelete,
    /// `GET /api/gdpr/user-data`.
    GdprExport,
}

impl LimiterKind {
    /// Keyspace scope segment.
    #[must_use]
    pub fn scope(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Token => "token",
            Self::Api => "api",
            Self::Sse => "sse",
            Self::General => "general",
            Self::GdprDelete => "gdpr_delete",
            Self::GdprExport => "gdpr_export",
        }
    }

    /// Window length in milliseconds.
    #[must_use]
    pub fn window_ms(self) -> i64 {
        match self {
            Self::GdprExport => 60 * 60 * 1000,
            _ => 15 * 60 * 1000,
        }
    }

    /// Maximum hits inside one window.
    #[must_use]
    pub fn max_hits(self) -> i64 {
        match self {
            Self::Auth | Self::Sse => 10,
            Self::Token | Self::GdprDelete => 5,
            Self::Api => 100,
            Self::General => 300,
            Self::GdprExport => 10,
        }
    }

    /// Whether a backend failure admits the request (fail open) or
    /// surfaces an error (fail closed).
    #[must_use]
    pub fn fail_open(self) -> bool {
        matches!(self, Self::General | Self::Api)
    }
}

/// Outcome of a limiter check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Hits recorded in the current window, including this one.
    pub hits: i64,
    /// Seconds until the window resets.
    pub retry_after_secs: i64,
}

/// Windowed rate limiter over a shared [`Kv`].
pub struct RateLimiter {
    kv: Arc<dyn Kv>,
}

impl RateLimiter {
    /// Build a limiter.
    #[must_use]
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    /// Record a hit for `key` under the named limiter and decide
    /// admission.
    pub async fn check(
        &self,
        kind: LimiterKind,
        key: &str,
    ) -> Result<RateLimitDecision, StoreError> {
        let counter_key = format!("{RATE_LIMIT_PREFIX}{}:{key}", kind.scope());
        match self
            .kv
            .incr_window(&counter_key, kind.window_ms(), false)
            .await
        {
            Ok((hits, remaining_ms)) => {
                let allowed = hits <= kind.max_hits();
                if !allowed {
                    warn!(
                        audit = true,
                        event = "rate_limit_exceeded",
                        scope = kind.scope(),
                        key,
                        hits,
                        "rate limit exceeded"
                    );
                }
                Ok(RateLimitDecision {
                    allowed,
                    hits,
                    retry_after_secs: (remaining_ms + 999) / 1000,
                })
            }
            Err(e) if kind.fail_open() => {
                warn!(scope = kind.scope(), error = %e, "rate limiter backend failed, admitting");
                Ok(RateLimitDecision {
                    allowed: true,
                    hits: 0,
                    retry_after_secs: 0,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Read the current window without recording a hit.
    ///
    /// Used where successful requests are excluded from the count: the
    /// endpoint peeks at entry and records a hit only on failure paths.
    pub async fn peek(
        &self,
        kind: LimiterKind,
        key: &str,
    ) -> Result<RateLimitDecision, StoreError> {
        let counter_key = format!("{RATE_LIMIT_PREFIX}{}:{key}", kind.scope());
        let hits = match self.kv.get(&counter_key).await {
            Ok(raw) => raw.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0),
            Err(e) if kind.fail_open() => {
                warn!(scope = kind.scope(), error = %e, "rate limiter backend failed, admitting");
                0
            }
            Err(e) => return Err(e),
        };
        let remaining_ms = self.kv.pttl(&counter_key).await.unwrap_or(None).unwrap_or(0);
        Ok(RateLimitDecision {
            allowed: hits < kind.max_hits(),
            hits,
            retry_after_secs: (remaining_ms + 999) / 1000,
        })
    }

    /// Record a hit without deciding admission (failure-only counting).
    pub async fn record(&self, kind: LimiterKind, key: &str) -> Result<(), StoreError> {
        let counter_key = format!("{RATE_LIMIT_PREFIX}{}:{key}", kind.scope());
        match self
            .kv
            .incr_window(&counter_key, kind.window_ms(), false)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if kind.fail_open() => {
                warn!(scope = kind.scope(), error = %e, "rate limiter backend failed on record");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Clear every counter in a scope. Cursor scan + per-key deletes,
    /// never a blocking keyspace walk.
    pub async fn clear_scope(&self, kind: LimiterKind) -> Result<usize, StoreError> {
        let pattern = format!("{RATE_LIMIT_PREFIX}{}:*", kind.scope());
        let keys = self.kv.scan(&pattern, SCAN_BATCH).await?;
        let mut removed = 0;
        for key in keys {
            if self.kv.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
