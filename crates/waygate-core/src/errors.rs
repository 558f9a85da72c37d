//! The cross-crate error taxonomy.
//!
//! Every store, crypto, and upstream failure is eventually classified into
//! one of these variants; the server crate maps them onto HTTP statuses and
//! OAuth-shaped JSON bodies. Variant messages are safe to show to clients —
//! anything internal stays in the log record, never in the response.

use thiserror::Error;

/// Top-level error taxonomy for the gateway core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed user input: shape, length, or format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authorization code failed existence, expiry, binding, or PKCE
    /// verification. The reasons are deliberately not distinguished.
    #[error("invalid grant")]
    InvalidGrant,

    /// Missing or failed credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Credentials valid but not for this resource.
    #[error("forbidden")]
    Forbidden,

    /// Token, client, or resource missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// An optimistic update lost all of its retries.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A streaming admission limit was reached.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// A rate limiter tripped.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window resets.
        retry_after_secs: i64,
    },

    /// AES-GCM failure. Never surfaced verbatim to clients.
    #[error("cryptographic failure")]
    Crypto,

    /// Upstream identity provider or store failure.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Catch-all internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Machine-readable OAuth-style error code for response bodies.
    #[must_use]
    pub fn oauth_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidGrant => "invalid_grant",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "access_denied",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Capacity(_) => "temporarily_unavailable",
            Self::RateLimited { .. } => "rate_limit_exceeded",
            Self::Crypto | Self::Upstream(_) | Self::Internal(_) => "server_error",
        }
    }

    /// Whether the client can safely retry without changes.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::Capacity(_) | Self::RateLimited { .. } | Self::Upstream(_)
        )
    }
}
