//! Keyspace prefixes and lifetime defaults.
//!
//! One gateway deployment may prefix the whole keyspace per service (e.g.
//! `gmail-sess:<uuid>`); the prefix is applied by the Kv layer, so the
//! constants here are the bare namespaces.

/// Current crate version (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Key prefix for session records.
pub const SESSION_PREFIX: &str = "sess:";

/// Key prefix for pending PKCE authorization requests.
pub const AUTHZ_REQUEST_PREFIX: &str = "oauth:authz_request:";

/// Key prefix for single-use authorization codes.
pub const AUTHZ_CODE_PREFIX: &str = "oauth:authz_code:";

/// Key prefix for dynamically registered OAuth clients.
pub const CLIENT_PREFIX: &str = "oauth:client:";

/// Key prefix for first-party bearer tokens.
pub const API_TOKEN_PREFIX: &str = "api-token:";

/// Key prefix for rate-limit counters.
pub const RATE_LIMIT_PREFIX: &str = "rl:";

/// Absolute session lifetime: 4 hours.
pub const SESSION_TTL_MS: i64 = 4 * 60 * 60 * 1000;

/// Idle session timeout: 30 minutes without access.
pub const SESSION_IDLE_MS: i64 = 30 * 60 * 1000;

/// Informational refresh-token lifetime: 7 days.
pub const REFRESH_TOKEN_TTL_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Authorization request / code lifetime: 10 minutes.
pub const AUTHZ_TTL_MS: i64 = 10 * 60 * 1000;

/// Registered-client lifetime: 30 days.
pub const CLIENT_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Bearer-token lifetime: 24 hours.
pub const BEARER_TOKEN_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Bearer-token lifetime in seconds, as reported in `expires_in`.
pub const BEARER_TOKEN_TTL_SECS: i64 = BEARER_TOKEN_TTL_MS / 1000;

/// MCP protocol version advertised during `initialize`.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
