//! Typed settings sections.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WaygateSettings {
    /// Deployment environment: `development`, `staging`, or `production`.
    pub environment: String,
    /// HTTP server binding and identity.
    pub server: ServerSettings,
    /// Redis connection settings.
    pub redis: RedisSettings,
    /// Upstream identity provider (Google) credentials and endpoints.
    pub upstream: UpstreamSettings,
    /// External secret store for the data-encryption key.
    pub secrets: SecretsSettings,
    /// Session cookie attributes.
    pub cookie: CookieSettings,
    /// Redirect-URI whitelist and metrics gating.
    pub auth: AuthSettings,
    /// Streaming and body-size limits.
    pub limits: LimitSettings,
}

impl Default for WaygateSettings {
    fn default() -> Self {
        Self {
            environment: "development".into(),
            server: ServerSettings::default(),
            redis: RedisSettings::default(),
            upstream: UpstreamSettings::default(),
            secrets: SecretsSettings::default(),
            cookie: CookieSettings::default(),
            auth: AuthSettings::default(),
            limits: LimitSettings::default(),
        }
    }
}

impl WaygateSettings {
    /// Whether this deployment is production.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Externally visible base URL, used in the SSE endpoint handshake and
    /// well-known metadata (e.g. `https://gmail-gateway.example.com`).
    pub base_url: String,
    /// Short service name (e.g. `gmail`); prefixes log records.
    pub service_name: String,
    /// Extra callback paths routed like `/oauth2callback` (per-service
    /// aliases such as `/gmail/oauth2callback`).
    pub callback_aliases: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            base_url: "http://localhost:8080".into(),
            service_name: "gateway".into(),
            callback_aliases: Vec::new(),
        }
    }
}

/// Redis connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Connection URL (`redis://host:port/db`).
    pub url: String,
    /// Keyspace prefix for this service (e.g. `gmail-`); empty for none.
    pub key_prefix: String,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".into(),
            key_prefix: String::new(),
        }
    }
}

/// Upstream identity provider settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    /// OAuth client id issued by the provider.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// This gateway's registered callback URL at the provider.
    pub redirect_uri: String,
    /// Scopes requested at consent.
    pub scopes: Vec<String>,
    /// Authorization endpoint.
    pub auth_url: String,
    /// Token endpoint.
    pub token_url: String,
    /// Userinfo endpoint.
    pub userinfo_url: String,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:8080/oauth2callback".into(),
            scopes: vec![
                "openid".into(),
                "email".into(),
                "profile".into(),
            ],
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
            token_url: "https://oauth2.googleapis.com/token".into(),
            userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".into(),
        }
    }
}

/// External secret store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsSettings {
    /// Base URL of the secret store endpoint.
    pub endpoint: String,
    /// Name of the secret holding the data-encryption key.
    pub secret_name: String,
    /// Secret store region identifier.
    pub region: String,
    /// Hex-encoded 32-byte key from the environment (dev-mode bypass).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_key: Option<String>,
    /// Seconds to cache a fetched key (default 300).
    pub cache_ttl_secs: u64,
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            secret_name: "waygate/token-encryption-key".into(),
            region: "us-east-1".into(),
            env_key: None,
            cache_ttl_secs: 300,
        }
    }
}

/// Session cookie settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
    /// Cookie name; a per-service deployment constant.
    pub name: String,
    /// Optional `Domain` attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// `Max-Age` in seconds (default 24 h).
    pub max_age_secs: i64,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            name: "waygate_session".into(),
            domain: None,
            max_age_secs: 24 * 60 * 60,
        }
    }
}

/// Redirect-URI whitelist and observability gating.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Static redirect-URI whitelist (exact match). Union with the dynamic
    /// client registry decides whether a redirect URI is acceptable.
    pub redirect_whitelist: Vec<String>,
    /// Bearer token required by `/metrics` in production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_auth_token: Option<String>,
}

/// Streaming and request-size limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Global cap on live SSE connections.
    pub sse_max_total: usize,
    /// Per-user cap on live SSE connections; overflow evicts the oldest.
    pub sse_max_per_user: usize,
    /// Token-endpoint body limit in bytes.
    pub token_body_limit: usize,
    /// General request body limit in bytes.
    pub body_limit: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            sse_max_total: 1000,
            sse_max_per_user: 5,
            token_body_limit: 10 * 1024,
            body_limit: 1024 * 1024,
        }
    }
}
