//! Server configuration, projected from the gateway settings.

use serde::{Deserialize, Serialize};

use waygate_settings::WaygateSettings;

/// Configuration for the Waygate server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Externally visible base URL (SSE handshake, well-known metadata).
    pub base_url: String,
    /// Extra callback paths routed like `/oauth2callback`.
    pub callback_aliases: Vec<String>,
    /// Whether this is a production deployment (secure cookies, gated
    /// metrics).
    pub production: bool,
    /// Session cookie name.
    pub cookie_name: String,
    /// Optional cookie `Domain` attribute.
    pub cookie_domain: Option<String>,
    /// Cookie `Max-Age` in seconds.
    pub cookie_max_age_secs: i64,
    /// Static redirect-URI whitelist.
    pub redirect_whitelist: Vec<String>,
    /// Bearer token protecting `/metrics` in production.
    pub metrics_auth_token: Option<String>,
    /// Global cap on live SSE connections.
    pub sse_max_total: usize,
    /// Per-user cap on live SSE connections.
    pub sse_max_per_user: usize,
    /// Token-endpoint body limit in bytes.
    pub token_body_limit: usize,
    /// General request body limit in bytes.
    pub body_limit: usize,
}

impl ServerConfig {
    /// Project the server-facing subset of the gateway settings.
    #[must_use]
    pub fn from_settings(settings: &WaygateSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            base_url: settings.server.base_url.clone(),
            callback_aliases: settings.server.callback_aliases.clone(),
            production: settings.is_production(),
            cookie_name: settings.cookie.name.clone(),
            cookie_domain: settings.cookie.domain.clone(),
            cookie_max_age_secs: settings.cookie.max_age_secs,
            redirect_whitelist: settings.auth.redirect_whitelist.clone(),
            metrics_auth_token: settings.auth.metrics_auth_token.clone(),
            sse_max_total: settings.limits.sse_max_total,
            sse_max_per_user: settings.limits.sse_max_per_user,
            token_body_limit: settings.limits.token_body_limit,
            body_limit: settings.limits.body_limit,
        }
    }

    /// Whether a redirect URI passes the static whitelist.
    #[must_use]
    pub fn whitelisted(&self, redirect_uri: &str) -> bool {
        self.redirect_whitelist.iter().any(|u| u == redirect_uri)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&WaygateSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mirrors_settings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert!(!cfg.production);
        assert_eq!(cfg.cookie_name, "waygate_session");
        assert_eq!(cfg.sse_max_total, 1000);
        assert_eq!(cfg.sse_max_per_user, 5);
    }

    #[test]
    fn whitelist_is_exact_match() {
        let cfg = ServerConfig {
            redirect_whitelist: vec!["https://inspector.example/cb".into()],
            ..Default::default()
        };
        assert!(cfg.whitelisted("https://inspector.example/cb"));
        assert!(!cfg.whitelisted("https://inspector.example/cb/"));
        assert!(!cfg.whitelisted("https://inspector.example"));
    }

    #[test]
    fn production_projection() {
        let settings = WaygateSettings {
            environment: "production".into(),
            ..Default::default()
        };
        let cfg = ServerConfig::from_settings(&settings);
        assert!(cfg.production);
    }
}
