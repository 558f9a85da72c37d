//! Settings loading: compiled defaults, an optional JSON overlay file,
//! and `WAYGATE_*` environment overrides, in that order of precedence.
//!
//! The overlay file only carries the keys a deployment cares about. A
//! gateway fleet runs the same image with a different overlay per
//! service, so a sparse file must never blank out a default: object
//! values merge into the defaults key by key, everything else replaces
//! the default outright, and explicit `null`s are ignored.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::WaygateSettings;

/// Load settings for this process.
///
/// Uses the overlay file named by `WAYGATE_CONFIG` when that variable is
/// set; environment overrides apply last either way.
pub fn load_settings() -> Result<WaygateSettings> {
    match std::env::var("WAYGATE_CONFIG") {
        Ok(path) => load_settings_from_path(Path::new(&path)),
        Err(_) => {
            let mut settings = WaygateSettings::default();
            apply_env_overrides(&mut settings);
            Ok(settings)
        }
    }
}

/// Load settings with `path` as the overlay file.
///
/// A missing overlay is not an error — plenty of deployments configure
/// the gateway through env vars alone. An overlay that exists but does
/// not parse is.
pub fn load_settings_from_path(path: &Path) -> Result<WaygateSettings> {
    let mut merged = serde_json::to_value(WaygateSettings::default())?;

    match std::fs::read_to_string(path) {
        Ok(content) => {
            let overlay: Value = serde_json::from_str(&content)?;
            debug!(config_path = %path.display(), "applying settings overlay");
            merge_value(&mut merged, overlay);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(config_path = %path.display(), "no settings overlay, starting from compiled defaults");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: WaygateSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Merge `overlay` over `target` and return the result.
///
/// Objects merge recursively; arrays and scalars replace; `null` overlay
/// values leave the target untouched.
#[must_use]
pub fn deep_merge(mut target: Value, overlay: Value) -> Value {
    merge_value(&mut target, overlay);
    target
}

/// In-place merge of one overlay value into its settings slot.
fn merge_value(target: &mut Value, overlay: Value) {
    if overlay.is_null() {
        return;
    }
    match (target, overlay) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    continue;
                }
                match base.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (slot, replacement) => *slot = replacement,
    }
}

/// Apply `WAYGATE_*` and upstream-credential env overrides in place.
fn apply_env_overrides(settings: &mut WaygateSettings) {
    if let Ok(v) = std::env::var("WAYGATE_ENV") {
        settings.environment = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_HOST") {
        settings.server.host = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_PORT") {
        if let Ok(port) = v.parse() {
            settings.server.port = port;
        }
    }
    if let Ok(v) = std::env::var("WAYGATE_BASE_URL") {
        settings.server.base_url = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_SERVICE_NAME") {
        settings.server.service_name = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_REDIS_URL") {
        settings.redis.url = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_REDIS_PREFIX") {
        settings.redis.key_prefix = v;
    }
    if let Ok(v) = std::env::var("GOOGLE_CLIENT_ID") {
        settings.upstream.client_id = v;
    }
    if let Ok(v) = std::env::var("GOOGLE_CLIENT_SECRET") {
        settings.upstream.client_secret = v;
    }
    if let Ok(v) = std::env::var("GOOGLE_REDIRECT_URI") {
        settings.upstream.redirect_uri = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_SECRET_ENDPOINT") {
        settings.secrets.endpoint = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_SECRET_NAME") {
        settings.secrets.secret_name = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_SECRET_REGION") {
        settings.secrets.region = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_TOKEN_ENCRYPTION_KEY") {
        settings.secrets.env_key = Some(v);
    }
    if let Ok(v) = std::env::var("WAYGATE_COOKIE_NAME") {
        settings.cookie.name = v;
    }
    if let Ok(v) = std::env::var("WAYGATE_COOKIE_DOMAIN") {
        settings.cookie.domain = Some(v);
    }
    if let Ok(v) = std::env::var("WAYGATE_METRICS_TOKEN") {
        settings.auth.metrics_auth_token = Some(v);
    }
    if let Ok(v) = std::env::var("WAYGATE_REDIRECT_WHITELIST") {
        settings.auth.redirect_whitelist = v
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
