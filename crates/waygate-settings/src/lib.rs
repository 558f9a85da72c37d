//! # waygate-settings
//!
//! Configuration management with layered sources for the Waygate gateway.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`WaygateSettings::default()`]
//! 2. **Config file** — JSON, path from `WAYGATE_CONFIG` (deep-merged over
//!    defaults)
//! 3. **Environment variables** — `WAYGATE_*` / upstream OAuth credentials
//!    (highest priority)
//!
//! The gateway is deployed as a fleet of near-identical services (drive,
//! forms, gmail, calendar); per-service differences — cookie name, Redis
//! key prefix, OAuth scopes, callback aliases — are all plain settings.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<WaygateSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from the `WAYGATE_CONFIG` file (if set)
/// with env var overrides. On subsequent calls, returns the cached value.
/// If loading fails, returns compiled defaults.
pub fn get_settings() -> &'static WaygateSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: WaygateSettings) -> std::result::Result<(), WaygateSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
