//! Settings error types.

/// Result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// Config file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file contained invalid JSON or a bad shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A setting failed validation.
    #[error("invalid setting {name}: {reason}")]
    Invalid {
        /// Setting path (e.g. `server.port`).
        name: String,
        /// What is wrong with it.
        reason: String,
    },
}
