//! Identity provider error types.

/// Errors from upstream identity provider calls.
#[derive(Debug, thiserror::Error)]
pub enum IdpError {
    /// HTTP transport failure (timeout, DNS, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider rejected the request.
    #[error("provider error ({status}): {message}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Provider-supplied error body (logged redacted upstream).
        message: String,
    },

    /// The provider response was not the expected shape.
    #[error("malformed provider response: {0}")]
    Malformed(String),
}
