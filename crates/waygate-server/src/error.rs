//! HTTP error mapping.
//!
//! [`ApiError`] wraps the core taxonomy and renders OAuth-shaped JSON
//! bodies. RPC endpoints render their own JSON-RPC error shapes instead;
//! this type covers everything else. Internal detail never reaches the
//! response body — `server_error` is deliberately generic.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use waygate_core::CoreError;
use waygate_store::StoreError;

/// Error wrapper rendered as an OAuth-shaped JSON response.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

impl ApiError {
    /// Shortcut for a 400 `invalid_request`.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self(CoreError::InvalidRequest(message.into()))
    }

    /// HTTP status for the wrapped error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            CoreError::InvalidRequest(_) | CoreError::InvalidGrant => StatusCode::BAD_REQUEST,
            CoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            CoreError::Forbidden => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::Capacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Crypto | CoreError::Upstream(_) | CoreError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self.0 {
            CoreError::RateLimited { retry_after_secs } => json!({
                "error": self.0.oauth_code(),
                "error_description": "Too many requests",
                "retry_after": retry_after_secs,
            }),
            CoreError::Crypto | CoreError::Upstream(_) | CoreError::Internal(_) => {
                // Log the detail, send a generic body.
                error!(error = %self.0, "internal error");
                json!({
                    "error": "server_error",
                    "error_description": "An internal error occurred",
                })
            }
            CoreError::InvalidGrant => json!({
                "error": "invalid_grant",
                "error_description": "Authorization code is invalid, expired, or already used",
            }),
            other => json!({
                "error": other.oauth_code(),
                "error_description": other.to_string(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e.into())
    }
}
