//! Input validation helpers for token-endpoint parameters.
//!
//! The length bounds are from RFC 6749/7636 practice: codes and client
//! ids are short opaque strings, redirect URIs can be long, and PKCE
//! verifiers are 43–128 characters by definition.

use waygate_core::CoreError;

/// Bounds for the `code` field.
pub const CODE_LEN: (usize, usize) = (1, 512);
/// Bounds for the `redirect_uri` field.
pub const REDIRECT_URI_LEN: (usize, usize) = (1, 2048);
/// Bounds for the `code_verifier` field.
pub const CODE_VERIFIER_LEN: (usize, usize) = (43, 128);
/// Bounds for the `client_id` field.
pub const CLIENT_ID_LEN: (usize, usize) = (1, 256);

/// Validate that a string field's byte length is within `[min, max]`.
pub fn validate_len(
    value: &str,
    name: &str,
    (min, max): (usize, usize),
) -> Result<(), CoreError> {
    let len = value.len();
    if len < min || len > max {
        return Err(CoreError::InvalidRequest(format!(
            "parameter '{name}' length {len} outside [{min}, {max}]"
        )));
    }
    Ok(())
}
