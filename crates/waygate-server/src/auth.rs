//! Dual (bearer-or-cookie) request authentication.
//!
//! Bearer wins when both credentials are present. A validated token is
//! only half the story: the owning session is re-read and must still be
//! authenticated, which closes the window where a token validates just
//! after its session was logged out.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, info};

use waygate_core::{CoreError, Session, SessionId};

use crate::state::AppState;

/// How a request authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// Session cookie.
    Cookie,
}

impl AuthMethod {
    /// Wire name for logs and response metadata.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bearer => "bearer",
            Self::Cookie => "cookie",
        }
    }
}

/// Authenticated request context attached by the dual-auth check.
#[derive(Clone, Debug)]
pub struct AuthContext {
    /// The resolved, authenticated session.
    pub session: Session,
    /// Which credential won.
    pub auth_method: AuthMethod,
}

/// Extract the bearer token from the `Authorization` header, if any.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Try both credentials; bearer first, cookie as fallback.
///
/// Returns `None` when neither yields an authenticated session (the
/// permissive "optional auth" behavior). [`require_auth`] turns that into
/// an error.
pub async fn optional_auth(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<Option<AuthContext>, CoreError> {
    if let Some(token) = bearer_token(headers) {
        match state.tokens.validate(token).await.map_err(CoreError::from)? {
            Some(session_id) => {
                let session = state
                    .sessions
                    .get(&SessionId::from_string(session_id))
                    .await
                    .map_err(CoreError::from)?;
                // The session is re-read after token validation; a token
                // whose session was deauthenticated is rejected here.
                if let Some(session) = session.filter(|s| s.authenticated) {
                    return Ok(Some(AuthContext {
                        session,
                        auth_method: AuthMethod::Bearer,
                    }));
                }
                debug!("bearer token valid but session unauthenticated");
            }
            None => debug!("bearer token not found or expired"),
        }
    }

    if let Some(cookie) = jar.get(&state.config.cookie_name) {
        let session = state
            .sessions
            .get(&SessionId::from_string(cookie.value().to_string()))
            .await
            .map_err(CoreError::from)?;
        if let Some(session) = session.filter(|s| s.authenticated) {
            return Ok(Some(AuthContext {
                session,
                auth_method: AuthMethod::Cookie,
            }));
        }
    }

    Ok(None)
}

/// Dual-auth check that fails with `Unauthorized` and an audit record.
pub async fn require_auth(
    state: &AppState,
    headers: &HeaderMap,
    jar: &CookieJar,
) -> Result<AuthContext, CoreError> {
    match optional_auth(state, headers, jar).await? {
        Some(ctx) => Ok(ctx),
        None => {
            info!(
                audit = true,
                event = "authentication_failed",
                reason = "no_valid_credentials",
                "request authentication failed"
            );
            Err(CoreError::Unauthorized)
        }
    }
}

/// Resolve the cookie session without requiring it to be authenticated.
///
/// Used by the endpoints that operate on the session itself (login
/// continuation, token issuance on the legacy path).
pub async fn cookie_session(
    state: &AppState,
    jar: &CookieJar,
) -> Result<Option<Session>, CoreError> {
    let Some(cookie) = jar.get(&state.config.cookie_name) else {
        return Ok(None);
    };
    state
        .sessions
        .get(&SessionId::from_string(cookie.value().to_string()))
        .await
        .map_err(CoreError::from)
}
