//! HTTP handlers and the helpers they share.

pub mod gdpr;
pub mod login;
pub mod mcp;
pub mod register;
pub mod token;
pub mod well_known;

use axum::http::HeaderMap;
use axum_extra::extract::cookie::{Cookie, SameSite};

use waygate_core::CoreError;
use waygate_core::ids::SessionId;
use waygate_store::LimiterKind;

use crate::error::ApiError;
use crate::metrics::RATE_LIMITED_TOTAL;
use crate::state::AppState;

/// Best-effort client address for rate-limit keys.
///
/// The gateway always sits behind a proxy in production, so
/// `X-Forwarded-For` wins; the literal `unknown` bucket catches the rest.
#[must_use]
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Run a named limiter and convert an exceeded window into a 429.
pub async fn enforce_limit(
    state: &AppState,
    kind: LimiterKind,
    key: &str,
) -> Result<(), ApiError> {
    let decision = state.limiter.check(kind, key).await?;
    if !decision.allowed {
        metrics::counter!(RATE_LIMITED_TOTAL, "scope" => kind.scope()).increment(1);
        return Err(ApiError(CoreError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        }));
    }
    Ok(())
}

/// Build the session cookie: `HttpOnly`, `SameSite=None` (the OAuth
/// redirect returns cross-site), `Secure` in production, `Path=/`.
#[must_use]
pub fn session_cookie(state: &AppState, session_id: &SessionId) -> Cookie<'static> {
    let mut cookie = Cookie::new(state.config.cookie_name.clone(), session_id.to_string());
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::None);
    cookie.set_secure(state.config.production);
    cookie.set_max_age(time::Duration::seconds(state.config.cookie_max_age_secs));
    if let Some(domain) = &state.config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookie
}

/// Build an expired cookie that clears the session cookie.
#[must_use]
pub fn clear_session_cookie(state: &AppState) -> Cookie<'static> {
    let mut cookie = Cookie::new(state.config.cookie_name.clone(), "");
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookie.set_same_site(SameSite::None);
    cookie.set_secure(state.config.production);
    cookie.set_max_age(time::Duration::seconds(0));
    cookie
}
