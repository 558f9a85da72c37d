//! OAuth kickoff, provider callback, status, and logout.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use urlencoding::encode;

use waygate_core::{AuthzRequest, CoreError, SessionId, SessionMetadata};
use waygate_store::{CreateSessionOptions, LimiterKind};

use super::{clear_session_cookie, client_ip, enforce_limit, session_cookie};
use crate::auth::{cookie_session, optional_auth};
use crate::error::ApiError;
use crate::html;
use crate::metrics::{OAUTH_FLOWS_TOTAL, TOKENS_ISSUED_TOTAL};
use crate::state::AppState;

/// Query parameters accepted by `GET /auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginParams {
    redirect_uri: Option<String>,
    client_id: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    state: Option<String>,
    response_type: Option<String>,
}

/// Query parameters delivered to `GET /oauth2callback`.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /auth/login — create a session and bounce to the provider consent
/// screen.
pub async fn login(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    enforce_limit(&state, LimiterKind::Auth, &client_ip(&headers)).await?;

    if let Some(redirect_uri) = &params.redirect_uri {
        let allowed = state
            .redirect_uri_allowed(params.client_id.as_deref(), redirect_uri)
            .await?;
        if !allowed {
            info!(
                audit = true,
                event = "authentication_failed",
                reason = "redirect_uri_rejected",
                redirect_uri,
                "login rejected: redirect URI not whitelisted or registered"
            );
            return Err(ApiError::invalid_request(
                "redirect_uri is not registered for this client",
            ));
        }
    }

    let pkce = params.client_id.is_some()
        && params.redirect_uri.is_some()
        && params.code_challenge.is_some();

    if pkce {
        // Only S256 is supported; "plain" is rejected at ingest.
        if let Some(method) = &params.code_challenge_method {
            if method != "S256" {
                return Err(ApiError::invalid_request(
                    "code_challenge_method must be S256",
                ));
            }
        }
    }

    let metadata = SessionMetadata {
        user_agent: headers
            .get("user-agent")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        ip_address: Some(client_ip(&headers)),
        redirect_uri: params.redirect_uri.clone(),
        is_pkce_flow: pkce,
        client_id: params.client_id.clone(),
        grant_type: None,
    };
    let session = state
        .sessions
        .create(CreateSessionOptions {
            ttl_ms: None,
            metadata,
        })
        .await?;

    if pkce {
        let request = AuthzRequest {
            client_id: params.client_id.clone().unwrap_or_default(),
            redirect_uri: params.redirect_uri.clone().unwrap_or_default(),
            state: params.state.clone(),
            code_challenge: params.code_challenge.clone().unwrap_or_default(),
            code_challenge_method: params
                .code_challenge_method
                .clone()
                .unwrap_or_else(|| "S256".to_string()),
            response_type: params
                .response_type
                .clone()
                .unwrap_or_else(|| "code".to_string()),
        };
        state.codes.store_request(&session.id, &request).await?;
    }

    let jar = jar.add(session_cookie(&state, &session.id));
    let auth_url = state.idp.auth_url(session.id.as_str());
    info!(session_id = %session.id, pkce, "login redirecting to provider");
    Ok((jar, found(&auth_url)).into_response())
}

/// GET /oauth2callback — finish the provider round trip.
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Successful callbacks are excluded from the auth limiter: peek at
    // entry, record a hit only on the failure paths below.
    let ip = client_ip(&headers);
    let decision = state.limiter.peek(LimiterKind::Auth, &ip).await?;
    if !decision.allowed {
        return Err(ApiError(CoreError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        }));
    }

    if let Some(error) = &params.error {
        let _ = state.limiter.record(LimiterKind::Auth, &ip).await;
        warn!(
            audit = true,
            event = "authentication_failed",
            reason = "provider_error",
            provider_error = %error,
            "provider returned an OAuth error"
        );
        metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "error", "flow_type" => "upstream")
            .increment(1);
        return Ok(render_error(
            "Authorization failed",
            error,
            params.error_description.as_deref(),
        ));
    }

    let (Some(code), Some(session_state)) = (&params.code, &params.state) else {
        let _ = state.limiter.record(LimiterKind::Auth, &ip).await;
        return Ok(render_error(
            "Invalid callback",
            "missing code or state parameter",
            None,
        ));
    };

    let session_id = SessionId::from_string(session_state.clone());
    let Some(session) = state.sessions.get(&session_id).await? else {
        let _ = state.limiter.record(LimiterKind::Auth, &ip).await;
        metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "error", "flow_type" => "unknown")
            .increment(1);
        return Ok(render_error(
            "Session expired",
            "your login session was not found or has expired",
            None,
        ));
    };

    let tokens = match state.idp.exchange(code).await {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "provider code exchange failed");
            let _ = state.limiter.record(LimiterKind::Auth, &ip).await;
            metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "error", "flow_type" => "exchange")
                .increment(1);
            return Ok(render_error(
                "Authorization failed",
                "could not exchange the authorization code",
                None,
            ));
        }
    };
    let user = match state.idp.user_info(&tokens.access_token).await {
        Ok(u) => u,
        Err(e) => {
            warn!(error = %e, "userinfo fetch failed");
            let _ = state.limiter.record(LimiterKind::Auth, &ip).await;
            metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "error", "flow_type" => "userinfo")
                .increment(1);
            return Ok(render_error(
                "Authorization failed",
                "could not resolve the signed-in account",
                None,
            ));
        }
    };

    let _ = state
        .sessions
        .store_tokens(&session_id, tokens.clone(), Some(user.email.clone()))
        .await?;

    // PKCE branch: mint a downstream authorization code and bounce back
    // to the client.
    if session.metadata.is_pkce_flow {
        let Some(request) = state.codes.get_request(&session_id).await? else {
            let _ = state.limiter.record(LimiterKind::Auth, &ip).await;
            metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "error", "flow_type" => "pkce")
                .increment(1);
            return Ok(render_error(
                "Session expired",
                "the authorization request was not found or has expired",
                None,
            ));
        };

        // Second validation: the callback must not trust the check done
        // at login time.
        let allowed = state
            .redirect_uri_allowed(Some(&request.client_id), &request.redirect_uri)
            .await?;
        if !allowed {
            info!(
                audit = true,
                event = "authentication_failed",
                reason = "redirect_uri_rejected_at_callback",
                "callback rejected: redirect URI no longer valid"
            );
            let _ = state.limiter.record(LimiterKind::Auth, &ip).await;
            metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "error", "flow_type" => "pkce")
                .increment(1);
            return Ok(render_error(
                "Authorization failed",
                "redirect URI is not registered for this client",
                None,
            ));
        }

        let authz_code = state
            .codes
            .generate(waygate_store::authcode::AuthzCodeParams {
                client_id: request.client_id.clone(),
                redirect_uri: request.redirect_uri.clone(),
                code_challenge: request.code_challenge.clone(),
                code_challenge_method: request.code_challenge_method.clone(),
                state: request.state.clone(),
                user_email: user.email.clone(),
                google_access_token: tokens.access_token.clone(),
                google_refresh_token: tokens.refresh_token.clone(),
            })
            .await?;
        let _ = state.codes.delete_request(&session_id).await?;

        let mut location = format!(
            "{}?code={}",
            request.redirect_uri,
            encode(&authz_code)
        );
        if let Some(client_state) = &request.state {
            location.push_str(&format!("&state={}", encode(client_state)));
        }
        metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "success", "flow_type" => "pkce")
            .increment(1);
        return Ok(found(&location));
    }

    // Legacy branch: a stored redirect URI without PKCE gets a bearer
    // token directly in the fragment-free query string.
    if let Some(redirect_uri) = &session.metadata.redirect_uri {
        let allowed = state.redirect_uri_allowed(None, redirect_uri).await?;
        if !allowed {
            let _ = state.limiter.record(LimiterKind::Auth, &ip).await;
            metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "error", "flow_type" => "legacy")
                .increment(1);
            return Ok(render_error(
                "Authorization failed",
                "redirect URI is no longer whitelisted",
                None,
            ));
        }
        let token = state.tokens.generate(session_id.as_str()).await?;
        metrics::counter!(TOKENS_ISSUED_TOTAL).increment(1);
        metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "success", "flow_type" => "legacy")
            .increment(1);
        let location = format!(
            "{redirect_uri}?access_token={}&token_type=Bearer",
            encode(&token)
        );
        return Ok(found(&location));
    }

    // Default branch: plain cookie login.
    metrics::counter!(OAUTH_FLOWS_TOTAL, "status" => "success", "flow_type" => "cookie")
        .increment(1);
    Ok(found("/test"))
}

/// GET /auth/status — report the caller's authentication state.
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let ctx = optional_auth(&state, &headers, &jar)
        .await
        .map_err(ApiError)?;
    let body = match ctx {
        Some(ctx) => json!({
            "authenticated": true,
            "auth_method": ctx.auth_method.as_str(),
            "user_email": ctx.session.user_email,
            "expires_at": ctx.session.expires_at,
        }),
        None => json!({ "authenticated": false }),
    };
    Ok(axum::Json(body).into_response())
}

/// POST /auth/logout — revoke the session's tokens and delete it.
pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let mut revoked = 0;
    if let Some(session) = cookie_session(&state, &jar).await.map_err(ApiError)? {
        revoked = state.tokens.revoke_for_session(session.id.as_str()).await?;
        let _ = state.sessions.delete(&session.id).await?;
        info!(session_id = %session.id, revoked, "session logged out");
    }
    let jar = jar.add(clear_session_cookie(&state));
    Ok((
        jar,
        axum::Json(json!({ "success": true, "tokens_revoked": revoked })),
    )
        .into_response())
}

/// 302 Found redirect (the OAuth flows use the classic code).
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

fn render_error(title: &str, message: &str, detail: Option<&str>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Html(html::error_page(title, message, detail)),
    )
        .into_response()
}
