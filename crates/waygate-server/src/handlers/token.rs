//! First-party token issuance and management.
//!
//! `POST /api/generate-token` accepts both JSON and form-urlencoded
//! bodies (RFC 6749 token endpoints must take forms). The
//! authorization_code grant redeems a PKCE code into a fresh session plus
//! a bearer token; the legacy path mints a token for an existing
//! cookie-authenticated session.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use tracing::info;

use waygate_core::constants::BEARER_TOKEN_TTL_SECS;
use waygate_core::{CoreError, OAuthTokens, SessionMetadata, now_ms};
use waygate_rpc::validation::{
    CLIENT_ID_LEN, CODE_LEN, CODE_VERIFIER_LEN, REDIRECT_URI_LEN, validate_len,
};
use waygate_store::{CreateSessionOptions, LimiterKind};

use super::{client_ip, enforce_limit};
use crate::auth::cookie_session;
use crate::error::ApiError;
use crate::metrics::{TOKENS_ISSUED_TOTAL, TOKENS_REVOKED_TOTAL};
use crate::state::AppState;

/// Upstream access tokens exchanged through an authorization code carry
/// no expiry hint; assume the provider default of one hour.
const ASSUMED_UPSTREAM_TTL_MS: i64 = 3_600_000;

/// POST /api/generate-token.
pub async fn generate_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Result<Response, ApiError> {
    enforce_limit(&state, LimiterKind::Token, &client_ip(&headers)).await?;

    let fields = parse_body(&headers, &body)?;

    if fields.get("grant_type").map(String::as_str) == Some("authorization_code") {
        return exchange_code(&state, &fields).await;
    }
    legacy_cookie_grant(&state, &jar).await
}

/// The authorization_code grant: redeem a PKCE code.
async fn exchange_code(
    state: &AppState,
    fields: &HashMap<String, String>,
) -> Result<Response, ApiError> {
    let code = require_field(fields, "code", CODE_LEN)?;
    let redirect_uri = require_field(fields, "redirect_uri", REDIRECT_URI_LEN)?;
    let code_verifier = require_field(fields, "code_verifier", CODE_VERIFIER_LEN)?;
    let client_id = require_field(fields, "client_id", CLIENT_ID_LEN)?;

    let Some(record) = state
        .codes
        .validate_and_consume(code, client_id, redirect_uri, code_verifier)
        .await?
    else {
        info!(
            audit = true,
            event = "authentication_failed",
            reason = "invalid_grant",
            "authorization code redemption failed"
        );
        return Err(ApiError(CoreError::InvalidGrant));
    };

    // A fresh session for the redeemed grant; the login session that
    // brokered the consent stays untouched.
    let session = state
        .sessions
        .create(CreateSessionOptions {
            ttl_ms: None,
            metadata: SessionMetadata {
                client_id: Some(record.client_id.clone()),
                grant_type: Some("authorization_code".into()),
                is_pkce_flow: true,
                ..Default::default()
            },
        })
        .await?;
    let tokens = OAuthTokens {
        access_token: record.google_access_token.clone(),
        refresh_token: record.google_refresh_token.clone(),
        scope: None,
        token_type: Some("Bearer".into()),
        expiry_date: now_ms() + ASSUMED_UPSTREAM_TTL_MS,
    };
    let _ = state
        .sessions
        .store_tokens(&session.id, tokens, Some(record.user_email.clone()))
        .await?;

    let token = state.tokens.generate(session.id.as_str()).await?;
    metrics::counter!(TOKENS_ISSUED_TOTAL).increment(1);
    info!(session_id = %session.id, "bearer token issued via authorization_code");

    Ok(Json(json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": BEARER_TOKEN_TTL_SECS,
    }))
    .into_response())
}

/// The legacy path: mint a token for the cookie session.
async fn legacy_cookie_grant(state: &AppState, jar: &CookieJar) -> Result<Response, ApiError> {
    let session = cookie_session(state, jar)
        .await
        .map_err(ApiError)?
        .filter(|s| s.authenticated)
        .ok_or(ApiError(CoreError::Unauthorized))?;

    let token = state.tokens.generate(session.id.as_str()).await?;
    metrics::counter!(TOKENS_ISSUED_TOTAL).increment(1);
    let data = state.tokens.get_data(&token).await?;

    Ok(Json(json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": BEARER_TOKEN_TTL_SECS,
        "token": data.map(|d| json!({
            "createdAt": d.created_at,
            "expiresAt": d.expires_at,
        })),
    }))
    .into_response())
}

/// GET /api/tokens — list the cookie session's tokens (metadata only).
pub async fn list_tokens(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let session = require_cookie_session(&state, &jar).await?;
    let tokens = state.tokens.list_for_session(session.id.as_str()).await?;
    let count = tokens.len();
    Ok(Json(json!({ "tokens": tokens, "count": count })).into_response())
}

/// DELETE /api/tokens — bulk revoke the cookie session's tokens.
pub async fn revoke_all_tokens(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let session = require_cookie_session(&state, &jar).await?;
    let count = state.tokens.revoke_for_session(session.id.as_str()).await?;
    metrics::counter!(TOKENS_REVOKED_TOTAL).increment(count as u64);
    Ok(Json(json!({ "count": count })).into_response())
}

/// GET /api/token/:token — inspect one token (same-session only).
pub async fn get_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let session = require_cookie_session(&state, &jar).await?;
    let data = state
        .tokens
        .get_data(&token)
        .await?
        .ok_or_else(|| ApiError(CoreError::NotFound("token not found".into())))?;
    if data.session_id != session.id.as_str() {
        return Err(ApiError(CoreError::Forbidden));
    }
    Ok(Json(json!({
        "tokenPrefix": waygate_core::redact::mask_token(&data.token),
        "sessionId": data.session_id,
        "createdAt": data.created_at,
        "expiresAt": data.expires_at,
    }))
    .into_response())
}

/// DELETE /api/token/:token — revoke one token (same-session only).
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let session = require_cookie_session(&state, &jar).await?;
    let data = state
        .tokens
        .get_data(&token)
        .await?
        .ok_or_else(|| ApiError(CoreError::NotFound("token not found".into())))?;
    if data.session_id != session.id.as_str() {
        return Err(ApiError(CoreError::Forbidden));
    }
    let _ = state.tokens.revoke(&token).await?;
    metrics::counter!(TOKENS_REVOKED_TOTAL).increment(1);
    Ok((StatusCode::OK, Json(json!({ "success": true }))).into_response())
}

async fn require_cookie_session(
    state: &AppState,
    jar: &CookieJar,
) -> Result<waygate_core::Session, ApiError> {
    cookie_session(state, jar)
        .await
        .map_err(ApiError)?
        .filter(|s| s.authenticated)
        .ok_or(ApiError(CoreError::Unauthorized))
}

fn require_field<'a>(
    fields: &'a HashMap<String, String>,
    name: &str,
    bounds: (usize, usize),
) -> Result<&'a str, ApiError> {
    let value = fields
        .get(name)
        .ok_or_else(|| ApiError::invalid_request(format!("missing parameter '{name}'")))?;
    validate_len(value, name, bounds).map_err(ApiError)?;
    Ok(value)
}

/// Parse a JSON or form-urlencoded body into a flat string map.
fn parse_body(headers: &HeaderMap, body: &Bytes) -> Result<HashMap<String, String>, ApiError> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|_| ApiError::invalid_request("body is not valid JSON"))?;
        let object = value
            .as_object()
            .ok_or_else(|| ApiError::invalid_request("body must be a JSON object"))?;
        return Ok(object
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect());
    }

    if content_type.starts_with("application/x-www-form-urlencoded") || content_type.is_empty() {
        let text = std::str::from_utf8(body)
            .map_err(|_| ApiError::invalid_request("body is not valid UTF-8"))?;
        return Ok(parse_form(text));
    }

    Err(ApiError::invalid_request(
        "content type must be application/json or application/x-www-form-urlencoded",
    ))
}

/// Decode `k=v&k2=v2` with percent-escapes and `+` as space.
fn parse_form(text: &str) -> HashMap<String, String> {
    text.split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let k_spaced = k.replace('+', " ");
            let v_spaced = v.replace('+', " ");
            let key = urlencoding::decode(&k_spaced).ok()?;
            let value = urlencoding::decode(&v_spaced).ok()?;
            Some((key.into_owned(), value.into_owned()))
        })
        .collect()
}
