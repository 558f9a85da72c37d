//! GDPR data export and erasure.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;
use tracing::info;

use waygate_core::CoreError;
use waygate_store::LimiterKind;

use super::{clear_session_cookie, enforce_limit};
use crate::auth::cookie_session;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/gdpr/user-data — export the caller's stored footprint.
pub async fn export_user_data(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let session = cookie_session(&state, &jar)
        .await
        .map_err(ApiError)?
        .filter(|s| s.authenticated)
        .ok_or(ApiError(CoreError::Unauthorized))?;
    enforce_limit(&state, LimiterKind::GdprExport, session.id.as_str()).await?;

    let tokens = state.tokens.list_for_session(session.id.as_str()).await?;
    Ok(Json(json!({
        "user_email": session.user_email,
        "session": {
            "id": session.id.as_str(),
            "createdAt": session.created_at,
            "expiresAt": session.expires_at,
            "lastAccessedAt": session.last_accessed_at,
            "metadata": session.metadata,
        },
        "tokens": tokens,
    }))
    .into_response())
}

/// DELETE /api/gdpr/user-data — erase the caller's sessions and tokens.
pub async fn delete_user_data(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let session = cookie_session(&state, &jar)
        .await
        .map_err(ApiError)?
        .filter(|s| s.authenticated)
        .ok_or(ApiError(CoreError::Unauthorized))?;
    enforce_limit(&state, LimiterKind::GdprDelete, session.id.as_str()).await?;

    let revoked = state.tokens.revoke_for_session(session.id.as_str()).await?;
    let _ = state.sessions.delete(&session.id).await?;
    info!(
        audit = true,
        event = "token_revoked",
        reason = "gdpr_erasure",
        session_id = %session.id,
        revoked,
        "user data erased"
    );

    let jar = jar.add(clear_session_cookie(&state));
    Ok((
        jar,
        Json(json!({ "success": true, "tokens_revoked": revoked })),
    )
        .into_response())
}
