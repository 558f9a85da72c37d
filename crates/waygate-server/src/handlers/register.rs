//! Dynamic client registration (RFC 7591).
//!
//! This endpoint is server-to-server: it must accept requests with no
//! `Origin` header in addition to browser preflights, so it sits under
//! the permissive CORS layer rather than any cookie/auth middleware.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{Value, json};

use waygate_core::{CoreError, RegisteredClient};
use waygate_store::ClientRegistrationRequest;

use crate::error::ApiError;
use crate::state::AppState;

/// POST /oauth/register — create a client.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<ClientRegistrationRequest>,
) -> Result<Response, ApiError> {
    if request.redirect_uris.is_empty() {
        return Err(ApiError::invalid_request("redirect_uris must be non-empty"));
    }
    if request.redirect_uris.iter().any(String::is_empty) {
        return Err(ApiError::invalid_request("redirect_uris must not contain empty entries"));
    }

    let client = state.clients.register(request).await?;
    let body = registration_response(&state, &client, true);
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// GET /oauth/register/:id — public view of a registration.
pub async fn get_registration(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Response, ApiError> {
    let client = state
        .clients
        .get(&client_id)
        .await?
        .ok_or_else(|| ApiError(CoreError::NotFound("client not found".into())))?;
    let body = registration_response(&state, &client.public_view(), false);
    Ok(Json(body).into_response())
}

/// DELETE /oauth/register/:id — remove a registration.
pub async fn delete_registration(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Response, ApiError> {
    let _ = state.clients.delete(&client_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// Build the RFC 7591 response document.
fn registration_response(state: &AppState, client: &RegisteredClient, include_secret: bool) -> Value {
    let mut body = json!({
        "client_id": client.client_id,
        "client_name": client.client_name,
        "redirect_uris": client.redirect_uris,
        "grant_types": client.grant_types,
        "response_types": client.response_types,
        "token_endpoint_auth_method": client.token_endpoint_auth_method,
        "client_id_issued_at": client.created_at / 1000,
        "registration_client_uri": format!(
            "{}/oauth/register/{}",
            state.config.base_url.trim_end_matches('/'),
            client.client_id
        ),
    });
    if include_secret {
        if let Some(secret) = &client.client_secret {
            body["client_secret"] = json!(secret);
            // Secrets never expire.
            body["client_secret_expires_at"] = json!(0);
        }
    }
    body
}
