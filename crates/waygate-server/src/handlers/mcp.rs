//! The MCP transports: SSE, RPC-over-SSE, and Streamable HTTP.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use futures::StreamExt;
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use waygate_core::{ConnectionId, CoreError, Session, now_ms};
use waygate_rpc::{JsonRpcRequest, JsonRpcResponse};
use waygate_store::LimiterKind;

use super::enforce_limit;
use crate::auth::{AuthContext, optional_auth, require_auth};
use crate::error::ApiError;
use crate::metrics::RPC_REQUESTS_TOTAL;
use crate::state::AppState;

/// Header carrying the Streamable HTTP stream identity.
const MCP_SESSION_HEADER: &str = "mcp-session-id";

/// GET /sse — open an event stream for the authenticated user.
pub async fn sse_open(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let ctx = require_auth(&state, &headers, &jar).await.map_err(ApiError)?;
    let email = user_email(&ctx)?;
    enforce_limit(&state, LimiterKind::Sse, &email).await?;

    let (id, rx) = state.sse.connect(&email).map_err(ApiError)?;
    debug!(connection_id = %id, "SSE stream opened");
    Ok(stream_response(rx, None))
}

/// GET /sse/stats — connection counts for the authenticated user.
pub async fn sse_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    let ctx = require_auth(&state, &headers, &jar).await.map_err(ApiError)?;
    let email = user_email(&ctx)?;
    let stats = state.sse.stats();
    let connections = state.sse.user_connections(&email);
    let user_count = connections.len();
    Ok(Json(json!({
        "total": stats.total,
        "user": email,
        "user_connections": connections,
        "user_count": user_count,
    }))
    .into_response())
}

/// POST /mcp/:connectionId — JSON-RPC request answered over the SSE
/// stream, with an HTTP fallback when the stream write fails.
pub async fn rpc_over_sse(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let request = match parse_rpc(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let request_id = request.id.clone().unwrap_or(Value::Null);

    let ctx = match require_auth(&state, &headers, &jar).await {
        Ok(ctx) => ctx,
        Err(_) => return rpc_unauthorized(request_id),
    };
    if let Err(resp) = rpc_rate_limit(&state, &ctx, &request_id).await {
        return resp;
    }

    let connection_id = ConnectionId::from_string(connection_id);
    let owner = state.sse.owner_of(&connection_id);
    if owner.as_deref() != ctx.session.user_email.as_deref() || owner.is_none() {
        return (
            StatusCode::FORBIDDEN,
            Json(JsonRpcResponse::error(
                request_id,
                waygate_rpc::FORBIDDEN,
                "Connection does not belong to this user",
            )),
        )
            .into_response();
    }

    metrics::counter!(RPC_REQUESTS_TOTAL, "transport" => "sse").increment(1);
    let session = ensure_fresh_tokens(&state, ctx.session).await;
    let response = state.dispatcher.dispatch(&session, request).await;
    let json = match serde_json::to_string(&response) {
        Ok(j) => j,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(JsonRpcResponse::error(
                    Value::Null,
                    waygate_rpc::INTERNAL_ERROR,
                    "Response serialization failed",
                )),
            )
                .into_response();
        }
    };

    if state.sse.send_message(&connection_id, &json) {
        (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
    } else {
        // Stream is gone; answer over plain HTTP instead.
        Json(response).into_response()
    }
}

/// GET /mcp — Streamable HTTP negotiation.
///
/// Unauthenticated requests get a `WWW-Authenticate` challenge pointing
/// at the protected-resource metadata; authenticated requests open a
/// stream identified by `Mcp-Session-Id`.
pub async fn streamable_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let ctx = match optional_auth(&state, &headers, &jar).await {
        Ok(ctx) => ctx,
        Err(e) => return ApiError(e).into_response(),
    };
    let Some(ctx) = ctx else {
        let challenge = format!(
            "Bearer resource_metadata=\"{}/.well-known/oauth-protected-resource/mcp\"",
            state.config.base_url.trim_end_matches('/')
        );
        return Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::WWW_AUTHENTICATE, challenge)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"error":"unauthorized"}"#))
            .unwrap_or_else(|_| StatusCode::UNAUTHORIZED.into_response());
    };

    let email = match user_email(&ctx) {
        Ok(e) => e,
        Err(e) => return e.into_response(),
    };
    if let Err(e) = enforce_limit(&state, LimiterKind::Sse, &email).await {
        return e.into_response();
    }
    match state.sse.connect(&email) {
        Ok((id, rx)) => stream_response(rx, Some(&id)),
        Err(e) => ApiError(e).into_response(),
    }
}

/// POST /mcp — Streamable HTTP request body.
pub async fn streamable_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let request = match parse_rpc(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let request_id = request.id.clone().unwrap_or(Value::Null);

    let ctx = match require_auth(&state, &headers, &jar).await {
        Ok(ctx) => ctx,
        Err(_) => return rpc_unauthorized(request_id),
    };
    if let Err(resp) = rpc_rate_limit(&state, &ctx, &request_id).await {
        return resp;
    }

    metrics::counter!(RPC_REQUESTS_TOTAL, "transport" => "streamable").increment(1);
    let session = ensure_fresh_tokens(&state, ctx.session).await;
    let response = state.dispatcher.dispatch(&session, request).await;

    // With a live stream the response multiplexes back over SSE.
    if let Some(stream_id) = headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        let connection_id = ConnectionId::from_string(stream_id.to_string());
        if state.sse.owner_of(&connection_id).as_deref() == session.user_email.as_deref() {
            if let Ok(json) = serde_json::to_string(&response) {
                if state.sse.send_message(&connection_id, &json) {
                    return (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" })))
                        .into_response();
                }
            }
        }
    }
    Json(response).into_response()
}

/// DELETE /mcp — Streamable HTTP teardown.
pub async fn streamable_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let ctx = match require_auth(&state, &headers, &jar).await {
        Ok(ctx) => ctx,
        Err(e) => return ApiError(e).into_response(),
    };
    let Some(stream_id) = headers
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    else {
        return ApiError::invalid_request("Mcp-Session-Id header is required").into_response();
    };

    let connection_id = ConnectionId::from_string(stream_id.to_string());
    match state.sse.owner_of(&connection_id) {
        Some(owner) if Some(owner.as_str()) == ctx.session.user_email.as_deref() => {
            let _ = state.sse.remove(&connection_id);
            StatusCode::NO_CONTENT.into_response()
        }
        Some(_) => ApiError(CoreError::Forbidden).into_response(),
        None => ApiError(CoreError::NotFound("stream not found".into())).into_response(),
    }
}

/// Refresh expired upstream tokens before dispatch.
///
/// Best effort: a failed refresh leaves the session as-is and lets the
/// tool backend surface the upstream rejection.
async fn ensure_fresh_tokens(state: &AppState, session: Session) -> Session {
    let Some(tokens) = &session.tokens else {
        return session;
    };
    if !tokens.is_expired(now_ms()) {
        return session;
    }
    let Some(refresh_token) = tokens.refresh_token.clone() else {
        return session;
    };
    match state.idp.refresh(&refresh_token).await {
        Ok(fresh) => {
            match state
                .sessions
                .store_tokens(&session.id, fresh, session.user_email.clone())
                .await
            {
                Ok(Some(updated)) => updated,
                _ => session,
            }
        }
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "upstream token refresh failed");
            session
        }
    }
}

fn user_email(ctx: &AuthContext) -> Result<String, ApiError> {
    ctx.session
        .user_email
        .clone()
        .ok_or_else(|| ApiError(CoreError::Unauthorized))
}

fn parse_rpc(body: &Bytes) -> Result<JsonRpcRequest, Response> {
    let request: JsonRpcRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(_) => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(JsonRpcResponse::error(
                    Value::Null,
                    waygate_rpc::PARSE_ERROR,
                    "Request body is not valid JSON-RPC",
                )),
            )
                .into_response());
        }
    };
    if !request.is_valid() {
        let id = request.id.clone().unwrap_or(Value::Null);
        return Err((
            StatusCode::BAD_REQUEST,
            Json(JsonRpcResponse::error(
                id,
                waygate_rpc::INVALID_REQUEST,
                "jsonrpc must be \"2.0\" and method must be present",
            )),
        )
            .into_response());
    }
    Ok(request)
}

fn rpc_unauthorized(request_id: Value) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(JsonRpcResponse::unauthorized(request_id)),
    )
        .into_response()
}

async fn rpc_rate_limit(
    state: &AppState,
    ctx: &AuthContext,
    request_id: &Value,
) -> Result<(), Response> {
    match enforce_limit(state, LimiterKind::Api, ctx.session.id.as_str()).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let status = e.status();
            Err((
                status,
                Json(JsonRpcResponse::error(
                    request_id.clone(),
                    waygate_rpc::RATE_LIMITED,
                    "Rate limit exceeded",
                )),
            )
                .into_response())
        }
    }
}

/// Wrap a frame channel into a `text/event-stream` response.
fn stream_response(
    rx: tokio::sync::mpsc::Receiver<String>,
    stream_id: Option<&ConnectionId>,
) -> Response {
    let stream = ReceiverStream::new(rx).map(|frame| Ok::<_, std::convert::Infallible>(frame));
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-accel-buffering", "no");
    if let Some(id) = stream_id {
        builder = builder.header(MCP_SESSION_HEADER, id.as_str());
    }
    builder
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
