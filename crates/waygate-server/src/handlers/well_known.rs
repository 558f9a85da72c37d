//! RFC 8414 / OpenID discovery documents.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

fn base(state: &AppState) -> String {
    state.config.base_url.trim_end_matches('/').to_string()
}

/// GET /.well-known/oauth-authorization-server.
pub async fn authorization_server(State(state): State<AppState>) -> Response {
    let base = base(&state);
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/auth/login"),
        "token_endpoint": format!("{base}/api/generate-token"),
        "registration_endpoint": format!("{base}/oauth/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "token_endpoint_auth_methods_supported": ["none"],
        "code_challenge_methods_supported": ["S256"],
    }))
    .into_response()
}

/// GET /.well-known/oauth-protected-resource and its `/mcp` variant.
pub async fn protected_resource(State(state): State<AppState>) -> Response {
    let base = base(&state);
    Json(json!({
        "resource": format!("{base}/mcp"),
        "authorization_servers": [base],
        "bearer_methods_supported": ["header"],
    }))
    .into_response()
}

/// GET /.well-known/openid-configuration.
pub async fn openid_configuration(State(state): State<AppState>) -> Response {
    let base = base(&state);
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/auth/login"),
        "token_endpoint": format!("{base}/api/generate-token"),
        "registration_endpoint": format!("{base}/oauth/register"),
        "userinfo_endpoint": format!("{base}/auth/status"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code"],
        "subject_types_supported": ["public"],
        "token_endpoint_auth_methods_supported": ["none"],
        "code_challenge_methods_supported": ["S256"],
        "scopes_supported": ["openid", "email", "profile"],
    }))
    .into_response()
}
