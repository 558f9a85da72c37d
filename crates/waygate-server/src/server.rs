//! `WaygateServer` — axum router assembly and serving.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, instrument};

use waygate_core::constants::VERSION;

use crate::auth::bearer_token;
use crate::config::ServerConfig;
use crate::handlers::{gdpr, login, mcp, register, token, well_known};
use crate::html;
use crate::state::AppState;

/// Generates UUID request IDs for the `x-request-id` header.
#[derive(Clone)]
struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::new_v4().to_string();
        axum::http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// The gateway HTTP server.
pub struct WaygateServer {
    state: AppState,
}

impl WaygateServer {
    /// Wrap an assembled state.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// The shared state (stores, SSE manager, shutdown coordinator).
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the axum router with all routes and middleware.
    #[must_use]
    pub fn router(&self) -> Router {
        let token_body_limit = self.state.config.token_body_limit;
        let body_limit = self.state.config.body_limit;

        let mut router = Router::new()
            .route("/oauth2callback", get(login::callback));
        for alias in &self.state.config.callback_aliases {
            router = router.route(alias, get(login::callback));
        }

        router
            .route("/auth/login", get(login::login))
            .route("/auth/status", get(login::status))
            .route("/auth/logout", post(login::logout))
            .route(
                "/api/generate-token",
                post(token::generate_token).layer(DefaultBodyLimit::max(token_body_limit)),
            )
            .route(
                "/api/tokens",
                get(token::list_tokens).delete(token::revoke_all_tokens),
            )
            .route(
                "/api/token/{token}",
                get(token::get_token).delete(token::revoke_token),
            )
            .route(
                "/api/gdpr/user-data",
                get(gdpr::export_user_data).delete(gdpr::delete_user_data),
            )
            .route("/oauth/register", post(register::register))
            .route(
                "/oauth/register/{client_id}",
                get(register::get_registration).delete(register::delete_registration),
            )
            .route("/sse", get(mcp::sse_open))
            .route("/sse/stats", get(mcp::sse_stats))
            .route("/mcp/{connection_id}", post(mcp::rpc_over_sse))
            .route(
                "/mcp",
                get(mcp::streamable_get)
                    .post(mcp::streamable_post)
                    .delete(mcp::streamable_delete),
            )
            .route(
                "/.well-known/oauth-authorization-server",
                get(well_known::authorization_server),
            )
            .route(
                "/.well-known/oauth-protected-resource",
                get(well_known::protected_resource),
            )
            .route(
                "/.well-known/oauth-protected-resource/mcp",
                get(well_known::protected_resource),
            )
            .route(
                "/.well-known/openid-configuration",
                get(well_known::openid_configuration),
            )
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/test", get(test_page_handler))
            .with_state(self.state.clone())
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(RequestBodyLimitLayer::new(body_limit))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(30),
            ))
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
            // Registration is server-to-server (no Origin header); the
            // permissive layer also covers browser preflights.
            .layer(CorsLayer::permissive())
    }

    /// Bind and serve. Returns the bound address and the server task.
    #[instrument(skip_all, fields(host = %self.state.config.host, port = self.state.config.port))]
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, version = VERSION, "gateway started");

        let router = self.router();
        let shutdown_token = self.state.shutdown.token();
        let sse = self.state.sse.clone();
        sse.start_heartbeat();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }
}

/// GET /health.
async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let degraded = state.health.is_degraded();
    Json(json!({
        "status": if degraded { "degraded" } else { "ok" },
        "version": VERSION,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "sse_connections": state.sse.count(),
        "redis_degraded": degraded,
    }))
}

/// GET /metrics — Prometheus text format; bearer-gated in production.
async fn metrics_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.config.production {
        let expected = state.config.metrics_auth_token.as_deref();
        let presented = bearer_token(&headers);
        if expected.is_none() || presented != expected {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized" })),
            )
                .into_response();
        }
    }
    state.metrics_handle.render().into_response()
}

/// GET /test — minimal signed-in landing page.
async fn test_page_handler() -> Html<String> {
    Html(html::test_page())
}

/// Assemble the shared state from its parts.
///
/// Separated from [`WaygateServer::new`] so the binary and the tests
/// build states the same way.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn build_state(
    config: ServerConfig,
    sessions: Arc<waygate_store::SessionStore>,
    codes: Arc<waygate_store::AuthCodeStore>,
    clients: Arc<waygate_store::ClientRegistry>,
    tokens: Arc<waygate_store::BearerTokenStore>,
    limiter: Arc<waygate_store::RateLimiter>,
    idp: Arc<dyn waygate_idp::IdentityProvider>,
    dispatcher: Arc<dyn waygate_rpc::ToolDispatcher>,
    metrics_handle: Arc<PrometheusHandle>,
) -> AppState {
    let sse = Arc::new(crate::sse::SseManager::new(
        crate::sse::SseManagerConfig {
            max_total: config.sse_max_total,
            max_per_user: config.sse_max_per_user,
        },
        config.base_url.clone(),
    ));
    AppState {
        sessions,
        codes,
        clients,
        tokens,
        limiter,
        idp,
        dispatcher,
        sse,
        config,
        shutdown: Arc::new(crate::shutdown::ShutdownCoordinator::new()),
        health: Arc::new(waygate_store::HealthTracker::new()),
        metrics_handle,
        start_time: Instant::now(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use waygate_core::{OAuthTokens, Session};
    use waygate_crypto::TokenCipher;
    use waygate_idp::{IdentityProvider, IdpError, UserInfo};
    use waygate_rpc::{JsonRpcRequest, JsonRpcResponse, ToolDispatcher};
    use waygate_store::{
        AuthCodeStore, BearerTokenStore, ClientRegistry, MemoryKv, RateLimiter, SessionStore,
        SessionStoreConfig, SystemClock,
    };

    /// Scripted IdP: every exchange succeeds with fixed tokens.
    pub(crate) struct StubIdp;

    #[async_trait]
    impl IdentityProvider for StubIdp {
        fn auth_url(&self, state: &str) -> String {
            format!("https://idp.test/auth?state={state}")
        }

        async fn exchange(&self, code: &str) -> Result<OAuthTokens, IdpError> {
            if code == "bad-code" {
                return Err(IdpError::Provider {
                    status: 400,
                    message: "invalid_grant".into(),
                });
            }
            Ok(OAuthTokens {
                access_token: "ya29.test".into(),
                refresh_token: Some("1//test".into()),
                scope: Some("openid email".into()),
                token_type: Some("Bearer".into()),
                expiry_date: waygate_core::now_ms() + 3_600_000,
            })
        }

        async fn user_info(&self, _access_token: &str) -> Result<UserInfo, IdpError> {
            Ok(UserInfo {
                email: "user@example.com".into(),
                verified_email: true,
                name: None,
                picture: None,
            })
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<OAuthTokens, IdpError> {
            self.exchange("refresh").await
        }
    }

    /// Echo dispatcher used where tool output is irrelevant.
    pub(crate) struct EchoDispatcher;

    #[async_trait]
    impl ToolDispatcher for EchoDispatcher {
        async fn dispatch(&self, _session: &Session, request: JsonRpcRequest) -> JsonRpcResponse {
            JsonRpcResponse::success(
                request.id.unwrap_or(serde_json::Value::Null),
                serde_json::json!({ "echo": request.method }),
            )
        }
    }

    pub(crate) fn make_test_state() -> AppState {
        let kv = Arc::new(MemoryKv::new());
        let clock = Arc::new(SystemClock);
        let cipher = Arc::new(TokenCipher::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let handle = PrometheusBuilder::new().build_recorder().handle();

        build_state(
            ServerConfig::default(),
            Arc::new(SessionStore::new(
                kv.clone(),
                cipher,
                clock.clone(),
                SessionStoreConfig::default(),
            )),
            Arc::new(AuthCodeStore::new(kv.clone(), clock.clone())),
            Arc::new(ClientRegistry::new(kv.clone(), clock.clone())),
            Arc::new(BearerTokenStore::new(kv.clone(), clock.clone())),
            Arc::new(RateLimiter::new(kv)),
            Arc::new(StubIdp),
            Arc::new(EchoDispatcher),
            Arc::new(handle),
        )
    }

    fn make_server() -> WaygateServer {
        WaygateServer::new(make_test_state())
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["redis_degraded"], false);
    }

    #[tokio::test]
    async fn callback_alias_routes_like_callback() {
        let mut state = make_test_state();
        state.config.callback_aliases = vec!["/gmail/oauth2callback".to_string()];
        let app = WaygateServer::new(state).router();

        // Missing code/state renders the sanitized error page, proving
        // the alias hit the callback handler rather than a 404.
        let req = Request::builder()
            .uri("/gmail/oauth2callback")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn well_known_metadata_shape() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/.well-known/oauth-authorization-server")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["response_types_supported"][0], "code");
        assert_eq!(parsed["grant_types_supported"][0], "authorization_code");
        assert_eq!(parsed["code_challenge_methods_supported"][0], "S256");
        assert_eq!(parsed["token_endpoint_auth_methods_supported"][0], "none");
        assert!(parsed["issuer"].is_string());
    }

    #[tokio::test]
    async fn test_page_serves_html() {
        let app = make_server().router();
        let req = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_open_in_development() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_gated_in_production() {
        let mut state = make_test_state();
        state.config.production = true;
        state.config.metrics_auth_token = Some("metrics-secret".into());
        let app = WaygateServer::new(state).router();

        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .uri("/metrics")
            .header("authorization", "Bearer metrics-secret")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn status_unauthenticated() {
        let app = make_server().router();
        let req = Request::builder()
            .uri("/auth/status")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["authenticated"], false);
    }

    #[tokio::test]
    async fn sse_requires_auth() {
        let app = make_server().router();
        let req = Request::builder().uri("/sse").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn streamable_get_sends_challenge() {
        let app = make_server().router();
        let req = Request::builder().uri("/mcp").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let challenge = resp
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .unwrap();
        assert!(challenge.starts_with("Bearer resource_metadata="));
        assert!(challenge.contains("/.well-known/oauth-protected-resource/mcp"));
    }

    #[tokio::test]
    async fn registration_accepts_no_origin_request() {
        let app = make_server().router();
        let req = Request::builder()
            .method("POST")
            .uri("/oauth/register")
            .header("content-type", "application/json")
            .body(Body::from(
                r#"{"redirect_uris":["http://localhost:6274/cb"],"client_name":"Insp"}"#,
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let client_id = parsed["client_id"].as_str().unwrap();
        assert!(client_id.starts_with("mcp_"));
        assert_eq!(client_id.len(), 4 + 32);
        assert!(parsed.get("client_secret").is_none());
    }

    #[tokio::test]
    async fn registration_rejects_empty_redirects() {
        let app = make_server().router();
        let req = Request::builder()
            .method("POST")
            .uri("/oauth/register")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"redirect_uris":[]}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn server_listen_binds_and_shuts_down() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        server.state().shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("shutdown timed out")
            .expect("join error");
    }
}
