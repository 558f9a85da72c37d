//! Shared state accessible from axum handlers.

use std::sync::Arc;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusHandle;

use waygate_idp::IdentityProvider;
use waygate_rpc::ToolDispatcher;
use waygate_store::{
    AuthCodeStore, BearerTokenStore, ClientRegistry, HealthTracker, RateLimiter, SessionStore,
};

use crate::config::ServerConfig;
use crate::shutdown::ShutdownCoordinator;
use crate::sse::SseManager;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session store (C3).
    pub sessions: Arc<SessionStore>,
    /// Authorization request/code store (C4a).
    pub codes: Arc<AuthCodeStore>,
    /// Dynamic client registry (C4b).
    pub clients: Arc<ClientRegistry>,
    /// Bearer token store (C5).
    pub tokens: Arc<BearerTokenStore>,
    /// Distributed rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Upstream identity provider.
    pub idp: Arc<dyn IdentityProvider>,
    /// Resource tool dispatcher.
    pub dispatcher: Arc<dyn ToolDispatcher>,
    /// SSE connection manager.
    pub sse: Arc<SseManager>,
    /// Server configuration.
    pub config: ServerConfig,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Redis health tracker.
    pub health: Arc<HealthTracker>,
    /// Prometheus metrics handle for rendering.
    pub metrics_handle: Arc<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

impl AppState {
    /// Whether a redirect URI passes the static whitelist or the dynamic
    /// registry for `client_id`.
    ///
    /// Checked before the upstream redirect is issued AND again in the
    /// callback; callers must not cache the result across those points.
    pub async fn redirect_uri_allowed(
        &self,
        client_id: Option<&str>,
        redirect_uri: &str,
    ) -> Result<bool, waygate_store::StoreError> {
        if self.config.whitelisted(redirect_uri) {
            return Ok(true);
        }
        match client_id {
            Some(id) => self.clients.validate_redirect_uri(id, redirect_uri).await,
            None => Ok(false),
        }
    }
}
