//! # waygate-gateway
//!
//! Gateway server binary — loads settings, connects Redis, resolves the
//! data-encryption key, wires the stores and the Google IdP into the
//! HTTP server, and runs until SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use waygate_core::Session;
use waygate_core::constants::MCP_PROTOCOL_VERSION;
use waygate_crypto::TokenCipher;
use waygate_idp::GoogleIdp;
use waygate_rpc::{JsonRpcRequest, JsonRpcResponse, ToolDispatcher};
use waygate_secrets::SecretProvider;
use waygate_server::config::ServerConfig;
use waygate_server::server::{WaygateServer, build_state};
use waygate_settings::{WaygateSettings, load_settings, load_settings_from_path};
use waygate_store::{
    AuthCodeStore, BearerTokenStore, ClientRegistry, HealthTracker, Kv, RateLimiter, RedisKv,
    SessionStore, SessionStoreConfig, SystemClock, TrackedKv,
};

/// Waygate gateway server.
#[derive(Parser, Debug)]
#[command(name = "waygate-gateway", about = "OAuth + MCP gateway server")]
struct Cli {
    /// Host to bind (overrides settings if specified).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings if specified).
    #[arg(long)]
    port: Option<u16>,

    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Baseline MCP dispatcher: handshake methods only.
///
/// Per-service deployments (drive, forms, gmail, calendar) replace this
/// with their tool backends; the gateway core only guarantees the
/// session it hands over is authenticated.
struct CoreDispatcher;

#[async_trait]
impl ToolDispatcher for CoreDispatcher {
    async fn dispatch(&self, _session: &Session, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.unwrap_or(serde_json::Value::Null);
        match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                serde_json::json!({
                    "protocolVersion": MCP_PROTOCOL_VERSION,
                    "capabilities": { "tools": {} },
                    "serverInfo": {
                        "name": "waygate",
                        "version": waygate_core::constants::VERSION,
                    },
                }),
            ),
            "tools/list" => {
                JsonRpcResponse::success(id, serde_json::json!({ "tools": [] }))
            }
            "resources/list" => {
                JsonRpcResponse::success(id, serde_json::json!({ "resources": [] }))
            }
            "prompts/list" => {
                JsonRpcResponse::success(id, serde_json::json!({ "prompts": [] }))
            }
            other => JsonRpcResponse::error(
                id,
                waygate_rpc::METHOD_NOT_FOUND,
                format!("method '{other}' is not available on this gateway"),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut settings: WaygateSettings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    if let Some(host) = cli.host {
        settings.server.host = host;
    }
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    let production = settings.is_production();
    info!(
        environment = %settings.environment,
        service = %settings.server.service_name,
        "starting gateway"
    );

    // Data-encryption key before anything touches the session store.
    let secrets = SecretProvider::new(settings.secrets.clone(), production);
    let key = secrets
        .data_key()
        .await
        .context("failed to resolve the data-encryption key")?;
    let cipher = Arc::new(TokenCipher::new(&key).context("invalid data-encryption key")?);

    let redis = RedisKv::connect(&settings.redis.url, settings.redis.key_prefix.clone())
        .await
        .context("failed to connect to Redis")?;
    let health = Arc::new(HealthTracker::new());
    let kv: Arc<dyn Kv> = Arc::new(TrackedKv::new(Arc::new(redis), health.clone()));
    let clock = Arc::new(SystemClock);

    let metrics_handle = Arc::new(waygate_server::metrics::install_recorder());
    let mut state = build_state(
        ServerConfig::from_settings(&settings),
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
        Arc::new(GoogleIdp::new(settings.upstream.clone())),
        Arc::new(CoreDispatcher),
        metrics_handle,
    );
    // /health reports what the tracked store observes.
    state.health = health;

    let server = WaygateServer::new(state);
    let (addr, server_task) = server.listen().await.context("failed to bind")?;
    info!(%addr, "gateway listening");

    wait_for_signal().await;
    info!("shutdown signal received");

    let state = server.state();
    state
        .shutdown
        .graceful_shutdown(&state.sse, server_task, None)
        .await;
    Ok(())
}

/// Block until SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                let _ = stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
