//! # waygate-server
//!
//! The externally visible contract of the gateway core: the axum router,
//! the OAuth 2.1 + PKCE brokerage endpoints, dynamic client registration,
//! first-party bearer token issuance, dual (bearer-or-cookie)
//! authentication, the SSE and Streamable HTTP transports, distributed
//! rate limiting, Prometheus metrics, and graceful shutdown.

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod html;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod sse;
pub mod state;

pub use config::ServerConfig;
pub use server::WaygateServer;
pub use state::AppState;
