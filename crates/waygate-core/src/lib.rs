//! # waygate-core
//!
//! Shared foundation for the Waygate gateway: branded ID newtypes, the
//! session and OAuth data model, the cross-crate error taxonomy, PKCE
//! helpers, and log-redaction utilities.

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod pkce;
pub mod redact;
pub mod types;

pub use errors::CoreError;
pub use ids::{ClientId, ConnectionId, SessionId};
pub use types::{
    AuthzCodeRecord, AuthzRequest, BearerTokenRecord, OAuthTokens, RegisteredClient, Session,
    SessionMetadata, TokenMetadata, now_ms,
};
