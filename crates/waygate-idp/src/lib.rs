//! # waygate-idp
//!
//! The upstream identity provider contract consumed by the auth
//! orchestrator, and its Google implementation. Anything satisfying
//! [`IdentityProvider`] can stand in for Google — the test suites use a
//! scripted in-memory provider.

#![deny(unsafe_code)]

pub mod errors;
pub mod google;

pub use errors::IdpError;
pub use google::GoogleIdp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use waygate_core::OAuthTokens;

/// Identity claims from the provider's userinfo endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserInfo {
    /// Primary email address.
    pub email: String,
    /// Whether the provider has verified the email.
    #[serde(default)]
    pub verified_email: bool,
    /// Display name, if released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar URL, if released.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Minimal upstream IdP contract.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build the browser authorization URL carrying `state`.
    fn auth_url(&self, state: &str) -> String;

    /// Exchange an authorization code for tokens.
    async fn exchange(&self, code: &str) -> Result<OAuthTokens, IdpError>;

    /// Fetch the identity behind an access token.
    async fn user_info(&self, access_token: &str) -> Result<UserInfo, IdpError>;

    /// Refresh an expired access token.
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens, IdpError>;
}
