//! Dynamic client registration (RFC 7591) storage.
//!
//! Registered clients live under `oauth:client:<clientId>` for 30 days.
//! Redirect-URI validation is an exact-match membership test; the caller
//! unions this with the deployment's static whitelist.

use std::sync::Arc;

use rand::RngCore;
use serde::Deserialize;
use tracing::info;

use waygate_core::constants::{CLIENT_PREFIX, CLIENT_TTL_MS};
use waygate_core::RegisteredClient;

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::kv::Kv;

/// RFC 7591 registration request body.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClientRegistrationRequest {
    /// Redirect URIs the client will use. Must be non-empty.
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Human-readable client name.
    #[serde(default)]
    pub client_name: Option<String>,
    /// Requested grant types; defaults to `["authorization_code"]`.
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    /// Requested response types; defaults to `["code"]`.
    #[serde(default)]
    pub response_types: Option<Vec<String>>,
    /// Token endpoint auth method; defaults to `"none"` (public client).
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
}

/// Store for dynamically registered OAuth clients (component C4b).
pub struct ClientRegistry {
    kv: Arc<dyn Kv>,
    clock: Arc<dyn Clock>,
}

impl ClientRegistry {
    /// Build a registry.
    #[must_use]
    pub fn new(kv: Arc<dyn Kv>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    fn key(client_id: &str) -> String {
        format!("{CLIENT_PREFIX}{client_id}")
    }

    /// Register a new client. The caller must have rejected empty
    /// `redirect_uris` already; this enforces it again defensively.
    pub async fn register(
        &self,
        request: ClientRegistrationRequest,
    ) -> Result<RegisteredClient, StoreError> {
        let client_id = format!("mcp_{}", random_hex(16));
        let auth_method = request
            .token_endpoint_auth_method
            .unwrap_or_else(|| "none".to_string());
        let client_secret = if auth_method == "none" {
            None
        } else {
            Some(random_hex(32))
        };

        let client = RegisteredClient {
            client_id: client_id.clone(),
            client_secret,
            client_name: request
                .client_name
                .unwrap_or_else(|| "Unnamed client".to_string()),
            redirect_uris: request.redirect_uris,
            grant_types: request
                .grant_types
                .unwrap_or_else(|| vec!["authorization_code".to_string()]),
            response_types: request
                .response_types
                .unwrap_or_else(|| vec!["code".to_string()]),
            token_endpoint_auth_method: auth_method,
            created_at: self.clock.now_ms(),
        };

        let json = serde_json::to_string(&client)?;
        self.kv
            .set_ex(&Self::key(&client_id), &json, CLIENT_TTL_MS)
            .await?;
        info!(client_id = %client_id, client_name = %client.client_name, "client registered");
        Ok(client)
    }

    /// Look up a registered client.
    pub async fn get(&self, client_id: &str) -> Result<Option<RegisteredClient>, StoreError> {
        match self.kv.get(&Self::key(client_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Exact-match test of a redirect URI against a client's registered
    /// list. Unknown clients fail closed.
    pub async fn validate_redirect_uri(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<bool, StoreError> {
        Ok(self
            .get(client_id)
            .await?
            .is_some_and(|c| c.redirect_uris.iter().any(|u| u == redirect_uri)))
    }

    /// Delete a registration. Returns whether it existed.
    pub async fn delete(&self, client_id: &str) -> Result<bool, StoreError> {
        self.kv.delete(&Self::key(client_id)).await
    }
}

/// `n` random bytes as lowercase hex (`2n` characters).
fn random_hex(n: usize) -> String {
    let mut buf = vec![0u8; n];
    rand::rng().fill_bytes(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryKv;

    fn make_registry() -> (ClientRegistry, Arc<ManualClock>) {
        let clock = ManualClock::new(1_700_000_000_000);
        let kv = Arc::new(MemoryKv::with_clock(clock.clone()));
        (ClientRegistry::new(kv, clock.clone()), clock)
    }

    fn make_request() -> ClientRegistrationRequest {
        ClientRegistrationRequest {
            redirect_uris: vec!["http://localhost:6274/cb".into()],
            client_name: Some("Insp".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn register_mints_mcp_client_id() {
        let (registry, _) = make_registry();
        let client = registry.register(make_request()).await.unwrap();
        assert!(client.client_id.starts_with("mcp_"));
        let hex = &client.client_id[4..];
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn public_client_gets_no_secret() {
        let (registry, _) = make_registry();
        let client = registry.register(make_request()).await.unwrap();
        assert!(client.client_secret.is_none());
        assert_eq!(client.token_endpoint_auth_method, "none");
    }

    #[tokio::test]
    async fn confidential_client_gets_secret() {
        let (registry, _) = make_registry();
        let mut request = make_request();
        request.token_endpoint_auth_method = Some("client_secret_post".into());
        let client = registry.register(request).await.unwrap();
        let secret = client.client_secret.unwrap();
        assert_eq!(secret.len(), 64);
    }

    #[tokio::test]
    async fn defaults_applied() {
        let (registry, _) = make_registry();
        let client = registry.register(make_request()).await.unwrap();
        assert_eq!(client.grant_types, vec!["authorization_code"]);
        assert_eq!(client.response_types, vec!["code"]);
    }

    #[tokio::test]
    async fn get_round_trips() {
        let (registry, _) = make_registry();
        let client = registry.register(make_request()).await.unwrap();
        let loaded = registry.get(&client.client_id).await.unwrap().unwrap();
        assert_eq!(loaded, client);
    }

    #[tokio::test]
    async fn get_unknown_is_none() {
        let (registry, _) = make_registry();
        assert!(registry.get("mcp_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn redirect_validation_exact_match() {
        let (registry, _) = make_registry();
        let client = registry.register(make_request()).await.unwrap();
        assert!(
            registry
                .validate_redirect_uri(&client.client_id, "http://localhost:6274/cb")
                .await
                .unwrap()
        );
        // Prefix or superstring never passes.
        assert!(
            !registry
                .validate_redirect_uri(&client.client_id, "http://localhost:6274/cb/extra")
                .await
                .unwrap()
        );
        assert!(
            !registry
                .validate_redirect_uri(&client.client_id, "http://localhost:6274/")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn redirect_validation_unknown_client_fails() {
        let (registry, _) = make_registry();
        assert!(
            !registry
                .validate_redirect_uri("mcp_missing", "http://localhost:6274/cb")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn delete_removes_registration() {
        let (registry, _) = make_registry();
        let client = registry.register(make_request()).await.unwrap();
        assert!(registry.delete(&client.client_id).await.unwrap());
        assert!(registry.get(&client.client_id).await.unwrap().is_none());
        assert!(!registry.delete(&client.client_id).await.unwrap());
    }

    #[tokio::test]
    async fn registration_expires_after_thirty_days() {
        let (registry, clock) = make_registry();
        let client = registry.register(make_request()).await.unwrap();
        clock.advance(CLIENT_TTL_MS + 1);
        assert!(registry.get(&client.client_id).await.unwrap().is_none());
    }

    #[test]
    fn random_hex_length_and_charset() {
        let hex = random_hex(16);
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(random_hex(16), random_hex(16));
    }
}
