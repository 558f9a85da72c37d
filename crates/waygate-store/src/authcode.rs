//! Pending authorization requests and single-use authorization codes.
//!
//! An [`AuthzRequest`] is written when `/auth/login` starts a PKCE flow
//! and consumed by the provider callback. An authorization code is minted
//! after a successful callback and redeemed exactly once by the token
//! endpoint: consumption is an atomic server-side GET+DEL, so of N
//! concurrent redemptions exactly one sees the record — and a code that
//! then fails any binding check stays consumed.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use tracing::{debug, info};

use waygate_core::constants::{AUTHZ_CODE_PREFIX, AUTHZ_REQUEST_PREFIX, AUTHZ_TTL_MS};
use waygate_core::pkce;
use waygate_core::redact::{mask_email, mask_token};
use waygate_core::{AuthzCodeRecord, AuthzRequest, SessionId};

use crate::clock::Clock;
use crate::errors::StoreError;
use crate::kv::Kv;

/// Parameters bound into a freshly minted authorization code.
#[derive(Clone, Debug)]
pub struct AuthzCodeParams {
    /// OAuth client the code is issued to.
    pub client_id: String,
    /// Redirect URI the code is bound to.
    pub redirect_uri: String,
    /// PKCE challenge from the original request.
    pub code_challenge: String,
    /// Challenge method (`S256`).
    pub code_challenge_method: String,
    /// Client state echoed at redemption.
    pub state: Option<String>,
    /// Authenticated user's email.
    pub user_email: String,
    /// Upstream access token to carry into the redeemed session.
    pub google_access_token: String,
    /// Upstream refresh token, when present.
    pub google_refresh_token: Option<String>,
}

/// Store for authorization requests and codes (component C4a).
pub struct AuthCodeStore {
    kv: Arc<dyn Kv>,
    clock: Arc<dyn Clock>,
}

impl AuthCodeStore {
    /// Build a store.
    #[must_use]
    pub fn new(kv: Arc<dyn Kv>, clock: Arc<dyn Clock>) -> Self {
        Self { kv, clock }
    }

    fn request_key(session_id: &SessionId) -> String {
        format!("{AUTHZ_REQUEST_PREFIX}{session_id}")
    }

    fn code_key(code: &str) -> String {
        format!("{AUTHZ_CODE_PREFIX}{code}")
    }

    /// Persist the PKCE parameters of a login for the callback to pick up.
    pub async fn store_request(
        &self,
        session_id: &SessionId,
        request: &AuthzRequest,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(request)?;
        self.kv
            .set_ex(&Self::request_key(session_id), &json, AUTHZ_TTL_MS)
            .await
    }

    /// Read a pending authorization request.
    pub async fn get_request(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<AuthzRequest>, StoreError> {
        match self.kv.get(&Self::request_key(session_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Drop a pending authorization request.
    pub async fn delete_request(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        self.kv.delete(&Self::request_key(session_id)).await
    }

    /// Mint and persist a single-use authorization code.
    pub async fn generate(&self, params: AuthzCodeParams) -> Result<String, StoreError> {
        let mut buf = [0u8; 32];
        rand::rng().fill_bytes(&mut buf);
        let code = URL_SAFE_NO_PAD.encode(buf);

        let now = self.clock.now_ms();
        let record = AuthzCodeRecord {
            code: code.clone(),
            client_id: params.client_id,
            redirect_uri: params.redirect_uri,
            code_challenge: params.code_challenge,
            code_challenge_method: params.code_challenge_method,
            state: params.state,
            user_email: params.user_email,
            google_access_token: params.google_access_token,
            google_refresh_token: params.google_refresh_token,
            created_at: now,
            expires_at: now + AUTHZ_TTL_MS,
        };
        let json = serde_json::to_string(&record)?;
        self.kv
            .set_ex(&Self::code_key(&code), &json, AUTHZ_TTL_MS)
            .await?;

        info!(
            audit = true,
            event = "authorization_code_generated",
            code = %mask_token(&code),
            client_id = %record.client_id,
            user = %mask_email(&record.user_email),
            "authorization code generated"
        );
        Ok(code)
    }

    /// Atomically consume a code and verify its bindings.
    ///
    /// Returns `None` for every failure mode — missing, expired, wrong
    /// client, wrong redirect URI, unsupported challenge method, failed
    /// PKCE — without distinguishing them. The code is consumed either
    /// way; a second redemption attempt cannot succeed.
    pub async fn validate_and_consume(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<Option<AuthzCodeRecord>, StoreError> {
        let Some(raw) = self.kv.get_del(&Self::code_key(code)).await? else {
            debug!(code = %mask_token(code), "authorization code not found");
            return Ok(None);
        };
        let record: AuthzCodeRecord = serde_json::from_str(&raw)?;

        if record.expires_at < self.clock.now_ms() {
            debug!(code = %mask_token(code), "authorization code expired");
            return Ok(None);
        }
        if record.client_id != client_id {
            debug!(code = %mask_token(code), "authorization code client mismatch");
            return Ok(None);
        }
        if record.redirect_uri != redirect_uri {
            debug!(code = %mask_token(code), "authorization code redirect mismatch");
            return Ok(None);
        }
        if record.code_challenge_method != "S256" {
            debug!(code = %mask_token(code), "unsupported challenge method");
            return Ok(None);
        }
        if !pkce::verify_s256(code_verifier, &record.code_challenge) {
            debug!(code = %mask_token(code), "PKCE verification failed");
            return Ok(None);
        }
        Ok(Some(record))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
