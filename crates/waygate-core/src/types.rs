//! The persisted data model: sessions, OAuth tokens, authorization
//! requests/codes, registered clients, and bearer-token records.
//!
//! Field casing mirrors what actually goes over the wire: session and
//! token records use camelCase (matching the stored JSON), OAuth protocol
//! records use the snake_case names from RFC 6749/7591.

use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Current time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Upstream OAuth tokens as returned by the identity provider.
///
/// Stored inside a session only as ciphertext; this plaintext form never
/// touches the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    /// Upstream access token.
    pub access_token: String,
    /// Upstream refresh token, when the consent included offline access.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Granted scopes, space-separated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Token type, normally `Bearer`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Expiry as milliseconds since the Unix epoch.
    pub expiry_date: i64,
}

impl OAuthTokens {
    /// Whether the access token has expired as of `now` (ms epoch).
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry_date <= now
    }
}

/// Opaque per-session metadata recorded at creation time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Client `User-Agent` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Client IP address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Redirect URI captured at login (legacy flow).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    /// Whether this session was created by a PKCE login.
    #[serde(default, rename = "isPKCEFlow")]
    pub is_pkce_flow: bool,
    /// OAuth client that initiated the flow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Grant type that created the session (e.g. `authorization_code`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_type: Option<String>,
}

/// A server-side session with its tokens decrypted.
///
/// This is the in-memory view handed to request handlers; the store keeps
/// tokens only as ciphertext.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Session identifier (also the cookie value and OAuth `state`).
    pub id: SessionId,
    /// Creation time (ms epoch).
    pub created_at: i64,
    /// Absolute expiry (ms epoch).
    pub expires_at: i64,
    /// Last successful read (ms epoch).
    pub last_accessed_at: i64,
    /// True iff upstream tokens are present and decrypted successfully.
    pub authenticated: bool,
    /// Authenticated user's email.
    pub user_email: Option<String>,
    /// Decrypted upstream tokens, when present.
    pub tokens: Option<OAuthTokens>,
    /// Opaque request metadata.
    pub metadata: SessionMetadata,
}

/// A pending PKCE authorization request, stored between `/auth/login` and
/// the provider callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzRequest {
    /// Requesting OAuth client.
    pub client_id: String,
    /// Redirect URI the client asked for.
    pub redirect_uri: String,
    /// Client-supplied opaque state, echoed back on redirect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// PKCE code challenge.
    pub code_challenge: String,
    /// Challenge method; only `S256` is accepted.
    pub code_challenge_method: String,
    /// Response type; only `code` is accepted.
    pub response_type: String,
}

/// A single-use authorization code minted after a successful upstream
/// callback on a PKCE flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthzCodeRecord {
    /// The code itself (base64url of 32 random bytes).
    pub code: String,
    /// Client the code is bound to.
    pub client_id: String,
    /// Redirect URI the code is bound to.
    pub redirect_uri: String,
    /// PKCE challenge the verifier must match.
    pub code_challenge: String,
    /// Challenge method (`S256`).
    pub code_challenge_method: String,
    /// Client state echoed on redemption, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Authenticated user's email.
    pub user_email: String,
    /// Upstream access token carried into the new session.
    pub google_access_token: String,
    /// Upstream refresh token, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_refresh_token: Option<String>,
    /// Issue time (ms epoch).
    pub created_at: i64,
    /// Expiry (ms epoch); the storage TTL is authoritative.
    pub expires_at: i64,
}

/// A dynamically registered OAuth client (RFC 7591).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Client identifier (`mcp_<hex32>`).
    pub client_id: String,
    /// Client secret; only present when the auth method is not `none`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Human-readable client name.
    pub client_name: String,
    /// Exact-match redirect URI whitelist for this client.
    pub redirect_uris: Vec<String>,
    /// Allowed grant types.
    pub grant_types: Vec<String>,
    /// Allowed response types.
    pub response_types: Vec<String>,
    /// Token endpoint auth method (`none` for public clients).
    pub token_endpoint_auth_method: String,
    /// Registration time (ms epoch).
    pub created_at: i64,
}

impl RegisteredClient {
    /// The public view: same record with the secret stripped.
    #[must_use]
    pub fn public_view(&self) -> Self {
        Self {
            client_secret: None,
            ..self.clone()
        }
    }
}

/// A first-party bearer token record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BearerTokenRecord {
    /// The token string (UUID v4).
    pub token: String,
    /// Owning session.
    pub session_id: String,
    /// Issue time (ms epoch).
    pub created_at: i64,
    /// Expiry (ms epoch); the storage TTL is authoritative, this field is
    /// an audit trail.
    pub expires_at: i64,
}

/// Token metadata safe to show in a UI — never carries the full token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenMetadata {
    /// First eight characters of the token, for display.
    pub token_prefix: String,
    /// Owning session.
    pub session_id: String,
    /// Issue time (ms epoch).
    pub created_at: i64,
    /// Expiry (ms epoch).
    pub expires_at: i64,
}

impl TokenMetadata {
    /// Build display metadata from a full token record.
    #[must_use]
    pub fn from_record(record: &BearerTokenRecord) -> Self {
        Self {
            token_prefix: record.token.chars().take(8).collect(),
            session_id: record.session_id.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
        }
    }
}
