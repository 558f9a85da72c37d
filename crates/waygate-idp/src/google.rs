//! Google OAuth 2.0 implementation of [`IdentityProvider`].
//!
//! The authorization URL always carries `access_type=offline` and
//! `prompt=consent` so Google returns a refresh token. Every outbound
//! call has a hard 10-second timeout.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::instrument;
use urlencoding::encode;

use waygate_core::{OAuthTokens, now_ms};
use waygate_settings::UpstreamSettings;

use crate::errors::IdpError;
use crate::{IdentityProvider, UserInfo};

/// Upstream request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Google identity provider.
pub struct GoogleIdp {
    client: reqwest::Client,
    settings: UpstreamSettings,
}

impl GoogleIdp {
    /// Build a provider from upstream settings.
    #[must_use]
    pub fn new(settings: UpstreamSettings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, settings }
    }

    fn tokens_from_response(&self, data: TokenResponse) -> OAuthTokens {
        OAuthTokens {
            access_token: data.access_token,
            refresh_token: data.refresh_token,
            scope: data.scope,
            token_type: data.token_type,
            expiry_date: now_ms() + data.expires_in.unwrap_or(3600) * 1000,
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<OAuthTokens, IdpError> {
        let resp = self
            .client
            .post(&self.settings.token_url)
            .form(form)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let message = resp.text().await.unwrap_or_default();
            return Err(IdpError::Provider { status, message });
        }
        let data: TokenResponse = resp
            .json()
            .await
            .map_err(|e| IdpError::Malformed(e.to_string()))?;
        Ok(self.tokens_from_response(data))
    }
}

#[async_trait]
impl IdentityProvider for GoogleIdp {
    fn auth_url(&self, state: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&access_type=offline&prompt=consent",
            self.settings.auth_url,
            encode(&self.settings.client_id),
            encode(&self.settings.redirect_uri),
            encode(&self.settings.scopes.join(" ")),
            encode(state),
        )
    }

    #[instrument(skip_all)]
    async fn exchange(&self, code: &str) -> Result<OAuthTokens, IdpError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.settings.client_id),
            ("client_secret", &self.settings.client_secret),
            ("redirect_uri", &self.settings.redirect_uri),
        ])
        .await
    }

    #[instrument(skip_all)]
    async fn user_info(&self, access_token: &str) -> Result<UserInfo, IdpError> {
        let resp = self
            .client
            .get(&self.settings.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let message = resp.text().await.unwrap_or_default();
            return Err(IdpError::Provider { status, message });
        }
        resp.json()
            .await
            .map_err(|e| IdpError::Malformed(e.to_string()))
    }

    #[instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens, IdpError> {
        let mut tokens = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.settings.client_id),
                ("client_secret", &self.settings.client_secret),
            ])
            .await?;
        // Google omits the refresh token on refresh; keep the old one.
        if tokens.refresh_token.is_none() {
            tokens.refresh_token = Some(refresh_token.to_string());
        }
        Ok(tokens)
    }
}

/// Token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings_for(server: &MockServer) -> UpstreamSettings {
        UpstreamSettings {
            client_id: "google-client".into(),
            client_secret: "google-secret".into(),
            redirect_uri: "http://localhost:8080/oauth2callback".into(),
            scopes: vec!["openid".into(), "email".into()],
            auth_url: format!("{}/o/oauth2/v2/auth", server.uri()),
            token_url: format!("{}/token", server.uri()),
            userinfo_url: format!("{}/oauth2/v2/userinfo", server.uri()),
        }
    }

    #[tokio::test]
    async fn auth_url_carries_offline_consent_and_state() {
        let server = MockServer::start().await;
        let idp = GoogleIdp::new(settings_for(&server));
        let url = idp.auth_url("session-123");
        assert!(url.contains("response_type=code"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("state=session-123"));
        assert!(url.contains("scope=openid%20email"));
    }

    #[tokio::test]
    async fn exchange_parses_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=g-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.abc",
                "refresh_token": "1//refresh",
                "scope": "openid email",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let idp = GoogleIdp::new(settings_for(&server));
        let tokens = idp.exchange("g-code").await.unwrap();
        assert_eq!(tokens.access_token, "ya29.abc");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//refresh"));
        assert!(tokens.expiry_date > now_ms());
    }

    #[tokio::test]
    async fn exchange_error_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let idp = GoogleIdp::new(settings_for(&server));
        let err = idp.exchange("bad").await.unwrap_err();
        match err {
            IdpError::Provider { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn user_info_uses_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth2/v2/userinfo"))
            .and(header("authorization", "Bearer ya29.abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "email": "user@example.com",
                "verified_email": true,
                "name": "User"
            })))
            .mount(&server)
            .await;

        let idp = GoogleIdp::new(settings_for(&server));
        let info = idp.user_info("ya29.abc").await.unwrap();
        assert_eq!(info.email, "user@example.com");
        assert!(info.verified_email);
    }

    #[tokio::test]
    async fn refresh_keeps_old_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.new",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;

        let idp = GoogleIdp::new(settings_for(&server));
        let tokens = idp.refresh("1//old").await.unwrap();
        assert_eq!(tokens.access_token, "ya29.new");
        assert_eq!(tokens.refresh_token.as_deref(), Some("1//old"));
    }

    #[tokio::test]
    async fn malformed_token_response_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let idp = GoogleIdp::new(settings_for(&server));
        assert!(matches!(
            idp.exchange("code").await,
            Err(IdpError::Malformed(_))
        ));
    }
}
