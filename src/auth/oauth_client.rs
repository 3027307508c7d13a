//! Upstream token endpoint client
//!
//! Implements the two grants the broker needs: `authorization_code` (with the
//! PKCE verifier) and `refresh_token`. Client credentials are sent in the
//! form body (`client_secret_post`). Failures are reported as
//! [`VitalgateError::ExchangeFailed`] carrying the HTTP status and the
//! upstream `error` code only; response bodies are never echoed.

use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::auth::token_store::TokenRecord;
use crate::config::OAuthConfig;
use crate::error::{Result, VitalgateError};

/// Lifetime assumed when the token endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenResponse {
    fn into_record(self) -> TokenRecord {
        let lifetime = self.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS).max(0);
        TokenRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            scope: self.scope.unwrap_or_default(),
            expires_at: Utc::now() + Duration::seconds(lifetime),
            token_type: self.token_type,
        }
    }
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
}

// ---------------------------------------------------------------------------
// OAuthClient
// ---------------------------------------------------------------------------

/// HTTP client for the authorization server's token endpoint.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    redirect_url: String,
    token_url: String,
}

impl OAuthClient {
    /// Creates a client from the `oauth` configuration section.
    pub fn new(http: reqwest::Client, config: &OAuthConfig) -> Self {
        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_url: config.redirect_url.clone(),
            token_url: config.token_url.clone(),
        }
    }

    /// Exchanges an authorization code plus its PKCE verifier for tokens.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::ExchangeFailed`] when the request cannot be
    /// sent, the endpoint answers with a non-success status, or the response
    /// is not a token response.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenRecord> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("code_verifier", code_verifier),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        self.request_token("authorization_code", &params).await
    }

    /// Uses a refresh token to obtain a new access token.
    ///
    /// # Errors
    ///
    /// Same as [`Self::exchange_code`].
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenRecord> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        self.request_token("refresh_token", &params).await
    }

    async fn request_token(&self, grant: &str, params: &[(&str, &str)]) -> Result<TokenRecord> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(grant, timeout = e.is_timeout(), "Token endpoint unreachable");
                VitalgateError::ExchangeFailed("token endpoint request failed".to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let code = resp
                .json::<TokenErrorResponse>()
                .await
                .map(|e| e.error)
                .unwrap_or_else(|_| "unknown".to_string());
            tracing::warn!(grant, status = status.as_u16(), error_code = %code, "Token endpoint rejected grant");
            return Err(VitalgateError::ExchangeFailed(format!(
                "token endpoint returned {} ({})",
                status.as_u16(),
                code
            ))
            .into());
        }

        let raw: TokenResponse = resp.json().await.map_err(|_| {
            VitalgateError::ExchangeFailed("token endpoint returned an unreadable response".into())
        })?;

        tracing::debug!(grant, expires_in = ?raw.expires_in, "Token endpoint granted tokens");
        Ok(raw.into_record())
    }
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
