//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use tempfile::TempDir;

use vitalgate::auth::crypto::EncryptionKey;
use vitalgate::auth::oauth_client::OAuthClient;
use vitalgate::auth::{TokenManager, TokenRecord, TokenStore};
use vitalgate::config::{Config, OAuthConfig};

pub const BEARER: &str = "operator-secret";

/// A complete, valid configuration whose upstream URLs point at `upstream`.
pub fn test_config(dir: &TempDir, upstream: &str) -> Config {
    let mut config = Config::default();
    config.server.bearer_token = BEARER.to_string();
    config.oauth.client_id = "client-123".to_string();
    config.oauth.client_secret = "client-secret".to_string();
    config.oauth.redirect_url = "http://localhost:8080/oauth/callback".to_string();
    config.oauth.authorization_url = format!("{upstream}/oauth/oauth2/auth");
    config.oauth.token_url = format!("{upstream}/oauth/oauth2/token");
    config.api.base_url = format!("{upstream}/developer");
    config.storage.token_path = dir.path().join("token.json");
    config.storage.encryption_key = EncryptionKey::generate().to_base64();
    config
}

/// OAuth settings whose token endpoint is `{upstream}/token`.
pub fn oauth_config(upstream: &str) -> OAuthConfig {
    OAuthConfig {
        client_id: "client-123".to_string(),
        client_secret: "client-secret".to_string(),
        redirect_url: "http://localhost:8080/oauth/callback".to_string(),
        authorization_url: format!("{upstream}/authorize"),
        token_url: format!("{upstream}/token"),
        ..Default::default()
    }
}

/// Store plus manager over a fresh temp file.
pub fn token_manager(dir: &TempDir, upstream: &str) -> (Arc<TokenStore>, TokenManager) {
    let store = Arc::new(TokenStore::new(
        dir.path().join("token.json"),
        EncryptionKey::from_bytes([7u8; 32]),
    ));
    let client = OAuthClient::new(reqwest::Client::new(), &oauth_config(upstream));
    let manager = TokenManager::new(Arc::clone(&store), client, Duration::minutes(5));
    (store, manager)
}

/// A record expiring `expires_in` from now.
pub fn record(access: &str, refresh: Option<&str>, expires_in: Duration) -> TokenRecord {
    TokenRecord {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        scope: "offline read:sleep".to_string(),
        expires_at: Utc::now() + expires_in,
        token_type: "bearer".to_string(),
    }
}

/// Token endpoint success body.
pub fn token_body(access: &str, refresh: Option<&str>, expires_in: i64) -> Value {
    let mut body = json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": expires_in,
        "scope": "offline read:sleep"
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    body
}

/// Value of query parameter `name` in `url`.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Value of form field `name` in an `application/x-www-form-urlencoded` body.
pub fn form_field(body: &[u8], name: &str) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
