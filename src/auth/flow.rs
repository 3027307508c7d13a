//! PKCE authorization-code flow state machine
//!
//! Each call to [`AuthorizationFlow::begin`] creates one
//! [`AuthorizationAttempt`] keyed by an unguessable `state`. The attempt is
//! removed from the table before anything else happens in
//! [`AuthorizationFlow::complete`], so a `state` can be consumed at most once
//! whatever the outcome of the code exchange. Expired attempts are rejected
//! on lookup and purged periodically by the server's maintenance task.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use url::Url;

use crate::auth::manager::TokenManager;
use crate::auth::pkce;
use crate::auth::token_store::TokenRecord;
use crate::config::OAuthConfig;
use crate::error::{Result, VitalgateError};

/// Upper bound on simultaneously pending attempts.
pub const MAX_ATTEMPTS: usize = 256;

/// Random bytes behind each `state` value (256 bits).
const STATE_BYTES: usize = 32;

// ---------------------------------------------------------------------------
// AuthorizationAttempt
// ---------------------------------------------------------------------------

/// One in-progress authorization, alive between `authorize` and `callback`.
#[derive(Clone)]
pub struct AuthorizationAttempt {
    /// Opaque value round-tripped through the authorization server
    pub state: String,
    /// PKCE verifier, only ever sent to the token endpoint
    pub code_verifier: String,
    /// S256 challenge of `code_verifier`
    pub code_challenge: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// After this instant the attempt is rejected
    pub expires_at: DateTime<Utc>,
}

impl AuthorizationAttempt {
    fn new(ttl: Duration) -> Self {
        let pair = pkce::generate();
        let created_at = Utc::now();
        Self {
            state: pkce::random_urlsafe(STATE_BYTES),
            code_verifier: pair.verifier,
            code_challenge: pair.challenge,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    /// Whether the attempt is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl std::fmt::Debug for AuthorizationAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationAttempt")
            .field("state", &"[redacted]")
            .field("code_verifier", &"[redacted]")
            .field("code_challenge", &self.code_challenge)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of [`AuthorizationFlow::begin`].
#[derive(Debug, Clone)]
pub struct AuthorizationStart {
    /// The `state` the callback must present
    pub state: String,
    /// Upstream authorization URL to redirect the operator to
    pub authorization_url: String,
}

// ---------------------------------------------------------------------------
// AuthorizationFlow
// ---------------------------------------------------------------------------

/// Owner of the attempt table.
pub struct AuthorizationFlow {
    attempts: DashMap<String, AuthorizationAttempt>,
    tokens: TokenManager,
    authorization_endpoint: Url,
    client_id: String,
    redirect_url: String,
    scope: String,
    ttl: Duration,
    max_attempts: usize,
}

impl AuthorizationFlow {
    /// Builds the flow from the `oauth` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::Config`] when `authorization_url` does not
    /// parse as an absolute URL.
    pub fn new(config: &OAuthConfig, tokens: TokenManager) -> Result<Self> {
        let authorization_endpoint = Url::parse(&config.authorization_url).map_err(|e| {
            VitalgateError::Config(format!("oauth.authorization_url is not a valid URL: {e}"))
        })?;
        Ok(Self {
            attempts: DashMap::new(),
            tokens,
            authorization_endpoint,
            client_id: config.client_id.clone(),
            redirect_url: config.redirect_url.clone(),
            scope: config.scopes.join(" "),
            ttl: Duration::seconds(i64::try_from(config.attempt_ttl_seconds).unwrap_or(i64::MAX)),
            max_attempts: MAX_ATTEMPTS,
        })
    }

    /// Overrides the attempt table bound.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Starts a new authorization attempt.
    ///
    /// # Returns
    ///
    /// The attempt's `state` and the upstream URL carrying `response_type`,
    /// `client_id`, `redirect_uri`, `scope`, `state`, `code_challenge` and
    /// `code_challenge_method=S256`.
    pub fn begin(&self) -> AuthorizationStart {
        self.make_room();

        let attempt = AuthorizationAttempt::new(self.ttl);
        let authorization_url = self.authorization_url_for(&attempt);
        let state = attempt.state.clone();
        self.attempts.insert(state.clone(), attempt);

        tracing::info!(pending = self.attempts.len(), "Authorization attempt started");
        AuthorizationStart {
            state,
            authorization_url,
        }
    }

    /// Completes the attempt identified by `state` with the returned `code`.
    ///
    /// The attempt is consumed before the exchange. A second call with the
    /// same `state` fails even if the first exchange failed.
    ///
    /// # Errors
    ///
    /// - [`VitalgateError::InvalidState`] for unknown, expired or replayed state
    /// - [`VitalgateError::ExchangeFailed`] if the token endpoint rejects the code
    pub async fn complete(&self, state: &str, code: &str) -> Result<TokenRecord> {
        let attempt = self.take_live(state)?;
        match self.tokens.record_exchange(code, &attempt.code_verifier).await {
            Ok(record) => {
                tracing::info!("Authorization completed");
                Ok(record)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Authorization code exchange failed; attempt consumed");
                Err(e)
            }
        }
    }

    /// Consumes the attempt for `state` without exchanging anything.
    ///
    /// Used when the authorization server redirects back with `error=`.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::InvalidState`] when no live attempt matches.
    pub fn abandon(&self, state: &str) -> Result<()> {
        self.take_live(state).map(|_| ())
    }

    /// Drops every expired attempt. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.attempts.len();
        self.attempts.retain(|_, attempt| !attempt.is_expired_at(now));
        let removed = before.saturating_sub(self.attempts.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired authorization attempts");
        }
        removed
    }

    /// Number of attempts currently held.
    pub fn pending(&self) -> usize {
        self.attempts.len()
    }

    fn take_live(&self, state: &str) -> Result<AuthorizationAttempt> {
        let Some((_, attempt)) = self.attempts.remove(state) else {
            tracing::warn!("Callback presented an unknown or already used state");
            return Err(VitalgateError::InvalidState.into());
        };
        if attempt.is_expired_at(Utc::now()) {
            tracing::warn!(expired_at = %attempt.expires_at, "Callback presented an expired state");
            return Err(VitalgateError::InvalidState.into());
        }
        Ok(attempt)
    }

    fn make_room(&self) {
        if self.attempts.len() < self.max_attempts {
            return;
        }
        self.purge_expired();
        while self.attempts.len() >= self.max_attempts {
            let oldest = self
                .attempts
                .iter()
                .min_by_key(|entry| entry.value().created_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(state) => {
                    self.attempts.remove(&state);
                    tracing::warn!("Attempt table full; evicted oldest authorization attempt");
                }
                None => break,
            }
        }
    }

    fn authorization_url_for(&self, attempt: &AuthorizationAttempt) -> String {
        let mut url = self.authorization_endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &self.client_id);
            query.append_pair("redirect_uri", &self.redirect_url);
            if !self.scope.is_empty() {
                query.append_pair("scope", &self.scope);
            }
            query.append_pair("state", &attempt.state);
            query.append_pair("code_challenge", &attempt.code_challenge);
            query.append_pair("code_challenge_method", pkce::CHALLENGE_METHOD);
        }
        url.to_string()
    }
}

impl std::fmt::Debug for AuthorizationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationFlow")
            .field("pending", &self.attempts.len())
            .field("authorization_endpoint", &self.authorization_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::crypto::EncryptionKey;
    use crate::auth::oauth_client::OAuthClient;
    use crate::auth::token_store::TokenStore;
    use crate::error::{error_kind, ErrorKind};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn oauth_config(ttl_seconds: u64) -> OAuthConfig {
        OAuthConfig {
            client_id: "client-1".to_string(),
            client_secret: "secret".to_string(),
            redirect_url: "http://localhost:8080/oauth/callback".to_string(),
            authorization_url: "https://auth.example.com/oauth2/auth".to_string(),
            // Unroutable: no test here reaches the token endpoint.
            token_url: "http://127.0.0.1:9/token".to_string(),
            scopes: vec!["offline".to_string(), "read:sleep".to_string()],
            attempt_ttl_seconds: ttl_seconds,
            ..OAuthConfig::default()
        }
    }

    fn flow(ttl_seconds: u64) -> (AuthorizationFlow, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let config = oauth_config(ttl_seconds);
        let store = Arc::new(TokenStore::new(
            dir.path().join("token.json"),
            EncryptionKey::generate(),
        ));
        let client = OAuthClient::new(reqwest::Client::new(), &config);
        let tokens = TokenManager::new(store, client, Duration::minutes(5));
        (AuthorizationFlow::new(&config, tokens).unwrap(), dir)
    }

    fn query_of(url: &str) -> HashMap<String, String> {
        Url::parse(url).unwrap().query_pairs().into_owned().collect()
    }

    #[test]
    fn test_begin_builds_authorization_url() {
        let (flow, _dir) = flow(600);
        let start = flow.begin();
        assert!(start
            .authorization_url
            .starts_with("https://auth.example.com/oauth2/auth?"));

        let q = query_of(&start.authorization_url);
        assert_eq!(q["response_type"], "code");
        assert_eq!(q["client_id"], "client-1");
        assert_eq!(q["redirect_uri"], "http://localhost:8080/oauth/callback");
        assert_eq!(q["scope"], "offline read:sleep");
        assert_eq!(q["state"], start.state);
        assert_eq!(q["code_challenge_method"], "S256");
        assert_eq!(q["code_challenge"].len(), 43);
        assert!(!q.contains_key("code_verifier"));
    }

    #[test]
    fn test_state_has_256_bits_and_is_unique() {
        let (flow, _dir) = flow(600);
        let a = flow.begin();
        let b = flow.begin();
        assert_eq!(a.state.len(), 43);
        assert_ne!(a.state, b.state);
        assert_eq!(flow.pending(), 2);
    }

    #[tokio::test]
    async fn test_complete_unknown_state_is_invalid_state() {
        let (flow, _dir) = flow(600);
        let err = flow.complete("nope", "code").await.unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_complete_expired_state_is_invalid_state_and_consumed() {
        let (flow, _dir) = flow(0);
        let start = flow.begin();
        let err = flow.complete(&start.state, "code").await.unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::InvalidState);
        assert_eq!(flow.pending(), 0);
    }

    #[test]
    fn test_abandon_consumes_attempt_once() {
        let (flow, _dir) = flow(600);
        let start = flow.begin();
        flow.abandon(&start.state).unwrap();
        let err = flow.abandon(&start.state).unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::InvalidState);
    }

    #[test]
    fn test_purge_expired_removes_only_expired() {
        let (expired_flow, _dir) = flow(0);
        expired_flow.begin();
        expired_flow.begin();
        assert_eq!(expired_flow.purge_expired(), 2);
        assert_eq!(expired_flow.pending(), 0);

        let (live_flow, _dir2) = flow(600);
        live_flow.begin();
        assert_eq!(live_flow.purge_expired(), 0);
        assert_eq!(live_flow.pending(), 1);
    }

    #[test]
    fn test_attempt_table_is_bounded_and_evicts_oldest() {
        let (flow, _dir) = flow(600);
        let flow = flow.with_max_attempts(3);
        let first = flow.begin();
        std::thread::sleep(std::time::Duration::from_millis(2));
        for _ in 0..3 {
            flow.begin();
        }
        assert_eq!(flow.pending(), 3);
        assert!(flow.abandon(&first.state).is_err());
    }

    #[test]
    fn test_attempt_debug_is_redacted() {
        let attempt = AuthorizationAttempt::new(Duration::minutes(10));
        let rendered = format!("{:?}", attempt);
        assert!(!rendered.contains(&attempt.code_verifier));
        assert!(!rendered.contains(&attempt.state));
    }
}
