//! Token lifecycle management
//!
//! [`TokenManager`] hands out a usable upstream access token on demand. When
//! the stored token is within the refresh buffer of its expiry it performs a
//! refresh grant first. Concurrent callers that observe an expiring token
//! share a single refresh: the first caller spawns it and publishes a
//! [`Shared`] handle, later callers await that same handle. The refresh runs
//! in its own task, so a caller being cancelled never aborts it.
//!
//! A failed refresh of any kind clears the store. The operator must then run
//! the authorization flow again; there is no automatic retry.

use std::sync::Arc;

use chrono::Duration;
use futures::future::{BoxFuture, FutureExt as _, Shared};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::auth::oauth_client::OAuthClient;
use crate::auth::token_store::{TokenRecord, TokenStatus, TokenStore};
use crate::error::{Result, VitalgateError};

/// Outcome fanned out to every caller that joined a refresh.
#[derive(Debug, Clone)]
enum RefreshOutcome {
    Refreshed(String),
    Failed,
}

type InFlightRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

enum Acquire {
    Ready(String),
    Join(InFlightRefresh),
}

struct Inner {
    store: Arc<TokenStore>,
    client: OAuthClient,
    refresh_buffer: Duration,
    in_flight: Mutex<Option<InFlightRefresh>>,
}

/// Shared handle to the process-wide token lifecycle.
///
/// Cloning is cheap; every clone coordinates through the same refresh slot.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    /// Creates a manager over `store` using `client` for upstream grants.
    ///
    /// # Arguments
    ///
    /// * `store` - The encrypted token store
    /// * `client` - Token endpoint client
    /// * `refresh_buffer` - Refresh when less than this much lifetime remains
    pub fn new(store: Arc<TokenStore>, client: OAuthClient, refresh_buffer: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                refresh_buffer,
                in_flight: Mutex::new(None),
            }),
        }
    }

    /// Returns an access token that is valid for at least the refresh buffer.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::NotAuthenticated`] when no token is stored,
    /// or when a required refresh failed (the store is cleared in that case).
    pub async fn get_valid_token(&self) -> Result<String> {
        let record = self
            .inner
            .store
            .load()
            .await
            .ok_or_else(VitalgateError::not_authenticated)?;
        if !record.needs_refresh(self.inner.refresh_buffer) {
            return Ok(record.access_token);
        }

        match self.acquire_refresh().await? {
            Acquire::Ready(token) => Ok(token),
            Acquire::Join(refresh) => match refresh.await {
                RefreshOutcome::Refreshed(token) => Ok(token),
                RefreshOutcome::Failed => Err(VitalgateError::not_authenticated().into()),
            },
        }
    }

    /// Exchanges an authorization code and persists the resulting record.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::ExchangeFailed`] if the token endpoint
    /// rejects the code, or an IO error if the record cannot be written.
    pub async fn record_exchange(&self, code: &str, code_verifier: &str) -> Result<TokenRecord> {
        let record = self.inner.client.exchange_code(code, code_verifier).await?;
        self.inner.store.save(&record).await?;
        tracing::info!(scope = %record.scope, expires_at = %record.expires_at, "Authorization code exchanged");
        Ok(record)
    }

    /// Token-free connection summary.
    pub async fn status(&self) -> TokenStatus {
        self.inner.store.status().await
    }

    /// Forgets the stored credentials.
    pub async fn logout(&self) -> Result<()> {
        self.inner.store.clear().await
    }

    /// Joins the in-flight refresh, or starts one if none is running.
    ///
    /// The store is re-read under the slot lock: a refresh that finished
    /// between the caller's first load and taking the lock has already
    /// persisted a fresh record, which is then returned directly.
    async fn acquire_refresh(&self) -> Result<Acquire> {
        let mut slot = self.inner.in_flight.lock().await;
        if let Some(refresh) = slot.as_ref() {
            tracing::debug!("Joining in-flight token refresh");
            return Ok(Acquire::Join(refresh.clone()));
        }

        let record = self
            .inner
            .store
            .load()
            .await
            .ok_or_else(VitalgateError::not_authenticated)?;
        if !record.needs_refresh(self.inner.refresh_buffer) {
            return Ok(Acquire::Ready(record.access_token));
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let outcome = inner.run_refresh(record).await;
            *inner.in_flight.lock().await = None;
            outcome
        });
        let refresh = join_refresh(Arc::clone(&self.inner), task);

        *slot = Some(refresh.clone());
        Ok(Acquire::Join(refresh))
    }
}

/// Wraps the refresh task in a shareable handle.
///
/// A task that panics or is aborted never reaches its own slot reset, so the
/// slot is released here instead.
fn join_refresh(inner: Arc<Inner>, task: JoinHandle<RefreshOutcome>) -> InFlightRefresh {
    async move {
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Token refresh task aborted");
                *inner.in_flight.lock().await = None;
                RefreshOutcome::Failed
            }
        }
    }
    .boxed()
    .shared()
}

impl Inner {
    async fn run_refresh(&self, current: TokenRecord) -> RefreshOutcome {
        let Some(refresh_token) = current.refresh_token.clone() else {
            tracing::warn!("Stored token expiring and no refresh token available; clearing");
            self.clear_quietly().await;
            return RefreshOutcome::Failed;
        };

        tracing::info!(expires_at = %current.expires_at, "Refreshing upstream access token");
        match self.client.refresh(&refresh_token).await {
            Ok(fresh) => {
                let merged = merge_refreshed(&current, fresh);
                if let Err(e) = self.store.save(&merged).await {
                    // The mirror already holds the new record; only durability is lost.
                    tracing::error!(error = %e, "Failed to persist refreshed token");
                }
                tracing::info!(expires_at = %merged.expires_at, "Upstream access token refreshed");
                RefreshOutcome::Refreshed(merged.access_token)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed; clearing stored credentials");
                self.clear_quietly().await;
                RefreshOutcome::Failed
            }
        }
    }

    async fn clear_quietly(&self) {
        if let Err(e) = self.store.clear().await {
            tracing::error!(error = %e, "Failed to clear token store");
        }
    }
}

/// Carries forward the refresh token and scope when a refresh response
/// omits them.
fn merge_refreshed(previous: &TokenRecord, mut fresh: TokenRecord) -> TokenRecord {
    if fresh.refresh_token.is_none() {
        fresh.refresh_token = previous.refresh_token.clone();
    }
    if fresh.scope.is_empty() {
        fresh.scope = previous.scope.clone();
    }
    fresh
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("store", &self.inner.store)
            .field("refresh_buffer", &self.inner.refresh_buffer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::crypto::EncryptionKey;
    use crate::config::OAuthConfig;
    use chrono::Utc;

    fn record(access: &str, refresh: Option<&str>, scope: &str) -> TokenRecord {
        TokenRecord {
            access_token: access.to_string(),
            refresh_token: refresh.map(str::to_string),
            scope: scope.to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            token_type: "bearer".to_string(),
        }
    }

    #[test]
    fn test_merge_keeps_previous_refresh_token_and_scope() {
        let previous = record("old", Some("r1"), "offline read:sleep");
        let merged = merge_refreshed(&previous, record("new", None, ""));
        assert_eq!(merged.access_token, "new");
        assert_eq!(merged.refresh_token.as_deref(), Some("r1"));
        assert_eq!(merged.scope, "offline read:sleep");
    }

    fn manager_in(dir: &tempfile::TempDir) -> TokenManager {
        let store = Arc::new(TokenStore::new(
            dir.path().join("token.json"),
            EncryptionKey::generate(),
        ));
        let client = OAuthClient::new(reqwest::Client::new(), &OAuthConfig::default());
        TokenManager::new(store, client, Duration::minutes(5))
    }

    #[tokio::test]
    async fn test_aborted_refresh_releases_slot() {
        let dir = tempfile::TempDir::new().unwrap();
        let manager = manager_in(&dir);

        let task = tokio::spawn(futures::future::pending::<RefreshOutcome>());
        task.abort();
        let refresh = join_refresh(Arc::clone(&manager.inner), task);
        *manager.inner.in_flight.lock().await = Some(refresh.clone());

        assert!(matches!(refresh.await, RefreshOutcome::Failed));
        assert!(manager.inner.in_flight.lock().await.is_none());
    }

    #[test]
    fn test_merge_prefers_rotated_values() {
        let previous = record("old", Some("r1"), "offline");
        let merged = merge_refreshed(&previous, record("new", Some("r2"), "offline read:cycles"));
        assert_eq!(merged.refresh_token.as_deref(), Some("r2"));
        assert_eq!(merged.scope, "offline read:cycles");
    }
}
