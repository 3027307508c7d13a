//! Upstream health-data API client
//!
//! A thin bearer-authenticated JSON client. It knows nothing about the
//! records it fetches; tools pass responses through unchanged. Rate-limit
//! headers from every response are recorded and reported by `GET /health`.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::config::ApiConfig;
use crate::error::{Result, VitalgateError};

const HEADER_LIMIT: &str = "x-ratelimit-limit";
const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET: &str = "x-ratelimit-reset";

/// Most recent rate-limit window reported by the data API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    /// Requests allowed in the window
    pub limit: Option<u64>,
    /// Requests left in the window
    pub remaining: Option<u64>,
    /// Seconds until the window resets
    pub reset_seconds: Option<u64>,
    /// When these values were observed
    pub observed_at: Option<DateTime<Utc>>,
}

impl RateLimitStatus {
    fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        let status = Self {
            limit: read(HEADER_LIMIT),
            remaining: read(HEADER_REMAINING),
            reset_seconds: read(HEADER_RESET),
            observed_at: Some(Utc::now()),
        };
        if status.limit.is_none() && status.remaining.is_none() && status.reset_seconds.is_none() {
            None
        } else {
            Some(status)
        }
    }
}

/// Bearer-authenticated client for the data API.
pub struct HealthApiClient {
    http: reqwest::Client,
    base_url: String,
    rate_limit: RwLock<RateLimitStatus>,
}

impl HealthApiClient {
    /// Builds a client with the configured base URL and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("vitalgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VitalgateError::Config(format!("failed to build data API client: {e}")))?;
        Ok(Self::with_client(http, &config.base_url))
    }

    /// Wraps an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limit: RwLock::new(RateLimitStatus::default()),
        }
    }

    /// Last observed rate-limit window.
    pub fn rate_limit(&self) -> RateLimitStatus {
        *self.rate_limit.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Issues `GET {base_url}{path}` with the bearer token and returns the
    /// JSON body.
    ///
    /// # Arguments
    ///
    /// * `path` - Absolute API path such as `/v1/cycle`
    /// * `query` - Query parameters, already validated
    /// * `access_token` - Upstream bearer token
    ///
    /// # Errors
    ///
    /// - [`VitalgateError::RateLimited`] on HTTP 429
    /// - [`VitalgateError::NotAuthenticated`] on HTTP 401
    /// - [`VitalgateError::Upstream`] on any other failure
    pub async fn get_json(
        &self,
        path: &str,
        query: &[(String, String)],
        access_token: &str,
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(path, timeout = e.is_timeout(), "Data API request failed");
                VitalgateError::Upstream("data API request failed".to_string())
            })?;

        let status = resp.status();
        let observed = RateLimitStatus::from_headers(resp.headers());
        if let Some(observed) = observed {
            *self.rate_limit.write().unwrap_or_else(|e| e.into_inner()) = observed;
            if observed.remaining == Some(0) {
                tracing::warn!(reset_seconds = ?observed.reset_seconds, "Data API rate limit exhausted");
            }
        }

        match status {
            s if s.is_success() => resp.json::<Value>().await.map_err(|_| {
                VitalgateError::Upstream("data API returned invalid JSON".to_string()).into()
            }),
            StatusCode::TOO_MANY_REQUESTS => {
                tracing::warn!(path, "Data API rate limited the request");
                Err(VitalgateError::RateLimited {
                    retry_after_secs: observed.and_then(|o| o.reset_seconds),
                }
                .into())
            }
            StatusCode::UNAUTHORIZED => {
                tracing::warn!(path, "Data API rejected the access token");
                Err(VitalgateError::NotAuthenticated(
                    "the data API rejected the access token; visit /oauth/authorize to reconnect"
                        .to_string(),
                )
                .into())
            }
            other => {
                tracing::warn!(path, status = other.as_u16(), "Data API returned an error");
                Err(VitalgateError::Upstream(format!(
                    "data API returned HTTP {}",
                    other.as_u16()
                ))
                .into())
            }
        }
    }
}

impl std::fmt::Debug for HealthApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthApiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
