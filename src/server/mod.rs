//! HTTP server wiring
//!
//! [`AppContext`] owns every piece of process-wide state (token lifecycle,
//! authorization attempts, session table). It is created once by
//! [`AppContext::init`], handed to the router by value (all fields are
//! shared handles), and released by [`AppContext::teardown`].

pub mod oauth_handlers;
pub mod protocol_handlers;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::api::HealthApiClient;
use crate::auth::oauth_client::OAuthClient;
use crate::auth::{AuthorizationFlow, TokenManager, TokenStore};
use crate::config::Config;
use crate::error::{ErrorBody, ErrorKind, Result, VitalgateError};
use crate::mcp::types::SUBMIT_PATH;
use crate::mcp::{Dispatcher, SessionConfig, SessionManager};
use crate::tools::health::register_health_tools;
use crate::tools::ToolRegistry;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Process-wide state shared by every handler.
#[derive(Clone)]
pub struct AppContext {
    /// Validated configuration
    pub config: Arc<Config>,
    /// Token lifecycle (single-flight refresh)
    pub tokens: TokenManager,
    /// Pending PKCE attempts
    pub flow: Arc<AuthorizationFlow>,
    /// Protocol entry point and session table
    pub dispatcher: Dispatcher,
    /// Data API client
    pub api: Arc<HealthApiClient>,
    background: CancellationToken,
}

impl AppContext {
    /// Builds every component from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::Config`] when the encryption key or an
    /// upstream URL is unusable, or an HTTP client cannot be built.
    pub fn init(config: Config) -> Result<Self> {
        let key = config.encryption_key()?;
        let store = Arc::new(TokenStore::new(config.storage.token_path.clone(), key));

        let oauth_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api.timeout_seconds))
            .user_agent(concat!("vitalgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| VitalgateError::Config(format!("failed to build OAuth client: {e}")))?;
        let client = OAuthClient::new(oauth_http, &config.oauth);
        let refresh_buffer = chrono::Duration::seconds(
            i64::try_from(config.oauth.refresh_buffer_seconds).unwrap_or(i64::MAX),
        );
        let tokens = TokenManager::new(store, client, refresh_buffer);

        let flow = Arc::new(AuthorizationFlow::new(&config.oauth, tokens.clone())?);
        let api = Arc::new(HealthApiClient::new(&config.api)?);

        let mut registry = ToolRegistry::new();
        register_health_tools(&mut registry, tokens.clone(), Arc::clone(&api));
        let sessions = SessionManager::new(SessionConfig::from(&config.server));
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            sessions,
            config.server.bearer_token.clone(),
        );

        tracing::debug!(token_path = %config.storage.token_path.display(), "Application context initialised");
        Ok(Self {
            config: Arc::new(config),
            tokens,
            flow,
            dispatcher,
            api,
            background: CancellationToken::new(),
        })
    }

    /// Starts the periodic purge of expired authorization attempts.
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let flow = Arc::clone(&self.flow);
        let cancel = self.background.clone();
        let period = Duration::from_secs(self.config.oauth.purge_interval_seconds.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        flow.purge_expired();
                    }
                }
            }
            tracing::debug!("Maintenance task stopped");
        })
    }

    /// Stops background tasks and closes every protocol session.
    pub fn teardown(&self) {
        self.background.cancel();
        self.dispatcher.shutdown();
        tracing::info!("Application context torn down");
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Errors over HTTP
// ---------------------------------------------------------------------------

/// Maps an [`ErrorKind`] onto its HTTP status.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// `{"error": {"kind", "message"}}` with the kind's status.
pub fn error_response(body: ErrorBody) -> Response {
    (status_for(body.kind), Json(serde_json::json!({ "error": body }))).into_response()
}

/// Handler error: any crate error rendered as a structured body.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody::from_error(&self.0);
        if body.kind == ErrorKind::Internal {
            tracing::error!(error = %self.0, "Request failed");
        }

        let mut response = error_response(body);
        match self.0.downcast_ref::<VitalgateError>() {
            Some(VitalgateError::RateLimited {
                retry_after_secs: Some(secs),
            }) => {
                if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
            }
            Some(VitalgateError::Unauthorized(_)) => {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            _ => {}
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the full router over `ctx`.
///
/// Protocol routes require the operator bearer secret; OAuth and health
/// routes do not.
pub fn build_router(ctx: AppContext) -> Router {
    let protocol = Router::new()
        .route("/sse", get(protocol_handlers::open_stream))
        .route(SUBMIT_PATH, post(protocol_handlers::submit))
        .route("/sse/:session_id", delete(protocol_handlers::close_session))
        .route("/call", post(protocol_handlers::call))
        .route("/mcp", post(protocol_handlers::rpc))
        .route("/tools", get(protocol_handlers::list_tools))
        .layer(axum::middleware::from_fn_with_state(
            ctx.clone(),
            protocol_handlers::require_bearer,
        ));

    Router::new()
        .route("/health", get(oauth_handlers::health))
        .route("/oauth/authorize", get(oauth_handlers::authorize_handler))
        .route("/oauth/callback", get(oauth_handlers::callback_handler))
        .route("/oauth/status", get(oauth_handlers::status_handler))
        .merge(protocol)
        .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
            // Path only: the callback query string carries the authorization code.
            tracing::info_span!(
                "http.request",
                method = %req.method(),
                path = %req.uri().path(),
            )
        }))
        .with_state(ctx)
}

/// Binds the configured address and serves until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(ctx: AppContext) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind tcp {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "Vitalgate listening");

    let maintenance = ctx.spawn_maintenance();
    axum::serve(listener, build_router(ctx.clone()))
        .with_graceful_shutdown(shutdown_signal(ctx.clone()))
        .await
        .context("serve tcp")?;

    ctx.teardown();
    if let Err(e) = maintenance.await {
        tracing::warn!(error = %e, "Maintenance task ended abnormally");
    }
    Ok(())
}

/// Waits for Ctrl-C, then tears the context down so open event streams end
/// and graceful shutdown can complete.
async fn shutdown_signal(ctx: AppContext) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    ctx.teardown();
}
