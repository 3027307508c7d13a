//! Error types for Vitalgate
//!
//! This module defines all error types used throughout the broker, using
//! `thiserror` for ergonomic error handling. Every variant maps onto a stable
//! [`ErrorKind`] so that HTTP handlers and the protocol layer can report a
//! structured `{kind, message}` pair without ever exposing token material.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for Vitalgate operations
///
/// Variants never carry access tokens, refresh tokens, authorization codes,
/// or PKCE verifiers. Upstream response bodies are summarised, never echoed.
#[derive(Error, Debug)]
pub enum VitalgateError {
    /// Configuration-related errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The `state` presented to the callback is unknown, expired, or replayed
    #[error("Invalid or expired authorization state")]
    InvalidState,

    /// The authorization server rejected a code or refresh token
    #[error("Token exchange failed: {0}")]
    ExchangeFailed(String),

    /// No usable upstream token; the operator must re-run authorization
    #[error("Not authenticated: {0}")]
    NotAuthenticated(String),

    /// Authenticated decryption failed (tampered blob or wrong key)
    #[error("Crypto failure: ciphertext was tampered with or the key is wrong")]
    CryptoFailure,

    /// The encrypted blob could not be parsed or carries an unknown version
    #[error("Encrypted blob format error: {0}")]
    BlobFormat(String),

    /// Submit to a session that does not exist or is already closed
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// Request envelope or tool arguments have the wrong shape
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// Caller did not present the operator bearer secret
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Upstream data API signalled rate limiting
    #[error("Rate limit exceeded{}", retry_hint(.retry_after_secs))]
    RateLimited {
        /// Seconds until the upstream window resets, when reported
        retry_after_secs: Option<u64>,
    },

    /// Upstream data API failed for a reason other than auth or rate limits
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// A bounded resource (sessions, attempts) is exhausted
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    match retry_after_secs {
        Some(secs) => format!("; retry after {secs} seconds"),
        None => String::new(),
    }
}

/// Stable, wire-visible classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// PKCE state mismatch, expiry, or replay
    InvalidState,
    /// Upstream rejected a code or refresh token
    ExchangeFailed,
    /// No usable token; reauthorize
    NotAuthenticated,
    /// Tampered token file or wrong key
    CryptoFailure,
    /// Submit to a nonexistent or closed session
    UnknownSession,
    /// Bad envelope or argument shape
    MalformedRequest,
    /// Missing or wrong operator bearer secret
    Unauthorized,
    /// Upstream rate limit hit
    RateLimited,
    /// Upstream failure
    UpstreamError,
    /// Session or attempt table full
    CapacityExceeded,
    /// Invalid configuration
    Configuration,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Returns the snake_case wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::ExchangeFailed => "exchange_failed",
            ErrorKind::NotAuthenticated => "not_authenticated",
            ErrorKind::CryptoFailure => "crypto_failure",
            ErrorKind::UnknownSession => "unknown_session",
            ErrorKind::MalformedRequest => "malformed_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Internal => "internal",
        }
    }

    /// HTTP status code used when this kind is reported over HTTP.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidState | ErrorKind::MalformedRequest => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::UnknownSession => 404,
            ErrorKind::NotAuthenticated => 412,
            ErrorKind::RateLimited => 429,
            ErrorKind::ExchangeFailed | ErrorKind::UpstreamError => 502,
            ErrorKind::CapacityExceeded => 503,
            ErrorKind::CryptoFailure | ErrorKind::Configuration | ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl VitalgateError {
    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            VitalgateError::Config(_) => ErrorKind::Configuration,
            VitalgateError::InvalidState => ErrorKind::InvalidState,
            VitalgateError::ExchangeFailed(_) => ErrorKind::ExchangeFailed,
            VitalgateError::NotAuthenticated(_) => ErrorKind::NotAuthenticated,
            VitalgateError::CryptoFailure => ErrorKind::CryptoFailure,
            VitalgateError::UnknownSession(_) => ErrorKind::UnknownSession,
            VitalgateError::MalformedRequest(_) => ErrorKind::MalformedRequest,
            VitalgateError::Unauthorized(_) => ErrorKind::Unauthorized,
            VitalgateError::RateLimited { .. } => ErrorKind::RateLimited,
            VitalgateError::Upstream(_) | VitalgateError::Http(_) => ErrorKind::UpstreamError,
            VitalgateError::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            VitalgateError::BlobFormat(_)
            | VitalgateError::Io(_)
            | VitalgateError::Serialization(_)
            | VitalgateError::Yaml(_) => ErrorKind::Internal,
        }
    }

    /// Convenience constructor for the "run the authorization flow" failure.
    pub fn not_authenticated() -> Self {
        VitalgateError::NotAuthenticated(
            "no usable upstream token; visit /oauth/authorize to connect the account".to_string(),
        )
    }
}

/// Structured error payload returned to callers.
///
/// Serialized as `{"kind": "...", "message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable classification
    pub kind: ErrorKind,
    /// Human-readable explanation
    pub message: String,
}

impl ErrorBody {
    /// Builds an error body from any error produced by this crate.
    ///
    /// Errors that are not [`VitalgateError`] are reported as `internal`
    /// with a generic message so that unexpected context never leaks.
    pub fn from_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<VitalgateError>() {
            Some(VitalgateError::Http(_)) => Self {
                kind: ErrorKind::UpstreamError,
                message: "upstream request failed".to_string(),
            },
            Some(e) if e.kind() == ErrorKind::Internal => Self {
                kind: ErrorKind::Internal,
                message: "internal error".to_string(),
            },
            Some(e) => Self {
                kind: e.kind(),
                message: e.to_string(),
            },
            None => Self {
                kind: ErrorKind::Internal,
                message: "internal error".to_string(),
            },
        }
    }
}

/// Returns the [`ErrorKind`] of an `anyhow::Error`, defaulting to `internal`.
pub fn error_kind(err: &anyhow::Error) -> ErrorKind {
    err.downcast_ref::<VitalgateError>()
        .map(VitalgateError::kind)
        .unwrap_or(ErrorKind::Internal)
}

/// Result type alias for Vitalgate operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = VitalgateError::Config("missing client id".to_string());
        assert_eq!(error.to_string(), "Configuration error: missing client id");
    }

    #[test]
    fn test_kind_wire_names_match_serde() {
        for kind in [
            ErrorKind::InvalidState,
            ErrorKind::ExchangeFailed,
            ErrorKind::NotAuthenticated,
            ErrorKind::CryptoFailure,
            ErrorKind::UnknownSession,
            ErrorKind::MalformedRequest,
            ErrorKind::RateLimited,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(VitalgateError::InvalidState.kind(), ErrorKind::InvalidState);
        assert_eq!(
            VitalgateError::UnknownSession("abc".to_string()).kind(),
            ErrorKind::UnknownSession
        );
        assert_eq!(
            VitalgateError::not_authenticated().kind(),
            ErrorKind::NotAuthenticated
        );
        assert_eq!(
            VitalgateError::BlobFormat("bad".to_string()).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorKind::MalformedRequest.http_status(), 400);
        assert_eq!(ErrorKind::Unauthorized.http_status(), 401);
        assert_eq!(ErrorKind::UnknownSession.http_status(), 404);
        assert_eq!(ErrorKind::NotAuthenticated.http_status(), 412);
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
    }

    #[test]
    fn test_error_body_from_domain_error() {
        let err: anyhow::Error = VitalgateError::MalformedRequest("missing sleep_id".into()).into();
        let body = ErrorBody::from_error(&err);
        assert_eq!(body.kind, ErrorKind::MalformedRequest);
        assert!(body.message.contains("sleep_id"));
    }

    #[test]
    fn test_error_body_hides_foreign_errors() {
        let err = anyhow::anyhow!("secret detail from somewhere");
        let body = ErrorBody::from_error(&err);
        assert_eq!(body.kind, ErrorKind::Internal);
        assert!(!body.message.contains("secret"));
    }

    #[test]
    fn test_error_kind_helper_defaults_to_internal() {
        assert_eq!(error_kind(&anyhow::anyhow!("x")), ErrorKind::Internal);
        let err: anyhow::Error = VitalgateError::CryptoFailure.into();
        assert_eq!(error_kind(&err), ErrorKind::CryptoFailure);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: VitalgateError = io_error.into();
        assert!(matches!(error, VitalgateError::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VitalgateError>();
    }
}
