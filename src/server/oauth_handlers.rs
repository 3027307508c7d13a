//! OAuth HTTP endpoints
//!
//! Each endpoint is a plain function from the request inputs and the
//! [`AppContext`] to an [`OAuthResponse`]; the `*_handler` adapters at the
//! bottom bind them to axum. Pages never include upstream response bodies,
//! tokens, or the authorization code.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{TokenRecord, TokenStatus};
use crate::error::{ErrorBody, ErrorKind, VitalgateError};
use crate::server::{status_for, AppContext};

/// Query parameters the authorization server sends to the callback.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CallbackParams {
    /// Round-tripped attempt id
    pub state: Option<String>,
    /// Authorization code
    pub code: Option<String>,
    /// Set when the user denied consent or the request was invalid
    pub error: Option<String>,
    /// Optional human-readable detail for `error`
    pub error_description: Option<String>,
}

/// Framework-independent endpoint result.
#[derive(Debug, Clone, PartialEq)]
pub enum OAuthResponse {
    /// 302 to `location`
    Redirect {
        /// Target URL
        location: String,
    },
    /// HTML page
    Page {
        /// HTTP status
        status: StatusCode,
        /// Rendered document
        html: String,
    },
}

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Starts an attempt and redirects to the authorization server.
pub fn authorize(ctx: &AppContext) -> OAuthResponse {
    let start = ctx.flow.begin();
    OAuthResponse::Redirect {
        location: start.authorization_url,
    }
}

/// Completes the attempt named by `params.state`.
///
/// Every branch that names a state consumes the matching attempt, whether
/// the outcome is success, denial, or exchange failure.
pub async fn callback(ctx: &AppContext, params: CallbackParams) -> OAuthResponse {
    let Some(state) = params.state.as_deref().filter(|s| !s.is_empty()) else {
        return failure_page(ErrorBody {
            kind: ErrorKind::InvalidState,
            message: VitalgateError::InvalidState.to_string(),
        });
    };

    if let Some(error) = params.error.as_deref() {
        if ctx.flow.abandon(state).is_err() {
            tracing::debug!("Denied callback carried no live attempt");
        }
        tracing::warn!(error = %error, "Authorization server returned an error");
        let detail = params
            .error_description
            .as_deref()
            .map(|d| format!("{error}: {d}"))
            .unwrap_or_else(|| error.to_string());
        return failure_page_with_status(
            StatusCode::BAD_REQUEST,
            ErrorBody {
                kind: ErrorKind::ExchangeFailed,
                message: format!("authorization was not granted ({detail})"),
            },
        );
    }

    let Some(code) = params.code.as_deref().filter(|c| !c.is_empty()) else {
        let _ = ctx.flow.abandon(state);
        return failure_page(ErrorBody {
            kind: ErrorKind::MalformedRequest,
            message: "callback is missing the 'code' parameter".to_string(),
        });
    };

    match ctx.flow.complete(state, code).await {
        Ok(record) => success_page(&record),
        Err(e) => failure_page(ErrorBody::from_error(&e)),
    }
}

/// Token-free connection summary.
pub async fn status(ctx: &AppContext) -> TokenStatus {
    ctx.tokens.status().await
}

// ---------------------------------------------------------------------------
// Pages
// ---------------------------------------------------------------------------

/// Escapes text for inclusion in HTML element content or attributes.
fn html_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Vitalgate - {title}</title>
</head>
<body>
<h1>{title}</h1>
{body}
</body>
</html>
"#,
        title = html_escape(title),
        body = body,
    )
}

fn success_page(record: &TokenRecord) -> OAuthResponse {
    let scope = if record.scope.is_empty() {
        "(none reported)".to_string()
    } else {
        html_escape(&record.scope)
    };
    let body = format!(
        "<p>The account is connected. You can close this window.</p>\n\
         <p>Access token expires at {}.</p>\n<p>Granted scopes: {}</p>",
        html_escape(&record.expires_at.to_rfc3339()),
        scope
    );
    OAuthResponse::Page {
        status: StatusCode::OK,
        html: page("Account connected", &body),
    }
}

fn failure_page(body: ErrorBody) -> OAuthResponse {
    failure_page_with_status(status_for(body.kind), body)
}

fn failure_page_with_status(status: StatusCode, body: ErrorBody) -> OAuthResponse {
    let html = format!(
        "<p>Error: <code>{}</code></p>\n<p>{}</p>\n<p><a href=\"/oauth/authorize\">Try again</a></p>",
        html_escape(body.kind.as_str()),
        html_escape(&body.message)
    );
    OAuthResponse::Page {
        status,
        html: page("Authorization failed", &html),
    }
}

impl IntoResponse for OAuthResponse {
    fn into_response(self) -> Response {
        match self {
            OAuthResponse::Redirect { location } => (
                StatusCode::FOUND,
                [
                    (header::LOCATION, location),
                    (header::CACHE_CONTROL, "no-store".to_string()),
                ],
            )
                .into_response(),
            OAuthResponse::Page { status, html } => (
                status,
                [(header::CACHE_CONTROL, "no-store")],
                Html(html),
            )
                .into_response(),
        }
    }
}

// ---------------------------------------------------------------------------
// axum adapters
// ---------------------------------------------------------------------------

/// `GET /oauth/authorize`
pub async fn authorize_handler(State(ctx): State<AppContext>) -> OAuthResponse {
    authorize(&ctx)
}

/// `GET /oauth/callback`
pub async fn callback_handler(
    State(ctx): State<AppContext>,
    Query(params): Query<CallbackParams>,
) -> OAuthResponse {
    callback(&ctx, params).await
}

/// `GET /oauth/status`
pub async fn status_handler(State(ctx): State<AppContext>) -> Json<TokenStatus> {
    Json(status(&ctx).await)
}

/// `GET /health`
///
/// Reports liveness plus the last rate-limit window the data API announced,
/// or `null` before any data call.
pub async fn health(State(ctx): State<AppContext>) -> Json<Value> {
    let rate_limit = ctx.api.rate_limit();
    let rate_limit = match rate_limit.observed_at {
        Some(_) => json!(rate_limit),
        None => Value::Null,
    };
    Json(json!({"status": "ok", "rateLimit": rate_limit}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape(r#"<script>alert("x&y")</script>"#),
            "&lt;script&gt;alert(&quot;x&amp;y&quot;)&lt;/script&gt;"
        );
    }

    #[test]
    fn test_failure_page_escapes_message() {
        let response = failure_page(ErrorBody {
            kind: ErrorKind::ExchangeFailed,
            message: "<b>bad</b>".to_string(),
        });
        match response {
            OAuthResponse::Page { status, html } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert!(html.contains("exchange_failed"));
                assert!(html.contains("&lt;b&gt;bad&lt;/b&gt;"));
                assert!(!html.contains("<b>"));
            }
            other => panic!("expected page, got {:?}", other),
        }
    }

    #[test]
    fn test_redirect_response_headers() {
        let response = OAuthResponse::Redirect {
            location: "https://auth.example/authorize?state=abc".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://auth.example/authorize?state=abc"
        );
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert!(response.headers().get(header::SET_COOKIE).is_none());
    }
}
