//! Protocol HTTP endpoints
//!
//! Thin axum adapters over [`Dispatcher`](crate::mcp::Dispatcher). Request
//! bodies are taken as raw bytes and parsed with
//! [`parse_envelope`] so that shape errors come back as `malformed_request`
//! instead of axum's plain-text rejections.

use std::convert::Infallible;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt as _};
use serde_json::json;

use crate::mcp::dispatcher::parse_envelope;
use crate::mcp::types::{CallOutcome, CallRequest, SubmitAccepted, SubmitRequest};
use crate::mcp::SessionEvent;
use crate::server::{error_response, ApiError, AppContext};

/// Rejects requests without the operator bearer secret.
pub async fn require_bearer(
    State(ctx): State<AppContext>,
    request: Request,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    match ctx.dispatcher.authenticate(authorization) {
        Ok(()) => next.run(request).await,
        Err(e) => {
            tracing::warn!(path = %request.uri().path(), "Rejected protocol request without valid bearer token");
            ApiError::from(e).into_response()
        }
    }
}

fn to_sse_event(event: SessionEvent) -> Event {
    match event {
        SessionEvent::Endpoint(endpoint) => Event::default()
            .event("endpoint")
            .data(serde_json::to_string(&endpoint).unwrap_or_default()),
        SessionEvent::Result(result) => Event::default()
            .event("result")
            .data(serde_json::to_string(&result).unwrap_or_default()),
        SessionEvent::Heartbeat => Event::default().comment("heartbeat"),
    }
}

/// `GET /sse`: opens a streaming session.
pub async fn open_stream(
    State(ctx): State<AppContext>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let stream = ctx.dispatcher.open_stream()?;
    Ok(Sse::new(stream.map(|event| Ok(to_sse_event(event)))))
}

/// `POST /sse/messages`: submits a call into a live session.
pub async fn submit(
    State(ctx): State<AppContext>,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitAccepted>), ApiError> {
    let request: SubmitRequest = parse_envelope(&body)?;
    let accepted = ctx.dispatcher.submit(request)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// `DELETE /sse/{session_id}`
pub async fn close_session(
    State(ctx): State<AppContext>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    ctx.dispatcher.close(&session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /call`: one stateless call, answered in the response.
pub async fn call(State(ctx): State<AppContext>, body: Bytes) -> Result<Response, ApiError> {
    let request: CallRequest = parse_envelope(&body)?;
    Ok(match ctx.dispatcher.call(request).await {
        CallOutcome::Result(value) => Json(json!({ "result": value })).into_response(),
        CallOutcome::Error(body) => error_response(body),
    })
}

/// `POST /mcp`: stateless JSON-RPC 2.0.
pub async fn rpc(State(ctx): State<AppContext>, body: Bytes) -> Response {
    match ctx.dispatcher.handle_rpc(&body).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// `GET /tools`
pub async fn list_tools(State(ctx): State<AppContext>) -> Response {
    Json(json!({ "tools": ctx.dispatcher.list_tools() })).into_response()
}

