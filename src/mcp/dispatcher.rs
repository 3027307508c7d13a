//! Transport dispatcher
//!
//! Routes authenticated requests to either the streaming path (open a
//! session, submit into it, close it) or the stateless path (one call, one
//! response). Both end in [`ToolRegistry::call`], so a tool sees the same
//! arguments and returns the same errors on either path.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{Result, VitalgateError};
use crate::mcp::session::{SessionManager, SessionStream};
use crate::mcp::types::{
    CallOutcome, CallRequest, CallToolParams, CallToolResult, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, SubmitAccepted, SubmitRequest, INVALID_PARAMS, INVALID_REQUEST,
    METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_NOT_FOUND, METHOD_PING, METHOD_TOOLS_CALL,
    METHOD_TOOLS_LIST, PARSE_ERROR, PROTOCOL_VERSION,
};
use crate::tools::{ToolDescriptor, ToolRegistry};

/// Compares two secrets without returning early on the first mismatch.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

/// Deserializes a request envelope, reporting shape problems as
/// [`VitalgateError::MalformedRequest`].
pub fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        VitalgateError::MalformedRequest(format!("invalid request body: {}", e)).into()
    })
}

/// Shared entry point for both protocol transports.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    sessions: SessionManager,
    operator_secret: Arc<str>,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry` and `sessions`.
    ///
    /// # Arguments
    ///
    /// * `registry` - Tools available on both transports
    /// * `sessions` - Table of streaming sessions
    /// * `operator_secret` - Bearer secret every protocol request must carry
    pub fn new(
        registry: Arc<ToolRegistry>,
        sessions: SessionManager,
        operator_secret: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            sessions,
            operator_secret: Arc::from(operator_secret.into()),
        }
    }

    /// The session table.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Checks an `Authorization` header value against the operator secret.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::Unauthorized`] when the header is absent,
    /// is not a bearer credential, or carries the wrong secret.
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<()> {
        let header = authorization
            .ok_or_else(|| VitalgateError::Unauthorized("missing bearer token".to_string()))?;
        let token = match header.trim().split_once(' ') {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => token.trim(),
            _ => {
                return Err(
                    VitalgateError::Unauthorized("expected a bearer token".to_string()).into(),
                )
            }
        };
        if token.is_empty() || !constant_time_eq(token.as_bytes(), self.operator_secret.as_bytes()) {
            return Err(VitalgateError::Unauthorized("invalid bearer token".to_string()).into());
        }
        Ok(())
    }

    /// Opens a streaming session.
    pub fn open_stream(&self) -> Result<SessionStream> {
        self.sessions.open()
    }

    /// Accepts a streaming submission; the result arrives on the session's
    /// stream tagged with `invocation_id`.
    ///
    /// Argument validation happens inside the tool, so a call with bad
    /// arguments is accepted here and answered with an error event.
    ///
    /// # Errors
    ///
    /// - [`VitalgateError::MalformedRequest`] for empty ids, unknown tools, a
    ///   duplicate pending invocation, or non-object arguments
    /// - [`VitalgateError::UnknownSession`] for an absent or closed session
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitAccepted> {
        let SubmitRequest {
            session_id,
            invocation_id,
            tool_name,
            arguments,
        } = request;

        if invocation_id.trim().is_empty() {
            return Err(
                VitalgateError::MalformedRequest("invocationId must not be empty".to_string())
                    .into(),
            );
        }
        if self.registry.get(&tool_name).is_none() {
            return Err(
                VitalgateError::MalformedRequest(format!("unknown tool '{}'", tool_name)).into(),
            );
        }
        if !(arguments.is_object() || arguments.is_null()) {
            return Err(VitalgateError::MalformedRequest(
                "arguments must be a JSON object".to_string(),
            )
            .into());
        }

        let registry = Arc::clone(&self.registry);
        let name = tool_name.clone();
        self.sessions
            .dispatch(&session_id, &invocation_id, &tool_name, async move {
                CallOutcome::from_result(registry.call(&name, arguments).await)
            })?;

        Ok(SubmitAccepted {
            accepted: true,
            session_id,
            invocation_id,
        })
    }

    /// Closes a streaming session on client request.
    pub fn close(&self, session_id: &str) -> Result<()> {
        self.sessions.close_explicit(session_id)
    }

    /// Executes one stateless call. No session is created.
    pub async fn call(&self, request: CallRequest) -> CallOutcome {
        let outcome =
            CallOutcome::from_result(self.registry.call(&request.tool_name, request.arguments).await);
        if let CallOutcome::Error(body) = &outcome {
            tracing::info!(tool = %request.tool_name, kind = %body.kind, "Stateless call failed");
        }
        outcome
    }

    /// Descriptors of every tool.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.all_definitions()
    }

    /// Handles one JSON-RPC message on the stateless endpoint.
    ///
    /// Returns `None` for notifications, which get no response body.
    pub async fn handle_rpc(&self, body: &[u8]) -> Option<JsonRpcResponse> {
        let raw: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(_) => {
                return Some(JsonRpcResponse::failure(Value::Null, PARSE_ERROR, "parse error"))
            }
        };
        let id_hint = raw.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::failure(
                    id_hint,
                    INVALID_REQUEST,
                    format!("invalid request: {}", e),
                ))
            }
        };
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::failure(
                id_hint,
                INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            ));
        }

        let Some(id) = request.id.clone() else {
            if request.method != METHOD_INITIALIZED {
                tracing::debug!(method = %request.method, "Ignoring notification");
            }
            return None;
        };

        let response = match request.method.as_str() {
            METHOD_INITIALIZE => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
            ),
            METHOD_PING => JsonRpcResponse::success(id, json!({})),
            METHOD_TOOLS_LIST => {
                let result = ListToolsResult {
                    tools: self.list_tools(),
                };
                match serde_json::to_value(result) {
                    Ok(v) => JsonRpcResponse::success(id, v),
                    Err(e) => JsonRpcResponse::failure(id, INVALID_REQUEST, e.to_string()),
                }
            }
            METHOD_TOOLS_CALL => self.rpc_tools_call(id, request.params).await,
            other => JsonRpcResponse::failure(
                id,
                METHOD_NOT_FOUND,
                format!("method not found: {}", other),
            ),
        };
        Some(response)
    }

    async fn rpc_tools_call(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(p)) => p,
            _ => {
                return JsonRpcResponse::failure(
                    id,
                    INVALID_PARAMS,
                    "tools/call requires {name, arguments}",
                )
            }
        };
        if self.registry.get(&params.name).is_none() {
            return JsonRpcResponse::failure(
                id,
                INVALID_PARAMS,
                format!("unknown tool: {}", params.name),
            );
        }

        let outcome = self
            .call(CallRequest {
                tool_name: params.name,
                arguments: params.arguments.unwrap_or(Value::Null),
            })
            .await;
        match serde_json::to_value(CallToolResult::from(outcome)) {
            Ok(v) => JsonRpcResponse::success(id, v),
            Err(e) => JsonRpcResponse::failure(id, INVALID_PARAMS, e.to_string()),
        }
    }

    /// Closes every session.
    pub fn shutdown(&self) {
        self.sessions.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .field("operator_secret", &"<redacted>")
            .finish()
    }
}
