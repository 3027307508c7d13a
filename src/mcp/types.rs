//! Wire types for the protocol endpoints
//!
//! Two families live here: the call envelopes used by the streaming and
//! stateless transports (`/sse`, `/sse/messages`, `/call`), and the JSON-RPC
//! 2.0 primitives used by the `/mcp` endpoint. Struct fields are `camelCase`
//! on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ErrorBody;
use crate::tools::ToolDescriptor;

// ---------------------------------------------------------------------------
// Protocol constants
// ---------------------------------------------------------------------------

/// Protocol revision announced in `initialize` responses.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// `initialize` request
pub const METHOD_INITIALIZE: &str = "initialize";
/// `notifications/initialized` notification
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
/// `ping` request
pub const METHOD_PING: &str = "ping";
/// `tools/list` request
pub const METHOD_TOOLS_LIST: &str = "tools/list";
/// `tools/call` request
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Invalid JSON was received
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters
pub const INVALID_PARAMS: i64 = -32602;

/// Path clients POST streaming submissions to.
pub const SUBMIT_PATH: &str = "/sse/messages";

// ---------------------------------------------------------------------------
// Call envelopes
// ---------------------------------------------------------------------------

/// Stateless call body: `{toolName, arguments}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CallRequest {
    /// Tool to run
    pub tool_name: String,
    /// Tool arguments (object)
    #[serde(default)]
    pub arguments: Value,
}

/// Streaming submit body: `{sessionId, invocationId, toolName, arguments}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SubmitRequest {
    /// Target session
    pub session_id: String,
    /// Caller-chosen correlation id
    pub invocation_id: String,
    /// Tool to run
    pub tool_name: String,
    /// Tool arguments (object)
    #[serde(default)]
    pub arguments: Value,
}

/// Acknowledgement returned by the submit endpoint (HTTP 202).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAccepted {
    /// Always `true`
    pub accepted: bool,
    /// Echo of the target session
    pub session_id: String,
    /// Echo of the correlation id
    pub invocation_id: String,
}

/// Outcome of one tool call: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallOutcome {
    /// Tool output
    Result(Value),
    /// Structured failure
    Error(ErrorBody),
}

impl CallOutcome {
    /// Builds an outcome from a tool result.
    pub fn from_result(result: crate::error::Result<Value>) -> Self {
        match result {
            Ok(value) => CallOutcome::Result(value),
            Err(e) => CallOutcome::Error(ErrorBody::from_error(&e)),
        }
    }
}

/// `endpoint` event payload, the first event on every stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointEvent {
    /// The new session's id
    pub session_id: String,
    /// Where to POST submissions
    pub submit_url: String,
}

/// `result` event payload, tagged with the originating invocation.
///
/// Serializes as `{"invocationId": "...", "result": ...}` or
/// `{"invocationId": "...", "error": {"kind", "message"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEvent {
    /// Correlation id from the submit request
    pub invocation_id: String,
    /// The call's outcome
    #[serde(flatten)]
    pub outcome: CallOutcome,
}

// ---------------------------------------------------------------------------
// JSON-RPC 2.0
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request or notification (no `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name
    pub method: String,
    /// Method parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Notifications carry no `id` and get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Mirrors the request id (`null` when it could not be read)
    pub id: Value,
    /// Successful result; mutually exclusive with `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object; mutually exclusive with `result`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Success response for `id`.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response for `id`.
    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code
    pub code: i64,
    /// Human-readable description
    pub message: String,
    /// Optional extra context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

/// `tools/call` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// Tool name
    pub name: String,
    /// Tool arguments
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// `tools/list` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Every registered tool
    pub tools: Vec<ToolDescriptor>,
}

/// A content item in a `tools/call` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
}

/// `tools/call` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Output rendered as text content
    pub content: Vec<ToolContent>,
    /// `true` when the tool failed
    #[serde(default)]
    pub is_error: bool,
    /// Tool output as JSON, or the error body on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl From<CallOutcome> for CallToolResult {
    fn from(outcome: CallOutcome) -> Self {
        match outcome {
            CallOutcome::Result(value) => Self {
                content: vec![ToolContent::Text {
                    text: value.to_string(),
                }],
                is_error: false,
                structured_content: Some(value),
            },
            CallOutcome::Error(body) => Self {
                content: vec![ToolContent::Text {
                    text: format!("{}: {}", body.kind, body.message),
                }],
                is_error: true,
                structured_content: serde_json::to_value(&body).ok(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_result_event_success_shape() {
        let event = ResultEvent {
            invocation_id: "inv-1".to_string(),
            outcome: CallOutcome::Result(json!({"score": 71})),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"invocationId": "inv-1", "result": {"score": 71}})
        );
    }

    #[test]
    fn test_result_event_error_shape() {
        let event = ResultEvent {
            invocation_id: "inv-2".to_string(),
            outcome: CallOutcome::Error(ErrorBody {
                kind: ErrorKind::NotAuthenticated,
                message: "reconnect".to_string(),
            }),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "invocationId": "inv-2",
                "error": {"kind": "not_authenticated", "message": "reconnect"}
            })
        );
    }

    #[test]
    fn test_submit_request_requires_all_fields() {
        let ok: SubmitRequest = serde_json::from_value(json!({
            "sessionId": "s",
            "invocationId": "i",
            "toolName": "get_profile"
        }))
        .unwrap();
        assert_eq!(ok.arguments, Value::Null);

        let missing = serde_json::from_value::<SubmitRequest>(json!({
            "sessionId": "s",
            "toolName": "get_profile"
        }));
        assert!(missing.is_err());
    }

    #[test]
    fn test_call_request_rejects_unknown_fields() {
        let bad = serde_json::from_value::<CallRequest>(json!({
            "toolName": "get_profile",
            "args": {}
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_jsonrpc_notification_detection() {
        let req: JsonRpcRequest = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn test_jsonrpc_failure_omits_result() {
        let resp = JsonRpcResponse::failure(json!(7), METHOD_NOT_FOUND, "nope");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"]["code"], -32601);
        assert!(json.get("result").is_none());
        assert_eq!(json["id"], 7);
    }

    #[test]
    fn test_call_tool_result_from_error_outcome() {
        let result = CallToolResult::from(CallOutcome::Error(ErrorBody {
            kind: ErrorKind::MalformedRequest,
            message: "missing sleep_id".to_string(),
        }));
        assert!(result.is_error);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["structuredContent"]["kind"], "malformed_request");
    }
}
