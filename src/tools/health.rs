//! Health-data tools
//!
//! Each tool maps onto one data API endpoint and returns the upstream JSON
//! unchanged, except `summarize_recovery`, which reduces one page of
//! recoveries with a documented heuristic (see [`summarize_recoveries`]).
//! Arguments are validated and the request path is built before an access
//! token is requested, so malformed calls never reach the token manager or
//! the network.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::HealthApiClient;
use crate::auth::TokenManager;
use crate::error::{Result, VitalgateError};
use crate::tools::args::ToolArgs;
use crate::tools::{ToolDescriptor, ToolExecutor, ToolRegistry};

/// Largest page size the data API accepts.
pub const MAX_PAGE_SIZE: u64 = 25;

#[derive(Debug, Clone, Copy)]
enum Endpoint {
    /// A fixed resource with no arguments
    Single(&'static str),
    /// A paginated collection filtered by time range
    Collection(&'static str),
    /// One record addressed by id, appended to the path
    ById {
        prefix: &'static str,
        id_arg: &'static str,
    },
}

/// How the upstream body is turned into the tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    PassThrough,
    RecoverySummary,
}

#[derive(Debug, Clone, Copy)]
struct ToolSpec {
    name: &'static str,
    description: &'static str,
    endpoint: Endpoint,
    shape: Shape,
}

const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_profile",
        description: "Basic profile of the connected user (name, email, user id).",
        endpoint: Endpoint::Single("/v1/user/profile/basic"),
        shape: Shape::PassThrough,
    },
    ToolSpec {
        name: "get_body_measurement",
        description: "Height, weight and max heart rate of the connected user.",
        endpoint: Endpoint::Single("/v1/user/measurement/body"),
        shape: Shape::PassThrough,
    },
    ToolSpec {
        name: "list_cycles",
        description: "Physiological cycles (strain, kilojoules, heart rate) in a time range.",
        endpoint: Endpoint::Collection("/v1/cycle"),
        shape: Shape::PassThrough,
    },
    ToolSpec {
        name: "list_recoveries",
        description: "Recovery scores (HRV, resting heart rate, SpO2) in a time range.",
        endpoint: Endpoint::Collection("/v1/recovery"),
        shape: Shape::PassThrough,
    },
    ToolSpec {
        name: "list_sleeps",
        description: "Sleep activities with stage durations and performance in a time range.",
        endpoint: Endpoint::Collection("/v1/activity/sleep"),
        shape: Shape::PassThrough,
    },
    ToolSpec {
        name: "list_workouts",
        description: "Workouts with strain, heart rate zones and distance in a time range.",
        endpoint: Endpoint::Collection("/v1/activity/workout"),
        shape: Shape::PassThrough,
    },
    ToolSpec {
        name: "get_cycle",
        description: "A single physiological cycle by id.",
        endpoint: Endpoint::ById {
            prefix: "/v1/cycle",
            id_arg: "cycle_id",
        },
        shape: Shape::PassThrough,
    },
    ToolSpec {
        name: "get_sleep",
        description: "A single sleep activity by id.",
        endpoint: Endpoint::ById {
            prefix: "/v1/activity/sleep",
            id_arg: "sleep_id",
        },
        shape: Shape::PassThrough,
    },
    ToolSpec {
        name: "get_workout",
        description: "A single workout by id.",
        endpoint: Endpoint::ById {
            prefix: "/v1/activity/workout",
            id_arg: "workout_id",
        },
        shape: Shape::PassThrough,
    },
    ToolSpec {
        name: "summarize_recovery",
        description: "Heuristic averages (resting heart rate, HRV, recovery score) over one page of scored recoveries in a time range.",
        endpoint: Endpoint::Collection("/v1/recovery"),
        shape: Shape::RecoverySummary,
    },
];

/// Name of the reduction reported by [`summarize_recoveries`].
pub const RECOVERY_HEURISTIC: &str = "arithmetic mean over scored records on a single page";

/// Reduces one page of recovery records to simple averages.
///
/// This is an approximation, not a clinical value:
///
/// - only records with `score_state == "SCORED"` and a `score` object count
/// - each metric is the arithmetic mean of the values present; a record
///   missing one metric still contributes to the others
/// - only the fetched page is considered; `nextToken` is returned so callers
///   can tell the summary covers partial data
///
/// Means are rounded to one decimal place. A metric with no samples is `null`.
pub fn summarize_recoveries(page: &Value) -> Value {
    let records = page
        .get("records")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let scored: Vec<&Value> = records
        .iter()
        .filter(|r| r.get("score_state").and_then(Value::as_str) == Some("SCORED"))
        .filter_map(|r| r.get("score").filter(|s| s.is_object()))
        .collect();

    let mean = |field: &str| -> Value {
        let samples: Vec<f64> = scored
            .iter()
            .filter_map(|score| score.get(field).and_then(Value::as_f64))
            .collect();
        if samples.is_empty() {
            return Value::Null;
        }
        let avg = samples.iter().sum::<f64>() / samples.len() as f64;
        json!((avg * 10.0).round() / 10.0)
    };

    json!({
        "heuristic": RECOVERY_HEURISTIC,
        "scoredRecords": scored.len(),
        "unscoredRecords": records.len() - scored.len(),
        "restingHeartRate": mean("resting_heart_rate"),
        "hrvRmssdMilli": mean("hrv_rmssd_milli"),
        "recoveryScore": mean("recovery_score"),
        "nextToken": page.get("next_token").cloned().unwrap_or(Value::Null),
    })
}

/// A validated upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiRequest {
    path: String,
    query: Vec<(String, String)>,
}

impl Endpoint {
    fn input_schema(&self) -> Value {
        match self {
            Endpoint::Single(_) => json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
            Endpoint::Collection(_) => json!({
                "type": "object",
                "properties": {
                    "start": {"type": "string", "format": "date-time", "description": "Inclusive lower bound (RFC 3339)"},
                    "end": {"type": "string", "format": "date-time", "description": "Exclusive upper bound (RFC 3339)"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": MAX_PAGE_SIZE, "description": "Page size"},
                    "next_token": {"type": "string", "description": "Pagination token from a previous page"}
                },
                "additionalProperties": false
            }),
            Endpoint::ById { id_arg, .. } => {
                let mut properties = serde_json::Map::new();
                properties.insert(
                    id_arg.to_string(),
                    json!({"type": ["string", "integer"], "description": "Record id"}),
                );
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": [id_arg],
                    "additionalProperties": false
                })
            }
        }
    }

    fn build_request(&self, args: &Value) -> Result<ApiRequest> {
        let args = ToolArgs::new(args)?;
        match self {
            Endpoint::Single(path) => {
                args.deny_unknown(&[])?;
                Ok(ApiRequest {
                    path: path.to_string(),
                    query: Vec::new(),
                })
            }
            Endpoint::Collection(path) => {
                args.deny_unknown(&["start", "end", "limit", "next_token"])?;
                let start = args.optional_timestamp("start")?;
                let end = args.optional_timestamp("end")?;
                if let (Some(s), Some(e)) = (start, end) {
                    if e <= s {
                        return Err(VitalgateError::MalformedRequest(
                            "argument 'end' must be later than 'start'".to_string(),
                        )
                        .into());
                    }
                }

                let mut query = Vec::new();
                if let Some(s) = start {
                    query.push(("start".to_string(), s.to_rfc3339()));
                }
                if let Some(e) = end {
                    query.push(("end".to_string(), e.to_rfc3339()));
                }
                if let Some(limit) = args.optional_int_in("limit", 1, MAX_PAGE_SIZE)? {
                    query.push(("limit".to_string(), limit.to_string()));
                }
                if let Some(token) = args.optional_str("next_token")? {
                    query.push(("nextToken".to_string(), token));
                }
                Ok(ApiRequest {
                    path: path.to_string(),
                    query,
                })
            }
            Endpoint::ById { prefix, id_arg } => {
                args.deny_unknown(&[*id_arg])?;
                let id = args.required_id(id_arg)?;
                Ok(ApiRequest {
                    path: format!("{}/{}", prefix, id),
                    query: Vec::new(),
                })
            }
        }
    }
}

/// One data tool bound to the token manager and data client.
pub struct HealthTool {
    spec: ToolSpec,
    tokens: TokenManager,
    api: Arc<HealthApiClient>,
}

#[async_trait]
impl ToolExecutor for HealthTool {
    fn tool_definition(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.spec.name.to_string(),
            description: self.spec.description.to_string(),
            input_schema: self.spec.endpoint.input_schema(),
        }
    }

    async fn execute(&self, args: Value) -> Result<Value> {
        let request = self.spec.endpoint.build_request(&args)?;
        let token = self.tokens.get_valid_token().await?;
        let body = self
            .api
            .get_json(&request.path, &request.query, &token)
            .await?;
        Ok(match self.spec.shape {
            Shape::PassThrough => body,
            Shape::RecoverySummary => summarize_recoveries(&body),
        })
    }
}

/// Registers every data tool on `registry`.
pub fn register_health_tools(
    registry: &mut ToolRegistry,
    tokens: TokenManager,
    api: Arc<HealthApiClient>,
) {
    for spec in TOOLS {
        registry.register(Arc::new(HealthTool {
            spec: *spec,
            tokens: tokens.clone(),
            api: Arc::clone(&api),
        }));
    }
}
