//! Tools module for Vitalgate
//!
//! This module defines the shared tool-execution boundary used by both
//! protocol transports: the [`ToolExecutor`] trait, the [`ToolRegistry`]
//! that resolves tool names, and argument helpers. Concrete data tools live
//! in [`health`].

pub mod args;
pub mod health;

use crate::error::{Result, VitalgateError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Public description of a tool, as returned by tool listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name
    pub name: String,
    /// What the tool returns
    pub description: String,
    /// JSON Schema for the `arguments` object
    pub input_schema: Value,
}

/// Tool executor trait for implementing tool execution logic
///
/// Implementations validate their arguments before touching the network or
/// asking for an upstream token, and report shape problems as
/// [`VitalgateError::MalformedRequest`].
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use vitalgate::error::Result;
/// use vitalgate::tools::{ToolDescriptor, ToolExecutor};
///
/// struct Echo;
///
/// #[async_trait]
/// impl ToolExecutor for Echo {
///     fn tool_definition(&self) -> ToolDescriptor {
///         ToolDescriptor {
///             name: "echo".to_string(),
///             description: "Returns its arguments".to_string(),
///             input_schema: json!({"type": "object"}),
///         }
///     }
///
///     async fn execute(&self, args: Value) -> Result<Value> {
///         Ok(args)
///     }
/// }
/// ```
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Returns the tool's name, description and input schema
    fn tool_definition(&self) -> ToolDescriptor;

    /// Executes the tool with the given arguments
    ///
    /// # Arguments
    ///
    /// * `args` - JSON object of arguments (an empty object when none given)
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::MalformedRequest`] for bad arguments,
    /// [`VitalgateError::NotAuthenticated`] when no upstream token is
    /// usable, and upstream errors from the data client.
    async fn execute(&self, args: Value) -> Result<Value>;
}

/// Tool registry for managing available tools
///
/// Both the streaming and the stateless transport resolve tools through the
/// same registry, so a tool behaves identically on either path.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool executor under its descriptor name
    pub fn register(&mut self, executor: Arc<dyn ToolExecutor>) {
        let name = executor.tool_definition().name;
        self.tools.insert(name, executor);
    }

    /// Get a tool executor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.get(name).cloned()
    }

    /// All tool descriptors, sorted by name
    pub fn all_definitions(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|executor| executor.tool_definition())
            .collect()
    }

    /// Get the number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolves `name` and executes it with `args`.
    ///
    /// `null` arguments are treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`VitalgateError::MalformedRequest`] for unknown tools or
    /// non-object arguments, otherwise whatever the tool returns.
    ///
    /// # Examples
    ///
    /// ```
    /// use vitalgate::error::{error_kind, ErrorKind};
    /// use vitalgate::tools::ToolRegistry;
    ///
    /// # tokio_test::block_on(async {
    /// let registry = ToolRegistry::new();
    /// let err = registry.call("get_profile", serde_json::json!({})).await.unwrap_err();
    /// assert_eq!(error_kind(&err), ErrorKind::MalformedRequest);
    /// # });
    /// ```
    pub async fn call(&self, name: &str, args: Value) -> Result<Value> {
        let executor = self.get(name).ok_or_else(|| {
            VitalgateError::MalformedRequest(format!("unknown tool '{}'", name))
        })?;

        let args = match args {
            Value::Null => Value::Object(serde_json::Map::new()),
            obj @ Value::Object(_) => obj,
            _ => {
                return Err(VitalgateError::MalformedRequest(
                    "arguments must be a JSON object".to_string(),
                )
                .into())
            }
        };

        tracing::debug!(tool = name, "Executing tool");
        executor.execute(args).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{error_kind, ErrorKind};
    use serde_json::json;

    struct MockToolExecutor {
        name: String,
    }

    #[async_trait]
    impl ToolExecutor for MockToolExecutor {
        fn tool_definition(&self) -> ToolDescriptor {
            ToolDescriptor {
                name: self.name.clone(),
                description: "Mock tool".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, args: Value) -> Result<Value> {
            Ok(json!({"tool": self.name, "args": args}))
        }
    }

    fn registry_with(names: &[&str]) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for name in names {
            registry.register(Arc::new(MockToolExecutor {
                name: name.to_string(),
            }));
        }
        registry
    }

    #[test]
    fn test_tool_registry_new_is_empty() {
        let registry = ToolRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_tool_registry_register_uses_descriptor_name() {
        let registry = registry_with(&["beta", "alpha"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("gamma").is_none());
    }

    #[test]
    fn test_tool_registry_definitions_are_sorted() {
        let registry = registry_with(&["beta", "alpha"]);
        let names: Vec<_> = registry
            .all_definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_descriptor_serializes_input_schema_camel_case() {
        let registry = registry_with(&["alpha"]);
        let json = serde_json::to_value(&registry.all_definitions()[0]).unwrap();
        assert!(json.get("inputSchema").is_some());
    }

    #[tokio::test]
    async fn test_call_dispatches_with_empty_object_for_null() {
        let registry = registry_with(&["alpha"]);
        let out = registry.call("alpha", Value::Null).await.unwrap();
        assert_eq!(out, json!({"tool": "alpha", "args": {}}));
    }

    #[tokio::test]
    async fn test_call_unknown_tool_is_malformed() {
        let registry = registry_with(&["alpha"]);
        let err = registry.call("nope", json!({})).await.unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::MalformedRequest);
    }

    #[tokio::test]
    async fn test_call_non_object_arguments_is_malformed() {
        let registry = registry_with(&["alpha"]);
        let err = registry.call("alpha", json!([1, 2])).await.unwrap_err();
        assert_eq!(error_kind(&err), ErrorKind::MalformedRequest);
    }
}
