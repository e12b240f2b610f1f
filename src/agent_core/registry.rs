//! Capability registry: tool definitions plus their invocation functions.
//!
//! Provides:
//! - Registration with last-write-wins name uniqueness
//! - Lookup-and-execute by tool name
//! - Definitions in the order they are sent to the model
//! - A capability summary for the system prompt

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::AgentError;
use crate::inference::ToolDefinition;

// ─── Invocation seam ─────────────────────────────────────────────────────────

/// The executable half of a tool.
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, arguments: Value) -> anyhow::Result<Value>;
}

/// A self-describing tool: definition plus invocation.
pub trait Tool: ToolInvoker {
    fn definition(&self) -> ToolDefinition;
}

/// Adapter turning an async closure into a [`ToolInvoker`].
pub struct FnInvoker<F>(F);

#[async_trait]
impl<F, Fut> ToolInvoker for FnInvoker<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn invoke(&self, arguments: Value) -> anyhow::Result<Value> {
        (self.0)(arguments).await
    }
}

/// Wrap an async closure as an invoker.
pub fn invoker_fn<F, Fut>(f: F) -> FnInvoker<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    FnInvoker(f)
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

struct RegisteredTool {
    definition: ToolDefinition,
    invoker: Arc<dyn ToolInvoker>,
}

/// Name-keyed tool registry.
///
/// Built once at startup, then shared read-only (`Arc<ToolRegistry>`) with
/// every orchestration run.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register(&mut self, definition: ToolDefinition, invoker: impl ToolInvoker + 'static) {
        let name = definition.name.clone();
        let replaced = self
            .tools
            .insert(
                name.clone(),
                RegisteredTool {
                    definition,
                    invoker: Arc::new(invoker),
                },
            )
            .is_some();

        if replaced {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        } else {
            tracing::debug!(tool = %name, "tool registered");
        }
    }

    /// Register a self-describing tool.
    pub fn register_tool<T: Tool + 'static>(&mut self, tool: T) {
        let definition = tool.definition();
        self.register(definition, tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Look up `name` and invoke it with `arguments`.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<Value, AgentError> {
        let tool = self.tools.get(name).ok_or_else(|| AgentError::ToolNotFound {
            name: name.to_string(),
        })?;

        let invoker = Arc::clone(&tool.invoker);
        invoker
            .invoke(arguments)
            .await
            .map_err(|e| AgentError::ToolExecutionError {
                name: name.to_string(),
                reason: format!("{e:#}"),
            })
    }

    /// Human-readable summary of the available tools for the system prompt.
    pub fn capability_summary(&self) -> String {
        if self.is_empty() {
            return "No tools are currently available. Answer from your own knowledge.".to_string();
        }

        let mut summary = String::from("Available tools:");
        for tool in self.tools.values() {
            summary.push_str(&format!(
                "\n- {}: {}",
                tool.definition.name, tool.definition.description
            ));
        }
        summary
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn def(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    struct Echo;

    #[async_trait]
    impl ToolInvoker for Echo {
        async fn invoke(&self, arguments: Value) -> anyhow::Result<Value> {
            Ok(arguments)
        }
    }

    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            def("echo", "Echo the arguments back")
        }
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(Echo);
        let result = registry.execute("echo", json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound { name } if name == "missing"));
    }

    #[tokio::test]
    async fn test_failing_tool_is_execution_error() {
        let mut registry = ToolRegistry::new();
        registry.register(
            def("broken", "Always fails"),
            invoker_fn(|_| async { Err(anyhow::anyhow!("disk on fire")) }),
        );
        let err = registry.execute("broken", json!({})).await.unwrap_err();
        match err {
            AgentError::ToolExecutionError { name, reason } => {
                assert_eq!(name, "broken");
                assert!(reason.contains("disk on fire"));
            }
            other => panic!("expected ToolExecutionError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(def("t", "first"), invoker_fn(|_| async { Ok(json!(1)) }));
        registry.register(def("t", "second"), invoker_fn(|_| async { Ok(json!(2)) }));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("t").unwrap().description, "second");
        assert_eq!(registry.execute("t", json!({})).await.unwrap(), json!(2));
    }

    #[test]
    fn test_definitions_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(def("zeta", "z"), invoker_fn(|_| async { Ok(Value::Null) }));
        registry.register(def("alpha", "a"), invoker_fn(|_| async { Ok(Value::Null) }));
        let names: Vec<String> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(registry.get("zeta").is_some());
    }

    #[test]
    fn test_capability_summary() {
        let mut registry = ToolRegistry::new();
        assert!(registry.capability_summary().starts_with("No tools"));

        registry.register_tool(Echo);
        assert_eq!(
            registry.capability_summary(),
            "Available tools:\n- echo: Echo the arguments back"
        );
    }
}
