//! Built-in tools.
//!
//! Nothing registers itself: callers opt in with [`register_builtin_tools`].

pub mod calculator;
pub mod clock;
pub mod filesystem;

use crate::agent_core::ToolRegistry;

pub use calculator::Calculator;
pub use clock::CurrentTime;
pub use filesystem::{ListDirectory, ReadFile};

/// Register every built-in tool.
pub fn register_builtin_tools(registry: &mut ToolRegistry) {
    registry.register_tool(CurrentTime);
    registry.register_tool(Calculator);
    registry.register_tool(ListDirectory);
    registry.register_tool(ReadFile);
    tracing::info!(tools = ?registry.names(), "built-in tools registered");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_builtins_are_registered_and_callable() {
        let mut registry = ToolRegistry::new();
        register_builtin_tools(&mut registry);

        assert_eq!(
            registry.names(),
            vec!["calculator", "get_current_time", "list_directory", "read_file"]
        );
        let result = registry
            .execute("calculator", json!({"expression": "6*7"}))
            .await
            .unwrap();
        assert_eq!(result, json!(42));
        assert!(registry.capability_summary().contains("- calculator: Evaluate"));
    }
}
