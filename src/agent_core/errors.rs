//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors that can occur during agent core operations.
///
/// Tool-level variants are converted into `tool_error` chunks by the
/// orchestrator and never end a run. Only [`AgentError::Gateway`] escapes.
#[derive(Debug, Error)]
pub enum AgentError {
    /// No tool is registered under the requested name.
    #[error("tool not found: '{name}'")]
    ToolNotFound { name: String },

    /// A registered tool's invocation failed.
    #[error("tool '{name}' failed: {reason}")]
    ToolExecutionError { name: String, reason: String },

    /// Accumulated argument text for a call is not valid JSON.
    #[error("malformed arguments for tool '{name}': {reason}")]
    MalformedToolArguments { name: String, reason: String },

    /// The model gateway failed after its fallback was exhausted.
    #[error("gateway error: {0}")]
    Gateway(#[from] InferenceError),

    /// Conversation memory could not recall or store an exchange.
    #[error("memory error: {reason}")]
    Memory { reason: String },
}

impl AgentError {
    /// Whether this failure is local to one tool call.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            AgentError::ToolNotFound { .. }
                | AgentError::ToolExecutionError { .. }
                | AgentError::MalformedToolArguments { .. }
        )
    }
}
