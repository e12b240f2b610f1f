//! Agent Core: the orchestration layer.
//!
//! Submodules:
//! - `registry`: Capability registry (tool definitions + invokers)
//! - `orchestrator`: Bounded model ↔ tool loop
//! - `results`: Tool result rendering and preview truncation
//! - `conversation`: Conversation memory and per-input request building
//! - `errors`: Agent-level error types

pub mod conversation;
pub mod errors;
pub mod orchestrator;
pub mod registry;
pub mod results;

// Re-exports for convenience
pub use conversation::{ConversationManager, ConversationMemory, Exchange, KeywordMemory, UserInput};
pub use errors::AgentError;
pub use orchestrator::{AgentStream, OrchestrationRun, Orchestrator, TaskContext};
pub use registry::{invoker_fn, Tool, ToolInvoker, ToolRegistry};
