//! Task orchestrator: the bounded model ↔ tool loop.
//!
//! Per iteration:
//! 1. **Think**: stream one turn from the gateway, forwarding content as it
//!    arrives and collecting requested tool calls.
//! 2. **Finish** when the turn requested no tools.
//! 3. **Execute** each requested tool in order, surfacing a bounded preview
//!    to the caller and the full result to the model.
//!
//! The loop stops with a `warning` once the iteration ceiling is reached.
//! Tool failures never end a run; only a gateway failure does.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;

use super::errors::AgentError;
use super::registry::ToolRegistry;
use super::results::{format_tool_result, truncate_preview};
use crate::inference::config::OrchestratorConfig;
use crate::inference::{ChatMessage, GatewayRequest, ModelGateway, ToolDefinition};
use crate::protocol::{AgentStatus, StreamChunk, ToolArguments};

/// Chunk sequence produced by one orchestration run.
pub type AgentStream = BoxStream<'static, Result<StreamChunk, AgentError>>;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Input of one orchestration run.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub messages: Vec<ChatMessage>,
    /// Tool set announced on every turn of the run.
    pub tools: Vec<ToolDefinition>,
    pub task_hint: Option<String>,
    /// Model to use instead of the routed one.
    pub model_override: Option<String>,
}

impl TaskContext {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_task_hint(mut self, hint: Option<String>) -> Self {
        self.task_hint = hint;
        self
    }

    pub fn with_model_override(mut self, model: Option<String>) -> Self {
        self.model_override = model;
        self
    }
}

/// Mutable state of one run. Owned by the run's stream and dropped with it.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationRun {
    pub messages: Vec<ChatMessage>,
    pub iteration_count: usize,
    pub done: bool,
}

impl OrchestrationRun {
    fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }
}

// ─── Orchestrator ───────────────────────────────────────────────────────────

/// Drives the model ↔ tool loop.
///
/// Constructed explicitly and passed by value; clones share the gateway and
/// the registry, and every [`Orchestrator::execute`] call owns its own run.
#[derive(Clone)]
pub struct Orchestrator {
    gateway: Arc<dyn ModelGateway>,
    registry: Arc<ToolRegistry>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            gateway,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// A context announcing every registered tool.
    pub fn context(&self, messages: Vec<ChatMessage>) -> TaskContext {
        TaskContext::new(messages).with_tools(self.registry.definitions())
    }

    /// Run the loop for `context`.
    ///
    /// The stream is lazy: nothing happens until it is polled, and dropping it
    /// stops the run at the next suspension point. A tool that has already
    /// started keeps running to completion in the background.
    pub fn execute(&self, context: TaskContext) -> AgentStream {
        let gateway = Arc::clone(&self.gateway);
        let registry = Arc::clone(&self.registry);
        let max_iterations = self.config.max_iterations;
        let preview_chars = self.config.result_preview_chars;

        Box::pin(stream! {
            let TaskContext { messages, tools, task_hint, model_override } = context;
            let mut run = OrchestrationRun::new(messages);

            while !run.done {
                // ── Think ───────────────────────────────────────────────
                yield Ok(StreamChunk::status(
                    AgentStatus::Thinking,
                    format!("Thinking (turn {} of {max_iterations})", run.iteration_count + 1),
                ));

                let request = GatewayRequest {
                    messages: run.messages.clone(),
                    tools: tools.clone(),
                    task_hint: task_hint.clone(),
                };
                let mut turn = gateway.stream(request, model_override.clone());

                let mut response_text = String::new();
                let mut tool_calls = Vec::new();
                let mut model = None;
                let mut failure = None;

                while let Some(chunk) = turn.next().await {
                    match chunk {
                        Ok(StreamChunk::Content { content }) => {
                            response_text.push_str(&content);
                            yield Ok(StreamChunk::Content { content });
                        }
                        Ok(StreamChunk::ToolCall(call)) => tool_calls.push(call),
                        Ok(StreamChunk::Done { model: used }) => model = used,
                        Ok(chunk) if chunk.is_retry() => {
                            response_text.clear();
                            tool_calls.clear();
                            yield Ok(chunk);
                        }
                        Ok(other) => yield Ok(other),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }

                if let Some(e) = failure {
                    tracing::error!(
                        iteration = run.iteration_count,
                        error = %e,
                        "gateway failed, aborting run"
                    );
                    yield Ok(StreamChunk::status(AgentStatus::Error, e.to_string()));
                    yield Err(AgentError::Gateway(e));
                    return;
                }

                // ── Finish ──────────────────────────────────────────────
                if tool_calls.is_empty() {
                    tracing::info!(
                        iterations = run.iteration_count + 1,
                        model = model.as_deref().unwrap_or("unknown"),
                        "run complete"
                    );
                    run.messages.push(ChatMessage::assistant(response_text));
                    run.done = true;
                    yield Ok(StreamChunk::Done { model });
                    break;
                }

                // ── Execute ─────────────────────────────────────────────
                run.messages.push(ChatMessage::assistant_with_tool_calls(
                    response_text,
                    tool_calls.clone(),
                ));
                yield Ok(StreamChunk::status(
                    AgentStatus::Executing,
                    format!("Running {} tool call(s)", tool_calls.len()),
                ));

                for call in tool_calls {
                    yield Ok(StreamChunk::ToolStart {
                        tool: call.name.clone(),
                        content: format!("Running {}", call.name),
                    });

                    let outcome = match call.arguments {
                        ToolArguments::Parsed(arguments) => {
                            invoke_detached(Arc::clone(&registry), call.name.clone(), arguments).await
                        }
                        ToolArguments::Malformed { reason, .. } => {
                            Err(AgentError::MalformedToolArguments {
                                name: call.name.clone(),
                                reason,
                            })
                        }
                    };

                    match outcome {
                        Ok(value) => {
                            let text = format_tool_result(&value);
                            tracing::info!(tool = %call.name, result_chars = text.chars().count(), "tool succeeded");
                            yield Ok(StreamChunk::ToolResult {
                                tool: call.name.clone(),
                                content: truncate_preview(&text, preview_chars),
                            });
                            run.messages.push(ChatMessage::tool(call.id, text));
                        }
                        Err(e) => {
                            tracing::warn!(tool = %call.name, error = %e, "tool failed");
                            yield Ok(StreamChunk::ToolError {
                                tool: call.name.clone(),
                                content: e.to_string(),
                            });
                            run.messages.push(ChatMessage::tool(call.id, format!("Error: {e}")));
                        }
                    }
                }

                run.iteration_count += 1;
                if run.iteration_count >= max_iterations {
                    tracing::warn!(max_iterations, "iteration limit reached");
                    run.done = true;
                    yield Ok(StreamChunk::warning(format!(
                        "Stopped after {max_iterations} iterations without a final answer"
                    )));
                }
            }
        })
    }
}

/// Run a tool on its own task so it finishes even if the run is dropped.
async fn invoke_detached(
    registry: Arc<ToolRegistry>,
    name: String,
    arguments: Value,
) -> Result<Value, AgentError> {
    let task_name = name.clone();
    tokio::spawn(async move { registry.execute(&task_name, arguments).await })
        .await
        .unwrap_or_else(|e| {
            Err(AgentError::ToolExecutionError {
                name,
                reason: format!("tool task failed: {e}"),
            })
        })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
