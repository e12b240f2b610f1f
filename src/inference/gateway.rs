//! The model gateway seam.
//!
//! The orchestrator talks to the model only through [`ModelGateway`], so tests
//! can script turns without an HTTP endpoint. [`super::InferenceClient`] is the
//! production implementation.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};

use super::errors::InferenceError;
use super::types::{ChatMessage, ToolDefinition};
use crate::protocol::{StreamChunk, ToolCall};

/// Lazy, non-restartable chunk sequence for one `stream` call.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, InferenceError>>;

/// Input of one gateway call.
#[derive(Debug, Clone, Default)]
pub struct GatewayRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    /// Routing hint, e.g. `"coding"` or `"vision"`.
    pub task_hint: Option<String>,
}

impl GatewayRequest {
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

    pub fn with_task_hint(mut self, hint: impl Into<String>) -> Self {
        self.task_hint = Some(hint.into());
        self
    }
}

/// Drained result of a whole `stream` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Model that produced the answer, from the `done` chunk.
    pub model: Option<String>,
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Stream one turn.
    ///
    /// Yields `content` and `tool_call` chunks in generation order and ends
    /// with exactly one `done` chunk naming the model used, or with an error.
    /// A `retrying` status means the turn restarts on the fallback model and
    /// everything yielded before it is void.
    fn stream(&self, request: GatewayRequest, override_model: Option<String>) -> ChunkStream;

    /// Drain [`ModelGateway::stream`] into a single [`Completion`].
    async fn complete(&self, request: GatewayRequest) -> Result<Completion, InferenceError> {
        let mut stream = self.stream(request, None);
        let mut completion = Completion::default();

        while let Some(chunk) = stream.next().await {
            match chunk? {
                chunk if chunk.is_retry() => completion = Completion::default(),
                StreamChunk::Content { content } => completion.content.push_str(&content),
                StreamChunk::ToolCall(call) => completion.tool_calls.push(call),
                StreamChunk::Done { model } => completion.model = model,
                _ => {}
            }
        }

        Ok(completion)
    }
}
