//! Shared types for the inference client.
//!
//! Domain types (`ChatMessage`, `ToolDefinition`, `MediaRef`) describe the
//! conversation; the `Wire*` and `ChatCompletion*` types mirror the OpenAI
//! Chat Completions API and are only used for request building and response
//! parsing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::protocol::ToolCall;

// ─── Conversation ────────────────────────────────────────────────────────────

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Media attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaRef {
    /// Remotely hosted media.
    Url { url: String },
    /// Inline media, base64-encoded.
    Inline { mime_type: String, data: String },
}

impl MediaRef {
    /// Encode raw bytes as inline media.
    pub fn inline(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        MediaRef::Inline {
            mime_type: mime_type.into(),
            data: BASE64.encode(bytes),
        }
    }

    /// The URL the endpoint should fetch: either the remote URL or a data URL.
    pub fn to_url(&self) -> String {
        match self {
            MediaRef::Url { url } => url.clone(),
            MediaRef::Inline { mime_type, data } => format!("data:{mime_type};base64,{data}"),
        }
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// For `tool` messages: the call this result answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For `assistant` messages: the tool calls requested in this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<MediaRef>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// An assistant turn that requested tools.
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// The result of one tool call.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<MediaRef>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// A tool as announced to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped parameter description.
    pub parameters: serde_json::Value,
}

// ─── Request Types ───────────────────────────────────────────────────────────

/// A message in OpenAI wire format.
///
/// `content` is always present: many OpenAI-compatible runtimes reject `null`
/// content on assistant messages that carry tool calls, so those get `""`.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

/// Plain text, or a multi-part array when the message has attachments.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        let content = if msg.attachments.is_empty() {
            WireContent::Text(msg.content.clone())
        } else {
            let mut parts = Vec::with_capacity(msg.attachments.len() + 1);
            parts.push(ContentPart::Text {
                text: msg.content.clone(),
            });
            parts.extend(msg.attachments.iter().map(|media| ContentPart::ImageUrl {
                image_url: ImageUrl { url: media.to_url() },
            }));
            WireContent::Parts(parts)
        };

        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(msg.tool_calls.iter().map(ToolCallResponse::from).collect())
        };

        Self {
            role: msg.role,
            content,
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls,
        }
    }
}

/// Tool definition sent in the request.
#[derive(Debug, Clone, Serialize)]
pub struct WireTool {
    pub r#type: String,
    pub function: FunctionDefinition,
}

/// Function definition within a tool.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl From<&ToolDefinition> for WireTool {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Translate domain messages and tools into a request body.
    pub fn build(
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        temperature: f32,
        max_tokens: u32,
        stream: bool,
    ) -> Self {
        let tools: Option<Vec<WireTool>> = if tools.is_empty() {
            None
        } else {
            Some(tools.iter().map(WireTool::from).collect())
        };

        Self {
            model: model.to_string(),
            messages: messages.iter().map(WireMessage::from).collect(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature,
            max_tokens,
            stream,
        }
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Tool call as carried in the OpenAI message format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCallResponse,
}

/// Function call details in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

impl From<&ToolCall> for ToolCallResponse {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            r#type: "function".to_string(),
            function: FunctionCallResponse {
                name: call.name.clone(),
                arguments: call.arguments.to_wire_string(),
            },
        }
    }
}

/// Raw SSE chunk from the OpenAI API.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A single choice within a streaming chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    pub finish_reason: Option<String>,
}

/// The delta (incremental update) within a chunk choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

/// A tool call fragment within a streaming delta.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkToolCall {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub function: Option<ChunkFunction>,
}

/// A function call fragment within a streaming tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkFunction {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Response body of `POST /audio/transcriptions`.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

// ─── Tests ───────────────────────────────────────────────────────────────────
