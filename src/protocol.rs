//! Streaming event protocol shared by the gateway, the orchestrator, and
//! whatever transport forwards events to a client.
//!
//! Chunks are serialized with a `type` discriminant so a socket layer can
//! forward them verbatim, e.g. `{"type":"tool_result","tool":"calculator","content":"4"}`.

use serde::{Deserialize, Serialize};

// ─── Lifecycle ──────────────────────────────────────────────────────────────

/// Coarse lifecycle state of an orchestration run, surfaced as `status` chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Ready,
    Thinking,
    Executing,
    /// The gateway abandoned an attempt and is starting over on the fallback
    /// model. Text streamed since the last `thinking` status is void.
    Retrying,
    Error,
}

// ─── Tool calls ─────────────────────────────────────────────────────────────

/// Arguments of a finalized tool call.
///
/// The accumulated argument text either parsed as JSON or it did not; a
/// malformed payload is kept so it can be echoed back to the model.
///
/// Deserialization always yields `Parsed`: any JSON value is a valid
/// argument payload, including an object with `raw` and `reason` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolArguments {
    Parsed(serde_json::Value),
    Malformed { raw: String, reason: String },
}

impl ToolArguments {
    /// Parse accumulated argument text. Empty text means "no arguments".
    pub fn parse(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::Parsed(serde_json::Value::Object(serde_json::Map::new()));
        }
        match serde_json::from_str(raw) {
            Ok(value) => Self::Parsed(value),
            Err(e) => Self::Malformed {
                raw: raw.to_string(),
                reason: format!("invalid JSON arguments: {e}"),
            },
        }
    }

    /// Text form sent back to the model in the assistant message.
    pub fn to_wire_string(&self) -> String {
        match self {
            Self::Parsed(value) => value.to_string(),
            Self::Malformed { raw, .. } => raw.clone(),
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

/// A tool invocation requested by the model during one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "tool")]
    pub name: String,
    pub arguments: ToolArguments,
}

// ─── Chunks ─────────────────────────────────────────────────────────────────

/// One unit of the streaming event protocol.
///
/// `ToolCall` chunks travel from the gateway to the orchestrator only; every
/// other variant may be forwarded to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Content {
        content: String,
    },
    ToolCall(ToolCall),
    ToolStart {
        tool: String,
        content: String,
    },
    ToolResult {
        tool: String,
        content: String,
    },
    ToolError {
        tool: String,
        content: String,
    },
    Status {
        status: AgentStatus,
        content: String,
    },
    Warning {
        content: String,
    },
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
}

impl StreamChunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content {
            content: text.into(),
        }
    }

    pub fn status(status: AgentStatus, content: impl Into<String>) -> Self {
        Self::Status {
            status,
            content: content.into(),
        }
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self::Warning {
            content: content.into(),
        }
    }

    /// The wire discriminant, e.g. `"tool_result"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::ToolCall(_) => "tool_call",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolError { .. } => "tool_error",
            Self::Status { .. } => "status",
            Self::Warning { .. } => "warning",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Warning { .. })
    }

    /// Whether this chunk announces a fallback retry of the current turn.
    pub fn is_retry(&self) -> bool {
        matches!(
            self,
            Self::Status {
                status: AgentStatus::Retrying,
                ..
            }
        )
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
