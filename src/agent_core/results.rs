//! Tool result formatting for the chunk stream and the conversation.
//!
//! The conversation keeps the full text; clients see a bounded preview.

use serde_json::Value;

/// Marker appended to a truncated preview.
pub const ELLIPSIS: &str = "...";

/// Render a tool result as text. Strings pass through unquoted; everything
/// else is pretty-printed JSON.
pub fn format_tool_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Cut `text` to at most `max_chars` characters, appending [`ELLIPSIS`] when
/// anything was dropped. Counts `char`s, so multi-byte text is never split.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}{ELLIPSIS}", &text[..byte_index]),
        None => text.to_string(),
    }
}
