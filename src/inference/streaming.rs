//! SSE streaming response parser for OpenAI-compatible chat completions.
//!
//! Reads the HTTP body as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`), parses each event as JSON, emits text deltas immediately
//! and accumulates tool-call fragments per index until the model signals a
//! tool-call turn.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::pin::Pin;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::types::{ChatCompletionChunk, ChunkToolCall};
use crate::protocol::{StreamChunk, ToolArguments, ToolCall};

/// `finish_reason` value signalling that the model is requesting tools.
const FINISH_TOOL_CALLS: &str = "tool_calls";

// ─── Tool call accumulation ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Per-index accumulators for one streaming turn.
///
/// Name and argument fragments for the same index are concatenated in arrival
/// order. Argument text is only parsed in [`ToolCallAccumulator::finalize`].
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: BTreeMap<u32, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one wire delta into the accumulator for its index.
    pub fn push(&mut self, delta: &ChunkToolCall) {
        let entry = self.pending.entry(delta.index.unwrap_or(0)).or_default();
        if let Some(id) = delta.id.as_ref().filter(|id| !id.is_empty()) {
            entry.id = Some(id.clone());
        }
        if let Some(function) = &delta.function {
            if let Some(name) = &function.name {
                entry.name.push_str(name);
            }
            if let Some(arguments) = &function.arguments {
                entry.arguments.push_str(arguments);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain the accumulators into finalized calls, in index order.
    ///
    /// Accumulators without a name are dropped. Argument text that does not
    /// parse is kept as [`ToolArguments::Malformed`] so the failure stays
    /// attached to its own call.
    pub fn finalize(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.pending)
            .into_values()
            .filter(|pending| !pending.name.is_empty())
            .map(|pending| {
                let arguments = ToolArguments::parse(&pending.arguments);
                if let ToolArguments::Malformed { reason, .. } = &arguments {
                    tracing::warn!(tool = %pending.name, reason = %reason, "malformed tool call arguments");
                }
                ToolCall {
                    id: pending
                        .id
                        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
                    name: pending.name,
                    arguments,
                }
            })
            .collect()
    }
}

// ─── SSE decoder ─────────────────────────────────────────────────────────────

struct SseDecoder<S> {
    bytes: Pin<Box<S>>,
    buffer: Vec<u8>,
    tool_calls: ToolCallAccumulator,
    pending: VecDeque<Result<StreamChunk, InferenceError>>,
    exhausted: bool,
}

impl<S> SseDecoder<S> {
    /// Split the next complete event off the buffer, if any.
    fn next_event(&mut self) -> Option<String> {
        let end = self.buffer.windows(2).position(|w| w == b"\n\n")?;
        let event: Vec<u8> = self.buffer.drain(..end + 2).collect();
        Some(String::from_utf8_lossy(&event[..end]).into_owned())
    }

    /// Process a single SSE event (may contain multiple `data:` lines).
    fn process_event(&mut self, event: &str) {
        let mut data_lines: Vec<&str> = Vec::new();

        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if data.trim() == "[DONE]" {
                    continue;
                }
                data_lines.push(data);
            }
            // Comments, `event:` and `id:` lines carry nothing for us.
        }

        if data_lines.is_empty() {
            return; // Keep-alive or comment
        }

        let data = data_lines.join("\n");
        match serde_json::from_str::<ChatCompletionChunk>(&data) {
            Ok(chunk) => self.process_chunk(chunk),
            Err(e) => {
                self.exhausted = true;
                self.pending.push_back(Err(InferenceError::StreamError {
                    reason: format!("failed to parse SSE chunk: {e} (data: {data})"),
                }));
            }
        }
    }

    fn process_chunk(&mut self, chunk: ChatCompletionChunk) {
        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            self.pending.push_back(Ok(StreamChunk::Content { content }));
        }

        if let Some(deltas) = &choice.delta.tool_calls {
            for delta in deltas {
                self.tool_calls.push(delta);
            }
        }

        if choice.finish_reason.as_deref() == Some(FINISH_TOOL_CALLS) {
            for call in self.tool_calls.finalize() {
                self.pending.push_back(Ok(StreamChunk::ToolCall(call)));
            }
        }
    }
}

/// Parse an SSE byte stream into [`StreamChunk`]s.
///
/// Emits `Content` chunks as soon as their event is complete and one
/// `ToolCall` chunk per named accumulator when `finish_reason` is
/// `"tool_calls"`. Tool fragments still pending when the body ends without
/// that signal are discarded. A read error or an unparseable event yields one
/// `StreamError` and ends the stream.
pub fn parse_sse_stream<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<StreamChunk, InferenceError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let decoder = SseDecoder {
        bytes: Box::pin(byte_stream),
        buffer: Vec::new(),
        tool_calls: ToolCallAccumulator::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(decoder, |mut decoder| async move {
        loop {
            if let Some(item) = decoder.pending.pop_front() {
                return Some((item, decoder));
            }
            if decoder.exhausted {
                return None;
            }

            // Check if we have a complete SSE event in the buffer
            if let Some(event) = decoder.next_event() {
                decoder.process_event(&event);
                continue;
            }

            // Need more data from the stream
            match decoder.bytes.next().await {
                Some(Ok(bytes)) => {
                    decoder
                        .buffer
                        .extend(bytes.as_ref().iter().copied().filter(|b| *b != b'\r'));
                }
                Some(Err(e)) => {
                    decoder.exhausted = true;
                    return Some((
                        Err(InferenceError::StreamError {
                            reason: format!("stream read error: {e}"),
                        }),
                        decoder,
                    ));
                }
                None => {
                    // Stream ended: flush a trailing event without a blank line.
                    decoder.exhausted = true;
                    let rest = String::from_utf8_lossy(&std::mem::take(&mut decoder.buffer))
                        .trim()
                        .to_string();
                    if !rest.is_empty() {
                        decoder.process_event(&rest);
                    }
                }
            }
        }
    })
}

// ─── Non-streaming responses ─────────────────────────────────────────────────

/// Text answer of a non-streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub struct NonStreamingResponse {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

/// Parse a non-streaming response body.
///
/// Used by single-shot auxiliary calls such as image analysis.
pub fn parse_non_streaming_response(body: &str) -> Result<NonStreamingResponse, InferenceError> {
    #[derive(Deserialize)]
    struct NonStreamResponse {
        choices: Vec<NonStreamChoice>,
    }

    #[derive(Deserialize)]
    struct NonStreamChoice {
        message: NonStreamMessage,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct NonStreamMessage {
        content: Option<String>,
    }

    let resp: NonStreamResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse non-streaming response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::StreamError {
            reason: "empty choices array".into(),
        })?;

    Ok(NonStreamingResponse {
        content: choice.message.content.filter(|c| !c.is_empty()),
        finish_reason: choice.finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::ChunkFunction;
    use serde_json::json;

    fn delta(index: u32, id: Option<&str>, name: Option<&str>, args: Option<&str>) -> ChunkToolCall {
        ChunkToolCall {
            index: Some(index),
            id: id.map(String::from),
            function: Some(ChunkFunction {
                name: name.map(String::from),
                arguments: args.map(String::from),
            }),
        }
    }

    fn sse(events: &[serde_json::Value]) -> String {
        let mut body: String = events.iter().map(|e| format!("data: {e}\n\n")).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    async fn collect(parts: Vec<String>) -> Vec<Result<StreamChunk, InferenceError>> {
        let byte_stream =
            stream::iter(parts.into_iter().map(|p| Ok::<_, std::io::Error>(p.into_bytes())));
        parse_sse_stream(byte_stream).collect().await
    }

    fn tool_call_events() -> Vec<serde_json::Value> {
        vec![
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"calculator","arguments":""}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"expression\":"}}]}}]}),
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"2+2\"}"}}]}}]}),
            json!({"choices":[{"delta":{},"finish_reason":"tool_calls"}]}),
        ]
    }

    #[test]
    fn test_fragments_concatenate_like_a_single_fragment() {
        let mut split = ToolCallAccumulator::new();
        split.push(&delta(0, Some("call_1"), Some("f"), Some("{\"a\":")));
        split.push(&delta(0, None, None, Some("1}")));

        let mut whole = ToolCallAccumulator::new();
        whole.push(&delta(0, Some("call_1"), Some("f"), Some("{\"a\":1}")));

        let split = split.finalize();
        let whole = whole.finalize();
        assert_eq!(split, whole);
        assert_eq!(split[0].arguments, ToolArguments::Parsed(json!({"a": 1})));
    }

    #[test]
    fn test_interleaved_indices_stay_separate_and_ordered() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(1, Some("call_b"), Some("second"), Some("{\"x\":")));
        acc.push(&delta(0, Some("call_a"), Some("first"), Some("{}")));
        acc.push(&delta(1, None, None, Some("2}")));

        let calls = acc.finalize();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "first");
        assert_eq!(calls[1].name, "second");
        assert_eq!(calls[1].arguments, ToolArguments::Parsed(json!({"x": 2})));
        assert!(acc.is_empty());
    }

    #[test]
    fn test_name_fragments_are_appended() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(0, Some("call_1"), Some("get_current"), None));
        acc.push(&delta(0, None, Some("_time"), None));
        let calls = acc.finalize();
        assert_eq!(calls[0].name, "get_current_time");
        assert_eq!(calls[0].arguments, ToolArguments::Parsed(json!({})));
    }

    #[test]
    fn test_unnamed_accumulator_is_dropped() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(0, Some("call_1"), None, Some("{}")));
        assert!(acc.finalize().is_empty());
    }

    #[test]
    fn test_missing_id_is_generated() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(0, None, Some("f"), Some("{}")));
        let calls = acc.finalize();
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_malformed_arguments_are_kept_per_call() {
        let mut acc = ToolCallAccumulator::new();
        acc.push(&delta(0, Some("bad"), Some("f"), Some("{\"a\":")));
        acc.push(&delta(1, Some("good"), Some("g"), Some("{\"b\":true}")));
        let calls = acc.finalize();
        assert!(calls[0].arguments.is_malformed());
        assert_eq!(calls[1].arguments, ToolArguments::Parsed(json!({"b": true})));
    }

    #[tokio::test]
    async fn test_content_deltas_are_emitted_in_order() {
        let body = sse(&[
            json!({"choices":[{"delta":{"role":"assistant","content":""}}]}),
            json!({"choices":[{"delta":{"content":"Hel"}}]}),
            json!({"choices":[{"delta":{"content":"lo"}}]}),
            json!({"choices":[{"delta":{},"finish_reason":"stop"}]}),
        ]);
        let chunks: Vec<StreamChunk> = collect(vec![body])
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            chunks,
            vec![StreamChunk::content("Hel"), StreamChunk::content("lo")]
        );
    }

    #[tokio::test]
    async fn test_tool_calls_emitted_on_tool_calls_finish() {
        let chunks = collect(vec![sse(&tool_call_events())]).await;
        assert_eq!(chunks.len(), 1);
        match chunks[0].as_ref().unwrap() {
            StreamChunk::ToolCall(call) => {
                assert_eq!(call.id, "call_a");
                assert_eq!(call.name, "calculator");
                assert_eq!(call.arguments, ToolArguments::Parsed(json!({"expression": "2+2"})));
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_events_split_across_byte_chunks() {
        let body = sse(&tool_call_events());
        let parts: Vec<String> = body
            .as_bytes()
            .chunks(7)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect();
        let chunks = collect(parts).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Ok(StreamChunk::ToolCall(_))));
    }

    #[tokio::test]
    async fn test_multibyte_content_split_across_chunks() {
        let body = sse(&[json!({"choices":[{"delta":{"content":"héllo wörld"}}]})]);
        let bytes = body.into_bytes();
        let (a, b) = bytes.split_at(bytes.iter().position(|&x| x == 0xc3).unwrap() + 1);
        let byte_stream = stream::iter(vec![
            Ok::<_, std::io::Error>(a.to_vec()),
            Ok(b.to_vec()),
        ]);
        let chunks: Vec<_> = parse_sse_stream(byte_stream).collect().await;
        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::content("héllo wörld"));
    }

    #[tokio::test]
    async fn test_pending_fragments_dropped_without_tool_calls_signal() {
        let body = sse(&[
            json!({"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c","function":{"name":"f","arguments":"{}"}}]}}]}),
            json!({"choices":[{"delta":{},"finish_reason":"stop"}]}),
        ]);
        assert!(collect(vec![body]).await.is_empty());
    }

    #[tokio::test]
    async fn test_crlf_and_comments_are_tolerated() {
        let body = ": keep-alive\r\n\r\ndata: {\"choices\":[{\"delta\":{\"content\":\"4\"}}]}\r\n\r\ndata: [DONE]\r\n\r\n";
        let chunks = collect(vec![body.to_string()]).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::content("4"));
    }

    #[tokio::test]
    async fn test_trailing_event_without_blank_line() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}";
        let chunks = collect(vec![body.to_string()]).await;
        assert_eq!(chunks[0].as_ref().unwrap(), &StreamChunk::content("tail"));
    }

    #[tokio::test]
    async fn test_invalid_json_event_is_a_stream_error() {
        let chunks = collect(vec!["data: {not json}\n\ndata: {\"choices\":[]}\n\n".to_string()]).await;
        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], Err(InferenceError::StreamError { .. })));
    }

    #[tokio::test]
    async fn test_read_error_ends_stream() {
        let byte_stream = stream::iter(vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec()),
            Err(std::io::Error::other("connection reset")),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n".to_vec()),
        ]);
        let chunks: Vec<_> = parse_sse_stream(byte_stream).collect().await;
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(matches!(&chunks[1], Err(InferenceError::StreamError { reason }) if reason.contains("connection reset")));
    }

    #[test]
    fn test_parse_non_streaming_with_content() {
        let body = r#"{
            "choices": [{
                "message": {"role": "assistant", "content": "A cat on a sofa."},
                "finish_reason": "stop"
            }]
        }"#;
        let resp = parse_non_streaming_response(body).unwrap();
        assert_eq!(resp.content.as_deref(), Some("A cat on a sofa."));
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_non_streaming_empty_choices() {
        assert!(parse_non_streaming_response(r#"{"choices": []}"#).is_err());
    }

    #[test]
    fn test_parse_non_streaming_empty_content_is_none() {
        let body = r#"{"choices":[{"message":{"content":""},"finish_reason":"length"}]}"#;
        let resp = parse_non_streaming_response(body).unwrap();
        assert!(resp.content.is_none());
    }
}
