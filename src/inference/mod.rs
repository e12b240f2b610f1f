//! Model gateway: everything that talks to the OpenAI-compatible endpoint.
//!
//! - Streaming chat completions over SSE
//! - Per-index tool-call fragment reassembly
//! - Model routing by task hint, with one fallback retry
//! - Auxiliary transcription and image-analysis calls
//! - Configuration loading from `config/lumen.yaml`
//!
//! The client speaks the OpenAI Chat Completions API, so switching providers
//! is a config change, not a code change.

pub mod client;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::InferenceClient;
pub use config::AssistantConfig;
pub use errors::InferenceError;
pub use gateway::{ChunkStream, Completion, GatewayRequest, ModelGateway};
pub use types::{ChatMessage, MediaRef, Role, ToolDefinition};
