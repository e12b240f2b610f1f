//! OpenAI-compatible inference client.
//!
//! Sends chat completion requests to the configured endpoint and streams back
//! tokens and tool calls. Handles the single fallback retry when the routed
//! model fails, plus the auxiliary transcription and image-analysis calls.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, RequestBuilder, Response};

use super::config::AssistantConfig;
use super::errors::InferenceError;
use super::gateway::{ChunkStream, GatewayRequest, ModelGateway};
use super::streaming::{parse_non_streaming_response, parse_sse_stream};
use super::types::{ChatCompletionRequest, ChatMessage, MediaRef, TranscriptionResponse};
use crate::protocol::{AgentStatus, StreamChunk};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Total request timeout for non-streaming calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Total request timeout for streaming calls.
///
/// Long contexts can take a while before the first token arrives.
const STREAM_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// Routed model plus at most one fallback.
const MAX_MODEL_ATTEMPTS: usize = 2;

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for the model endpoint.
///
/// Cheap to clone: the configuration is shared and `reqwest` clients are
/// reference-counted internally.
#[derive(Clone)]
pub struct InferenceClient {
    /// HTTP client for non-streaming requests.
    http: HttpClient,
    /// HTTP client for streaming requests.
    http_stream: HttpClient,
    config: Arc<AssistantConfig>,
}

impl InferenceClient {
    /// Create a new inference client.
    ///
    /// Validates the configuration. Does NOT check connectivity; that happens
    /// on the first request.
    pub fn from_config(config: AssistantConfig) -> Result<Self, InferenceError> {
        config.validate()?;
        let endpoint = config.endpoint.base_url.clone();

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let http_stream = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(STREAM_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint,
                reason: format!("failed to build streaming HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            http_stream,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// The endpoint base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.config.endpoint.base_url.trim_end_matches('/')
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url())
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.config.api_key() {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    // ─── Chat Completion (streaming) ─────────────────────────────────────

    /// Open a single streaming request against `model`.
    async fn open_stream(
        &self,
        model: &str,
        request: &GatewayRequest,
    ) -> Result<impl Stream<Item = Result<StreamChunk, InferenceError>>, InferenceError> {
        let url = self.url("chat/completions");
        let body = ChatCompletionRequest::build(
            model,
            &request.messages,
            &request.tools,
            self.config.sampling.temperature,
            self.config.sampling.max_tokens,
            true,
        );

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            "=== LLM REQUEST ==="
        );

        let response = self
            .authorize(self.http_stream.post(&url))
            .json(&body)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                InferenceError::from_reqwest(&url, e, STREAM_REQUEST_TIMEOUT.as_secs())
            })?;

        let response = ensure_success(response).await?;
        Ok(parse_sse_stream(response.bytes_stream()))
    }

    // ─── Auxiliary calls ─────────────────────────────────────────────────

    /// Transcribe an audio clip.
    ///
    /// `language` defaults to the configured transcription language.
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        file_name: &str,
        language: Option<&str>,
    ) -> Result<String, InferenceError> {
        let url = self.url("audio/transcriptions");
        let language = language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or(&self.config.transcription.language)
            .to_string();

        let form = Form::new()
            .text("model", self.config.transcription.model.clone())
            .text("language", language.clone())
            .part("file", Part::bytes(audio).file_name(file_name.to_string()));

        tracing::info!(url = %url, model = %self.config.transcription.model, language = %language, "transcription request");

        let response = self
            .authorize(self.http.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(&url, e, REQUEST_TIMEOUT.as_secs()))?;

        let response = ensure_success(response).await?;
        let parsed: TranscriptionResponse =
            response.json().await.map_err(|e| InferenceError::StreamError {
                reason: format!("failed to parse transcription response: {e}"),
            })?;

        Ok(parsed.text)
    }

    /// Describe an image with the vision model in one non-streaming call.
    pub async fn analyze_image(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, InferenceError> {
        let url = self.url("chat/completions");
        let messages = [ChatMessage::user(prompt)
            .with_attachments(vec![MediaRef::inline(mime_type, image)])];
        let body = ChatCompletionRequest::build(
            self.config.vision_model(),
            &messages,
            &[],
            self.config.sampling.temperature,
            self.config.vision.max_tokens,
            false,
        );

        tracing::info!(url = %url, model = %body.model, bytes = image.len(), "image analysis request");

        let response = self
            .authorize(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| InferenceError::from_reqwest(&url, e, REQUEST_TIMEOUT.as_secs()))?;

        let response = ensure_success(response).await?;
        let body_text = response.text().await.map_err(|e| InferenceError::StreamError {
            reason: format!("failed to read response body: {e}"),
        })?;

        let parsed = parse_non_streaming_response(&body_text)?;
        if parsed.finish_reason.as_deref() == Some("length") {
            tracing::warn!(
                max_tokens = self.config.vision.max_tokens,
                "image description cut off at the token limit"
            );
        }
        Ok(parsed.content.unwrap_or_default())
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Check if the endpoint is reachable.
    ///
    /// Lists models, which does not consume inference tokens.
    pub async fn health_check(&self) -> Result<bool, InferenceError> {
        let url = self.url("models");

        match self
            .authorize(self.http.get(&url))
            .timeout(CONNECT_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

/// Turn a non-2xx response into `HttpError`, keeping the body for diagnostics.
async fn ensure_success(response: Response) -> Result<Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InferenceError::HttpError {
        status: status.as_u16(),
        body,
    })
}

// ─── ModelGateway ────────────────────────────────────────────────────────────

impl ModelGateway for InferenceClient {
    fn stream(&self, request: GatewayRequest, override_model: Option<String>) -> ChunkStream {
        let client = self.clone();

        Box::pin(async_stream::stream! {
            let routing = &client.config.models;
            let mut model = routing.resolve(request.task_hint.as_deref(), override_model.as_deref());
            let mut attempted: Vec<String> = Vec::with_capacity(MAX_MODEL_ATTEMPTS);

            while attempted.len() < MAX_MODEL_ATTEMPTS {
                attempted.push(model.clone());

                let error = match client.open_stream(&model, &request).await {
                    Ok(chunks) => {
                        futures::pin_mut!(chunks);
                        let mut failure = None;
                        while let Some(chunk) = chunks.next().await {
                            match chunk {
                                Ok(chunk) => yield Ok(chunk),
                                Err(e) => {
                                    failure = Some(e);
                                    break;
                                }
                            }
                        }
                        match failure {
                            Some(e) => e,
                            None => {
                                tracing::debug!(model = %model, "stream complete");
                                yield Ok(StreamChunk::Done { model: Some(model) });
                                return;
                            }
                        }
                    }
                    Err(e) => e,
                };

                let can_fall_back = error.is_transport()
                    && !routing.is_fallback(&model)
                    && attempted.len() < MAX_MODEL_ATTEMPTS;

                if !can_fall_back {
                    if attempted.len() == 1 {
                        tracing::error!(
                            model = %model,
                            status = ?error.status(),
                            error = %error,
                            "model call failed"
                        );
                        yield Err(error);
                    } else {
                        tracing::error!(attempted = ?attempted, error = %error, "fallback model failed");
                        yield Err(InferenceError::AllModelsUnavailable {
                            attempted,
                            last_error: error.to_string(),
                        });
                    }
                    return;
                }

                tracing::warn!(
                    model = %model,
                    fallback = %routing.fallback_model,
                    status = ?error.status(),
                    error = %error,
                    "model call failed, retrying with fallback model"
                );
                model = routing.fallback_model.clone();
                yield Ok(StreamChunk::status(
                    AgentStatus::Retrying,
                    format!("Retrying with {model}"),
                ));
            }
        })
    }
}
