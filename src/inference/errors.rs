//! Inference error types.
//!
//! All errors implement `std::error::Error` via `thiserror`. Structured logging
//! is the caller's responsibility; these types carry the context needed to build
//! meaningful log entries.

use thiserror::Error;

/// Errors that can occur while talking to the model endpoint.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// Both the routed model and the fallback model failed.
    #[error("all models unavailable (tried: {}): {last_error}", attempted.join(", "))]
    AllModelsUnavailable {
        attempted: Vec<String>,
        last_error: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Whether this error belongs to the transport family: anything that went
    /// wrong on the way to or from the model endpoint.
    pub fn is_transport(&self) -> bool {
        !matches!(self, InferenceError::ConfigError { .. })
    }

    /// HTTP status code, if this is an `HttpError`.
    pub fn status(&self) -> Option<u16> {
        match self {
            InferenceError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_reqwest(endpoint: &str, err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            InferenceError::Timeout {
                duration_secs: timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_is_not_transport() {
        let err = InferenceError::ConfigError {
            reason: "missing default model".into(),
        };
        assert!(!err.is_transport());
    }

    #[test]
    fn test_http_error_is_transport() {
        let err = InferenceError::HttpError {
            status: 429,
            body: "rate limited".into(),
        };
        assert!(err.is_transport());
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn test_all_models_unavailable_message() {
        let err = InferenceError::AllModelsUnavailable {
            attempted: vec!["gpt-4o".into(), "gpt-4o-mini".into()],
            last_error: "HTTP 503: overloaded".into(),
        };
        assert_eq!(
            err.to_string(),
            "all models unavailable (tried: gpt-4o, gpt-4o-mini): HTTP 503: overloaded"
        );
        assert!(err.status().is_none());
    }
}
