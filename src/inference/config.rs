//! Assistant configuration loading and validation.
//!
//! Reads `config/lumen.yaml` and resolves environment variables. Config is the
//! single source of truth for the model endpoint, the routing table, the
//! fallback model, and the orchestration ceiling. It is read once at startup
//! and never mutated afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::errors::InferenceError;

/// Built-in configuration used when no file is found.
const DEFAULT_CONFIG_YAML: &str = include_str!("../../config/lumen.yaml");

/// Relative location searched for while walking up from the working directory.
const CONFIG_RELATIVE_PATH: &str = "config/lumen.yaml";

// ─── Public Types ────────────────────────────────────────────────────────────

/// OpenAI-compatible endpoint settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Bearer token. Absent or empty means no `Authorization` header.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Static model routing: task hint → model id, plus the default and the
/// designated fast/fallback model.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRouting {
    pub default_model: String,
    pub fallback_model: String,
    #[serde(default)]
    pub routes: HashMap<String, String>,
}

impl ModelRouting {
    /// Pick the model for a request.
    ///
    /// An explicit override wins; otherwise the task hint is looked up in the
    /// routing table, and unknown or missing hints use the default model.
    pub fn resolve(&self, task_hint: Option<&str>, override_model: Option<&str>) -> String {
        if let Some(model) = override_model.filter(|m| !m.trim().is_empty()) {
            return model.to_string();
        }
        task_hint
            .and_then(|hint| self.routes.get(hint))
            .cloned()
            .unwrap_or_else(|| self.default_model.clone())
    }

    pub fn is_fallback(&self, model: &str) -> bool {
        model == self.fallback_model
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_model")]
    pub model: String,
    /// Language used when the caller does not pass one.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: default_transcription_model(),
            language: default_language(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// Model for image analysis. Falls back to the default model when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_vision_max_tokens")]
    pub max_tokens: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: default_vision_max_tokens(),
        }
    }
}

/// Orchestration loop limits.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of model turns per run (default: 10).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Length of the user-facing tool result preview (default: 200).
    #[serde(default = "default_result_preview_chars")]
    pub result_preview_chars: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            result_preview_chars: default_result_preview_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_limit: default_recall_limit(),
            capacity: default_memory_capacity(),
        }
    }
}

/// Top-level configuration (mirrors `config/lumen.yaml`).
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    pub endpoint: EndpointConfig,
    pub models: ModelRouting,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub vision: VisionConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl AssistantConfig {
    /// Reject configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.endpoint.base_url.trim().is_empty() {
            return Err(config_error("endpoint.base_url must not be empty"));
        }
        if self.models.default_model.trim().is_empty() {
            return Err(config_error("models.default_model must not be empty"));
        }
        if self.models.fallback_model.trim().is_empty() {
            return Err(config_error("models.fallback_model must not be empty"));
        }
        if self.orchestrator.max_iterations == 0 {
            return Err(config_error("orchestrator.max_iterations must be at least 1"));
        }
        if self.orchestrator.result_preview_chars == 0 {
            return Err(config_error(
                "orchestrator.result_preview_chars must be at least 1",
            ));
        }
        Ok(())
    }

    /// The API key, treating an empty string as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.endpoint
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn vision_model(&self) -> &str {
        self.vision
            .model
            .as_deref()
            .unwrap_or(&self.models.default_model)
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_transcription_model() -> String {
    "whisper-1".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_vision_max_tokens() -> u32 {
    300
}
fn default_max_iterations() -> usize {
    10
}
fn default_result_preview_chars() -> usize {
    200
}
fn default_recall_limit() -> usize {
    3
}
fn default_memory_capacity() -> usize {
    200
}

fn config_error(reason: &str) -> InferenceError {
    InferenceError::ConfigError {
        reason: reason.to_string(),
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the configuration file.
///
/// Order: `LUMEN_CONFIG`, then `config/lumen.yaml` walking upward from
/// `start`, then `lumen.yaml` in the data directory.
pub fn find_config_path(start: &Path) -> Result<PathBuf, InferenceError> {
    // 1. Check env var
    if let Ok(path) = std::env::var("LUMEN_CONFIG") {
        let candidate = PathBuf::from(path);
        if candidate.exists() {
            return Ok(candidate);
        }
        return Err(InferenceError::ConfigError {
            reason: format!("LUMEN_CONFIG points to missing file {}", candidate.display()),
        });
    }

    // 2. Walk upward from `start`
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_RELATIVE_PATH);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    // 3. Per-user data directory
    let candidate = crate::data_dir().join("lumen.yaml");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(InferenceError::ConfigError {
        reason: format!("could not find {CONFIG_RELATIVE_PATH}"),
    })
}

/// Load and validate the configuration file at `path`.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<AssistantConfig, InferenceError> {
    let raw = std::fs::read_to_string(path).map_err(|e| InferenceError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    parse_config(&raw)
}

/// Parse and validate configuration text.
pub fn parse_config(raw: &str) -> Result<AssistantConfig, InferenceError> {
    let interpolated = interpolate_env_vars(raw);

    let config: AssistantConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| InferenceError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })?;

    config.validate()?;
    Ok(config)
}

/// Load the discovered configuration, or the built-in default when none exists.
pub fn load_or_default(start: &Path) -> Result<AssistantConfig, InferenceError> {
    match find_config_path(start) {
        Ok(path) => {
            tracing::info!(path = %path.display(), "loading configuration");
            load_config(&path)
        }
        Err(e) => {
            tracing::info!(reason = %e, "no configuration file, using built-in defaults");
            parse_config(DEFAULT_CONFIG_YAML)
        }
    }
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some(idx) = expr.find(":-") {
        let var_name = &expr[..idx];
        let default = &expr[idx + 2..];
        std::env::var(var_name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        endpoint:
          base_url: "http://localhost:11434/v1"
        models:
          default_model: big
          fallback_model: small
          routes:
            coding: coder
    "#;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__LUMEN_TEST_NONEXISTENT_VAR__");
        let input = "${__LUMEN_TEST_NONEXISTENT_VAR__:-/fallback/path}";
        assert_eq!(interpolate_env_vars(input), "/fallback/path");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__LUMEN_TEST_INFERENCE_VAR__", "/custom/path");
        let input = "${__LUMEN_TEST_INFERENCE_VAR__:-/fallback/path}";
        assert_eq!(interpolate_env_vars(input), "/custom/path");
        std::env::remove_var("__LUMEN_TEST_INFERENCE_VAR__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/Documents");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/Documents"));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.orchestrator.max_iterations, 10);
        assert_eq!(config.orchestrator.result_preview_chars, 200);
        assert_eq!(config.transcription.language, "en");
        assert_eq!(config.vision.max_tokens, 300);
        assert_eq!(config.vision_model(), "big");
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_routing_resolution() {
        let config = parse_config(MINIMAL).unwrap();
        let routing = &config.models;
        assert_eq!(routing.resolve(Some("coding"), None), "coder");
        assert_eq!(routing.resolve(Some("unknown"), None), "big");
        assert_eq!(routing.resolve(None, None), "big");
        assert_eq!(routing.resolve(Some("coding"), Some("pinned")), "pinned");
        assert_eq!(routing.resolve(None, Some("  ")), "big");
        assert!(routing.is_fallback("small"));
        assert!(!routing.is_fallback("big"));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let yaml = format!("{MINIMAL}\n        orchestrator:\n          max_iterations: 0\n");
        let err = parse_config(&yaml).unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }

    #[test]
    fn test_missing_fallback_model_rejected() {
        let yaml = r#"
            endpoint:
              base_url: "http://localhost/v1"
            models:
              default_model: big
              fallback_model: ""
        "#;
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn test_builtin_default_config_parses() {
        let config = parse_config(DEFAULT_CONFIG_YAML).unwrap();
        assert_eq!(config.models.fallback_model, "gpt-4o-mini");
        assert_eq!(config.models.resolve(Some("quick"), None), "gpt-4o-mini");
        assert!(config.system_prompt.is_some());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.endpoint.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Path::new("/definitely/not/here/lumen.yaml"));
        assert!(matches!(result, Err(InferenceError::ConfigError { .. })));
    }
}
