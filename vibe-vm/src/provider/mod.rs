//! # LLM Provider Interface
//!
//! A trait-based abstraction for a single request/response exchange with a
//! generative-language backend. Providers do not retry; retry, transcript
//! mirroring and cancellation live in [`crate::oracle::OracleClient`].
//!
//! ## Design
//! - `LlmProvider` trait defines the exchange
//! - `GeminiProvider` speaks the `generateContent` REST API
//! - `ScriptedProvider` replays canned replies for tests

pub mod gemini;
pub mod scripted;

pub use gemini::GeminiProvider;
pub use scripted::ScriptedProvider;

use crate::error::{self, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

// ============================================================================
// Core Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// A function invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// One piece of a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Text(String),
    /// A file inlined as base64
    InlineData { mime_type: String, data: String },
    FunctionCall(FunctionCall),
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// One message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![Part::text(text)],
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::text(text)],
        }
    }

    pub fn with_parts(role: Role, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    /// All text parts joined together
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }
}

/// A capability the model may use during an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolDescriptor {
    /// Executed by the service itself; `body` is sent verbatim
    Builtin {
        name: String,
        body: serde_json::Value,
    },
    /// Declared to the service and executed locally when called
    Function {
        name: String,
        description: String,
        parameters: serde_json::Value,
    },
}

impl ToolDescriptor {
    pub fn name(&self) -> &str {
        match self {
            ToolDescriptor::Builtin { name, .. } => name,
            ToolDescriptor::Function { name, .. } => name,
        }
    }
}

/// Everything needed for one exchange
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub turns: Vec<Turn>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<serde_json::Value>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            model: model.into(),
            turns,
            ..Default::default()
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// What came back from one exchange
#[derive(Debug, Clone, Default)]
pub struct ProviderReply {
    /// Concatenated text parts, if any
    pub text: Option<String>,
    /// Function calls the model wants executed
    pub function_calls: Vec<FunctionCall>,
    /// The raw response body, for the transcript
    pub raw: String,
}

impl ProviderReply {
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            raw: text.clone(),
            text: Some(text),
            function_calls: Vec::new(),
        }
    }

    pub fn function_calls(calls: Vec<FunctionCall>) -> Self {
        let raw = serde_json::to_string(&calls).unwrap_or_default();
        Self {
            text: None,
            function_calls: calls,
            raw,
        }
    }
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Error type for provider operations
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Network/connection error
    Network(String),
    /// API returned a non-success status
    Api { status: u16, message: String },
    /// Failed to parse response
    Parse(String),
    /// Rate limited; `retry_after` is the service's hint when it sent one
    RateLimited {
        retry_after: Option<Duration>,
        body: String,
    },
    /// Other error
    Other(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(e) => write!(f, "Network error: {}", e),
            Self::Api { status, message } => write!(f, "API error ({}): {}", status, message),
            Self::Parse(e) => write!(f, "Parse error: {}", e),
            Self::RateLimited { retry_after, .. } => {
                write!(f, "Rate limited")?;
                if let Some(delay) = retry_after {
                    write!(f, " (retry after {:.1}s)", delay.as_secs_f64())?;
                }
                Ok(())
            }
            Self::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

/// The main LLM provider trait
#[allow(async_fn_in_trait)]
pub trait LlmProvider: Send + Sync {
    /// Get the provider name (e.g., "gemini")
    fn name(&self) -> &str;

    /// Get the default model
    fn default_model(&self) -> &str;

    /// Perform exactly one request/response exchange
    async fn generate(&self, request: &GenerateRequest) -> std::result::Result<ProviderReply, ProviderError>;
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub provider: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn gemini(api_key: impl Into<String>) -> Self {
        Self {
            provider: "gemini".into(),
            api_key: Some(api_key.into()),
            base_url: Some(gemini::DEFAULT_BASE_URL.into()),
            default_model: Some(gemini::DEFAULT_MODEL.into()),
            headers: HashMap::new(),
            timeout_secs: Some(300),
        }
    }

    /// Read the configuration from the process environment.
    ///
    /// `LLM_PROVIDER` picks the provider (default `gemini`); its upper-cased
    /// name prefixes the remaining variables: `{P}_API_KEY` (required),
    /// `{P}_URL` and `{P}_MODEL` (optional).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider = lookup("LLM_PROVIDER").unwrap_or_else(|| "gemini".to_string());
        let prefix = provider.to_uppercase();

        if provider.to_lowercase() != "gemini" {
            return Err(error::config_invalid(format!("unsupported provider '{}'", provider))
                .with_context("LLM_PROVIDER", provider));
        }

        let key_var = format!("{}_API_KEY", prefix);
        let api_key = lookup(&key_var).filter(|k| !k.is_empty()).ok_or_else(|| {
            error::config_invalid(format!("{} is not set", key_var)).with_context("variable", key_var.clone())
        })?;

        let mut config = Self::gemini(api_key);
        if let Some(url) = lookup(&format!("{}_URL", prefix)) {
            config.base_url = Some(url);
        }
        if let Some(model) = lookup(&format!("{}_MODEL", prefix)) {
            config.default_model = Some(model);
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_turn_constructors() {
        let user = Turn::user("Hello");
        assert_eq!(user.role, Role::User);
        assert_eq!(user.text(), "Hello");

        let model = Turn::model("Hi there!");
        assert_eq!(model.role, Role::Model);
    }

    #[test]
    fn test_turn_text_skips_files() {
        let turn = Turn::with_parts(
            Role::User,
            vec![
                Part::InlineData { mime_type: "application/pdf".into(), data: "AAAA".into() },
                Part::text("summarize "),
                Part::text("this"),
            ],
        );
        assert_eq!(turn.text(), "summarize this");
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ProviderConfig::from_lookup(env(&[
            ("LLM_PROVIDER", "gemini"),
            ("GEMINI_API_KEY", "k-123"),
            ("GEMINI_MODEL", "gemini-2.5-pro"),
        ]))
        .unwrap();

        assert_eq!(config.api_key.as_deref(), Some("k-123"));
        assert_eq!(config.default_model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(config.base_url.as_deref(), Some(gemini::DEFAULT_BASE_URL));
    }

    #[test]
    fn test_config_missing_key() {
        let err = ProviderConfig::from_lookup(env(&[("LLM_PROVIDER", "gemini")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("variable"), Some("GEMINI_API_KEY"));
    }

    #[test]
    fn test_config_unknown_provider() {
        let err = ProviderConfig::from_lookup(env(&[("LLM_PROVIDER", "carrier-pigeon")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_generate_request_builder() {
        let request = GenerateRequest::new("m", vec![Turn::user("hi")])
            .with_system_instruction("be terse")
            .with_response_schema(serde_json::json!({"type": "array"}));

        assert_eq!(request.system_instruction.as_deref(), Some("be terse"));
        assert!(request.tools.is_empty());
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
    }
}
