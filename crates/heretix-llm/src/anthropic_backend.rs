//! Anthropic HTTP backend implementation
//!
//! This module provides an HTTP-based LLM backend for Anthropic's Messages API,
//! which offers direct access to Claude models through their native API.

use crate::LlmError;
use crate::http_client::HttpClient;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};
use crate::AnthropicSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Default Anthropic API endpoint
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic backend configuration
#[derive(Clone)]
pub(crate) struct AnthropicBackend {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

/// HTTP request parameters
#[derive(Debug, Clone)]
pub(crate) struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

impl AnthropicBackend {
    /// Create a new Anthropic backend
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if the HTTP client cannot be constructed
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        default_model: String,
        default_params: HttpParams,
    ) -> Result<Self, LlmError> {
        let client = HttpClient::new()?;

        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model,
            default_params,
        })
    }

    /// Create a new Anthropic backend from provider settings
    ///
    /// # Errors
    ///
    /// Returns `LlmError::Misconfiguration` if:
    /// - The API key environment variable is not set
    /// - No model is configured
    /// - The HTTP client cannot be constructed
    pub fn new_from_settings(settings: Option<&AnthropicSettings>) -> Result<Self, LlmError> {
        let api_key_env = settings
            .and_then(|a| a.api_key_env.as_deref())
            .unwrap_or("ANTHROPIC_API_KEY");

        let api_key = std::env::var(api_key_env).map_err(|_| {
            LlmError::Misconfiguration(format!(
                "Anthropic API key not found in environment variable '{api_key_env}'. \
                 Please set this variable or configure a different api_key_env."
            ))
        })?;

        let base_url = settings.and_then(|a| a.base_url.clone());

        let default_model = settings
            .and_then(|a| a.model.clone())
            .ok_or_else(|| {
                LlmError::Misconfiguration(
                    "Anthropic model not specified in configuration.".to_string(),
                )
            })?;

        let default_params = HttpParams {
            max_tokens: settings.and_then(|a| a.max_tokens).unwrap_or(2048),
            temperature: settings.and_then(|a| a.temperature).unwrap_or(0.2),
        };

        Self::new(api_key, base_url, default_model, default_params)
    }

    /// Resolve parameters for this invocation
    ///
    /// Parameters are resolved with the following precedence:
    /// 1. `inv.model` overrides `default_model`
    /// 2. `inv.metadata["max_tokens"]` overrides `default_params.max_tokens`
    /// 3. `inv.metadata["temperature"]` overrides `default_params.temperature`
    /// 4. Unspecified values fall back to backend defaults
    fn resolve_params(&self, inv: &LlmInvocation) -> (String, HttpParams) {
        let model = if inv.model.is_empty() {
            self.default_model.clone()
        } else {
            inv.model.clone()
        };

        let max_tokens = inv
            .metadata
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(self.default_params.max_tokens);

        let temperature = inv
            .metadata
            .get("temperature")
            .and_then(|v| v.as_f64())
            .map(|v| v as f32)
            .unwrap_or(self.default_params.temperature);

        let params = HttpParams {
            max_tokens,
            temperature,
        };

        (model, params)
    }

    /// Convert messages to Anthropic Messages API format
    ///
    /// Anthropic's API uses a `system` field for system prompts and a `messages` array
    /// for user/assistant messages. This function separates system messages from the
    /// conversation messages.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let mut system_prompt: Option<String> = None;
        let mut anthropic_messages = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    if let Some(existing) = system_prompt.as_mut() {
                        existing.push_str("\n\n");
                        existing.push_str(&msg.content);
                    } else {
                        system_prompt = Some(msg.content.clone());
                    }
                }
                Role::User => {
                    anthropic_messages.push(AnthropicMessage {
                        role: "user".to_string(),
                        content: msg.content.clone(),
                    });
                }
                Role::Assistant => {
                    anthropic_messages.push(AnthropicMessage {
                        role: "assistant".to_string(),
                        content: msg.content.clone(),
                    });
                }
            }
        }

        (system_prompt, anthropic_messages)
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let (model, params) = self.resolve_params(&inv);

        debug!(
            provider = "anthropic",
            model = %model,
            max_tokens = params.max_tokens,
            temperature = params.temperature,
            timeout_secs = inv.timeout.as_secs(),
            "Invoking Anthropic backend"
        );

        let (system_prompt, anthropic_messages) = Self::convert_messages(&inv.messages);

        let request_body = AnthropicRequest {
            model: model.clone(),
            messages: anthropic_messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            system: system_prompt,
        };

        let request = reqwest::Client::new()
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request_body);

        let response = self
            .client
            .execute_with_retry(request, inv.timeout, "anthropic")
            .await?;

        let response_body: AnthropicResponse = response.json().await.map_err(|e| {
            LlmError::Transport(format!("Failed to parse Anthropic response: {e}"))
        })?;

        let mut content_parts = Vec::new();
        for content_block in &response_body.content {
            if content_block.content_type == "text"
                && let Some(text) = &content_block.text
            {
                content_parts.push(text.clone());
            }
        }

        let content = content_parts.join("");

        if content.is_empty() {
            return Err(LlmError::Transport(
                "Anthropic response missing text content".to_string(),
            ));
        }

        let mut result = LlmResult::new(content, "anthropic", model);

        if let Some(usage) = response_body.usage {
            result.tokens_input = Some(usage.input_tokens);
            result.tokens_output = Some(usage.output_tokens);
        }

        result.timed_out = Some(false);
        result.timeout_seconds = Some(inv.timeout.as_secs());

        debug!(
            provider = "anthropic",
            tokens_input = ?result.tokens_input,
            tokens_output = ?result.tokens_output,
            "Anthropic invocation completed"
        );

        Ok(result)
    }
}

/// Anthropic message format for requests
#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

/// Anthropic request body
#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

/// Anthropic response body
#[derive(Debug, Clone, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

/// Content block in Anthropic response
#[derive(Debug, Clone, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

/// Token usage information
#[derive(Debug, Clone, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}
