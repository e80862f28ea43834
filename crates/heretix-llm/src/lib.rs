//! LLM backend abstraction for multi-provider support
//!
//! This crate provides a trait-based system for invoking language models over
//! HTTP. All providers implement the `LlmBackend` trait, so the caller (the
//! RPL runner and the WEL stance judge) can work with any provider without
//! knowing implementation details.

mod anthropic_backend;
mod budgeted_backend;
pub mod error;
pub(crate) mod http_client;
mod mock_backend;
mod openrouter_backend;
mod types;

pub use error::LlmError;
pub use mock_backend::MockBackend;
pub use types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};

#[doc(hidden)]
pub use budgeted_backend::BudgetedBackend;

#[doc(hidden)]
pub use http_client::redact_error_message_for_testing;

pub(crate) use anthropic_backend::AnthropicBackend;
pub(crate) use openrouter_backend::OpenRouterBackend;

/// Per-provider HTTP settings. One of `anthropic`/`openrouter` is required
/// depending on `provider`.
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub provider: String,
    pub fallback_provider: Option<String>,
    pub anthropic: Option<AnthropicSettings>,
    pub openrouter: Option<OpenRouterSettings>,
}

#[derive(Debug, Clone)]
pub struct AnthropicSettings {
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct OpenRouterSettings {
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub budget: Option<u32>,
}

/// Metadata describing a fallback-provider substitution made during
/// backend construction.
#[derive(Debug, Clone)]
pub struct LlmFallbackInfo {
    pub primary_provider: String,
    pub fallback_provider: String,
    pub reason: String,
}

impl LlmFallbackInfo {
    #[must_use]
    pub fn warning_message(&self) -> String {
        format!(
            "llm_fallback: primary provider '{}' failed ({}), using fallback provider '{}'",
            self.primary_provider, self.reason, self.fallback_provider
        )
    }
}

fn construct_backend_for_provider(
    provider: &str,
    config: &LlmConfig,
) -> Result<Box<dyn LlmBackend>, LlmError> {
    match provider {
        "openrouter" => {
            let backend = OpenRouterBackend::new_from_settings(config.openrouter.as_ref())?;
            let budget = config.openrouter.as_ref().and_then(|or| or.budget);
            let budgeted = BudgetedBackend::with_limit_from_env(Box::new(backend), budget);
            Ok(Box::new(budgeted))
        }
        "anthropic" => {
            let backend = AnthropicBackend::new_from_settings(config.anthropic.as_ref())?;
            Ok(Box::new(backend))
        }
        unknown => Err(LlmError::Unsupported(format!(
            "Unknown LLM provider '{unknown}'. Supported providers: openrouter, anthropic."
        ))),
    }
}

/// Construct a backend for `config.provider`, falling back to
/// `config.fallback_provider` if primary construction fails.
///
/// Fallback only applies to construction/validation failures (missing API
/// key, missing model); runtime errors from an already-constructed backend
/// are never retried against the fallback provider.
///
/// # Errors
///
/// Returns `LlmError::Unsupported` for an unknown provider, or
/// `LlmError::Misconfiguration` when provider-specific settings are invalid
/// and no fallback is configured (or the fallback also fails).
pub fn from_config_with_fallback(
    config: &LlmConfig,
) -> Result<(Box<dyn LlmBackend>, Option<LlmFallbackInfo>), LlmError> {
    let primary_result = construct_backend_for_provider(&config.provider, config);

    match primary_result {
        Ok(backend) => Ok((backend, None)),
        Err(primary_error) => {
            let Some(fallback_provider) = config.fallback_provider.clone() else {
                return Err(primary_error);
            };
            let reason = http_client::redact(&primary_error.to_string());
            match construct_backend_for_provider(&fallback_provider, config) {
                Ok(fallback_backend) => Ok((
                    fallback_backend,
                    Some(LlmFallbackInfo {
                        primary_provider: config.provider.clone(),
                        fallback_provider,
                        reason,
                    }),
                )),
                Err(_fallback_error) => Err(primary_error),
            }
        }
    }
}

/// Construct a backend for `config.provider`, discarding fallback metadata.
///
/// # Errors
///
/// See [`from_config_with_fallback`].
pub fn from_config(config: &LlmConfig) -> Result<Box<dyn LlmBackend>, LlmError> {
    let (backend, _fallback_info) = from_config_with_fallback(config)?;
    Ok(backend)
}

#[cfg(test)]
mod factory_tests {
    use super::*;

    #[test]
    fn unknown_provider_fails_cleanly() {
        let config = LlmConfig {
            provider: "invalid-provider".to_string(),
            ..Default::default()
        };
        match from_config(&config) {
            Err(LlmError::Unsupported(msg)) => {
                assert!(msg.contains("invalid-provider"));
            }
            other => panic!("expected Unsupported, got {other:?}"),
        }
    }

    #[test]
    fn fallback_info_returned_when_fallback_used() {
        unsafe {
            std::env::remove_var("MISSING_OPENROUTER_KEY");
            std::env::set_var("ANTHROPIC_API_KEY_FALLBACK_TEST", "test-key");
        }

        let config = LlmConfig {
            provider: "openrouter".to_string(),
            fallback_provider: Some("anthropic".to_string()),
            openrouter: Some(OpenRouterSettings {
                api_key_env: Some("MISSING_OPENROUTER_KEY".to_string()),
                base_url: None,
                model: Some("google/gemini-2.0-flash-lite".to_string()),
                max_tokens: Some(256),
                temperature: Some(0.2),
                budget: None,
            }),
            anthropic: Some(AnthropicSettings {
                api_key_env: Some("ANTHROPIC_API_KEY_FALLBACK_TEST".to_string()),
                base_url: None,
                model: Some("claude-3-5-haiku".to_string()),
                max_tokens: Some(256),
                temperature: Some(0.2),
            }),
        };

        let result = from_config_with_fallback(&config);
        unsafe {
            std::env::remove_var("ANTHROPIC_API_KEY_FALLBACK_TEST");
        }

        let (_backend, fallback_info) = result.expect("fallback backend should construct");
        let info = fallback_info.expect("expected fallback info when fallback is used");
        assert_eq!(info.primary_provider, "openrouter");
        assert_eq!(info.fallback_provider, "anthropic");
        assert!(info.warning_message().contains("llm_fallback"));
    }

    #[test]
    fn no_fallback_configured_propagates_primary_error() {
        unsafe {
            std::env::remove_var("OPENROUTER_API_KEY_NONE_TEST");
        }
        let config = LlmConfig {
            provider: "openrouter".to_string(),
            fallback_provider: None,
            openrouter: Some(OpenRouterSettings {
                api_key_env: Some("OPENROUTER_API_KEY_NONE_TEST".to_string()),
                base_url: None,
                model: Some("m".to_string()),
                max_tokens: None,
                temperature: None,
                budget: None,
            }),
            anthropic: None,
        };
        match from_config(&config) {
            Err(LlmError::Misconfiguration(_)) => {}
            other => panic!("expected Misconfiguration, got {other:?}"),
        }
    }
}
