//! Aggregated top-level error type for the claim-verification pipeline.
//!
//! Every crate-local failure domain defines its own `thiserror::Error` enum
//! (`heretix_types::TypesError`, `heretix_llm::LlmError`,
//! `heretix_aggregate::AggregateError`, `heretix_ratelimit::RateLimitTimeout`,
//! `heretix_store::StoreError`); this crate is the boundary where a pipeline
//! run collapses all of them into one typed [`HeretixError`] and decides what
//! the caller gets to see. The [`UserFriendlyError`] trait keeps that
//! decision next to the variant instead of scattered across call sites.

use heretix_aggregate::AggregateError;
use heretix_error_redaction::redact_error_message;
use heretix_llm::LlmError;
use heretix_ratelimit::RateLimitTimeout;
use heretix_store::StoreError;
use heretix_types::TypesError;
use thiserror::Error;

/// Broad category a [`HeretixError`] belongs to, used to pick an HTTP status
/// at the API boundary without matching on every variant there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller-supplied input was invalid; safe to return as a 4xx.
    Validation,
    /// The run could not complete despite valid input; safe to return as a
    /// 5xx, details redacted.
    Execution,
}

/// Everything that can end a run. Constructed via `#[from]` conversions from
/// each crate-local error type, plus a handful of pipeline-level variants
/// (`InsufficientSamples`, `DeadlineExceeded`, `PromptTooLong`) that spec.md
/// §7 names but that have no single owning crate.
#[derive(Debug, Error)]
pub enum HeretixError {
    #[error("validation failed: {0}")]
    Validation(#[from] TypesError),

    #[error("unknown model alias: {0}")]
    UnknownModel(String),

    #[error("provider returned unparseable output: {0}")]
    ParseError(String),

    #[error(transparent)]
    RateLimitTimeout(#[from] RateLimitTimeout),

    #[error("provider returned HTTP {status}: {body_excerpt}")]
    ProviderHttpError { status: u16, body_excerpt: String },

    #[error("insufficient valid samples: need at least {min}, got {actual}")]
    InsufficientSamples { min: usize, actual: usize },

    #[error("run exceeded its wall-clock budget of {budget_ms}ms")]
    DeadlineExceeded { budget_ms: u64 },

    #[error("rendered prompt of {actual} chars exceeds the configured limit of {max}")]
    PromptTooLong { max: usize, actual: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Aggregate(AggregateError),
}

impl From<AggregateError> for HeretixError {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::TooFewSamples { min, actual } => HeretixError::InsufficientSamples { min, actual },
            other => HeretixError::Aggregate(other),
        }
    }
}

/// A typed error's contract for surfacing at the HTTP boundary: a message
/// safe to send to a caller (no provider internals, no paths, no secrets)
/// and a category used to pick a status code.
pub trait UserFriendlyError {
    fn user_message(&self) -> String;
    fn category(&self) -> ErrorCategory;
}

impl UserFriendlyError for HeretixError {
    fn user_message(&self) -> String {
        match self {
            HeretixError::Validation(e) => e.to_string(),
            HeretixError::UnknownModel(model) => format!("unknown model alias: {model}"),
            HeretixError::ParseError(_) => "the model provider returned output that could not be parsed".to_string(),
            HeretixError::RateLimitTimeout(_) => "the request could not be scheduled before its deadline".to_string(),
            HeretixError::ProviderHttpError { status, .. } => {
                format!("the model provider returned an error (status {status})")
            }
            HeretixError::InsufficientSamples { min, actual } => {
                format!("too few valid samples to produce a reliable estimate (need {min}, got {actual})")
            }
            HeretixError::DeadlineExceeded { .. } => "the run exceeded its time budget".to_string(),
            HeretixError::PromptTooLong { max, .. } => format!("the claim is too long to render within the {max}-character prompt limit"),
            HeretixError::Store(_) => "the run could not be persisted".to_string(),
            HeretixError::Llm(e) => redact_error_message(&e.to_string()),
            HeretixError::Aggregate(e) => e.to_string(),
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            HeretixError::Validation(_)
            | HeretixError::UnknownModel(_)
            | HeretixError::PromptTooLong { .. } => ErrorCategory::Validation,
            HeretixError::ParseError(_)
            | HeretixError::RateLimitTimeout(_)
            | HeretixError::ProviderHttpError { .. }
            | HeretixError::InsufficientSamples { .. }
            | HeretixError::DeadlineExceeded { .. }
            | HeretixError::Store(_)
            | HeretixError::Llm(_)
            | HeretixError::Aggregate(_) => ErrorCategory::Execution,
        }
    }
}

/// Logs `err` at the appropriate level with correlation IDs, then returns its
/// redacted, user-facing message and category for the HTTP response.
pub fn report(err: &HeretixError, run_id: &str, execution_id: &str) -> (String, ErrorCategory) {
    match err.category() {
        ErrorCategory::Validation => {
            tracing::info!(run_id, execution_id, error = %err, "run rejected: validation error");
        }
        ErrorCategory::Execution => {
            tracing::warn!(run_id, execution_id, error = %err, "run failed: execution error");
        }
    }
    (err.user_message(), err.category())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_never_leak_into_execution_category() {
        let err = HeretixError::from(TypesError::EmptyClaim);
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[test]
    fn too_few_samples_maps_aggregate_error_to_insufficient_samples() {
        let err: HeretixError = AggregateError::TooFewSamples { min: 3, actual: 1 }.into();
        assert!(matches!(err, HeretixError::InsufficientSamples { min: 3, actual: 1 }));
        assert_eq!(err.category(), ErrorCategory::Execution);
    }

    #[test]
    fn provider_http_error_user_message_omits_body_excerpt() {
        let err = HeretixError::ProviderHttpError { status: 503, body_excerpt: "internal trace xyz".to_string() };
        let msg = err.user_message();
        assert!(!msg.contains("internal trace xyz"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn report_returns_redacted_message_and_category() {
        let err = HeretixError::DeadlineExceeded { budget_ms: 5000 };
        let (msg, category) = report(&err, "run-1", "exec-1");
        assert_eq!(category, ErrorCategory::Execution);
        assert!(msg.contains("time budget"));
    }
}
