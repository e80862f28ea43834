//! Error types for LLM backend invocation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("budget exceeded: limit {limit}, attempted call {attempted}")]
    BudgetExceeded { limit: u32, attempted: u32 },
}
