//! Budgeted backend wrapper for LLM call limiting
//!
//! This module provides a wrapper around any `LlmBackend` that enforces a budget
//! limit on the number of invocations. This is primarily used for cost control
//! with HTTP providers like OpenRouter.

use crate::LlmError;
use crate::types::{LlmBackend, LlmInvocation, LlmResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Default budget limit for OpenRouter calls per process
pub(crate) const DEFAULT_BUDGET_LIMIT: u32 = 20;

/// Environment variable for overriding the budget limit
pub(crate) const BUDGET_ENV_VAR: &str = "HERETIX_OPENROUTER_BUDGET";

/// A wrapper around an `LlmBackend` that enforces a budget limit on invocations.
///
/// The budget tracks attempted calls, not successful requests: even if the
/// underlying backend fails, the budget slot is consumed, so retry loops
/// can't bypass the limit. Budget tracking is per process lifetime.
pub struct BudgetedBackend {
    inner: Box<dyn LlmBackend>,
    budget: Arc<AtomicU32>,
    limit: u32,
}

impl BudgetedBackend {
    /// Create a new budgeted backend with the specified limit
    pub fn new(inner: Box<dyn LlmBackend>, limit: u32) -> Self {
        debug!(limit = limit, "Creating BudgetedBackend");
        Self {
            inner,
            budget: Arc::new(AtomicU32::new(0)),
            limit,
        }
    }

    /// Create a new budgeted backend with limit resolved from the environment.
    ///
    /// Budget limit precedence (highest to lowest):
    /// 1. Environment variable (`HERETIX_OPENROUTER_BUDGET`)
    /// 2. `config_budget` (from run configuration)
    /// 3. Default (20 calls per process)
    pub fn with_limit_from_env(inner: Box<dyn LlmBackend>, config_budget: Option<u32>) -> Self {
        let limit = std::env::var(BUDGET_ENV_VAR)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .or(config_budget)
            .unwrap_or(DEFAULT_BUDGET_LIMIT);

        debug!(limit, "Resolved OpenRouter budget limit");
        Self::new(inner, limit)
    }

    /// Get the current call count
    #[cfg(test)]
    pub fn call_count(&self) -> u32 {
        self.budget.load(Ordering::SeqCst)
    }

    /// Get the budget limit
    #[cfg(test)]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[async_trait]
impl LlmBackend for BudgetedBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        // Increment before calling the inner backend so attempted (not just
        // successful) calls count against the budget.
        let current = self.budget.fetch_add(1, Ordering::SeqCst);

        if current >= self.limit {
            let attempted = current + 1;
            warn!(limit = self.limit, attempted, "Budget limit exceeded");
            return Err(LlmError::BudgetExceeded {
                limit: self.limit,
                attempted,
            });
        }

        debug!(
            call_count = current + 1,
            limit = self.limit,
            "Budget check passed, invoking inner backend"
        );

        let result = self.inner.invoke(inv).await;

        if let Err(e) = &result {
            debug!(
                call_count = current + 1,
                limit = self.limit,
                error = %e,
                "Inner backend invocation failed (budget slot still consumed)"
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LlmResult, Message, Role};
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_guard() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
    }

    struct MockSuccessBackend;

    #[async_trait]
    impl LlmBackend for MockSuccessBackend {
        async fn invoke(&self, _inv: LlmInvocation) -> Result<LlmResult, LlmError> {
            Ok(LlmResult::new("test response", "mock", "mock-model"))
        }
    }

    struct MockFailureBackend;

    #[async_trait]
    impl LlmBackend for MockFailureBackend {
        async fn invoke(&self, _inv: LlmInvocation) -> Result<LlmResult, LlmError> {
            Err(LlmError::Transport("mock failure".to_string()))
        }
    }

    fn create_test_invocation() -> LlmInvocation {
        LlmInvocation::new(
            "test-model",
            Duration::from_secs(60),
            vec![Message::new(Role::User, "test message")],
        )
    }

    #[tokio::test]
    async fn test_budget_allows_calls_under_limit() {
        let backend = BudgetedBackend::new(Box::new(MockSuccessBackend), 3);

        for expected in 1..=3 {
            let result = backend.invoke(create_test_invocation()).await;
            assert!(result.is_ok());
            assert_eq!(backend.call_count(), expected);
        }
    }

    #[tokio::test]
    async fn test_budget_fails_at_limit() {
        let backend = BudgetedBackend::new(Box::new(MockSuccessBackend), 2);

        backend.invoke(create_test_invocation()).await.unwrap();
        backend.invoke(create_test_invocation()).await.unwrap();

        let result = backend.invoke(create_test_invocation()).await;
        match result {
            Err(LlmError::BudgetExceeded { limit, attempted }) => {
                assert_eq!(limit, 2);
                assert_eq!(attempted, 3);
            }
            _ => panic!("Expected BudgetExceeded error, got {result:?}"),
        }
    }

    #[tokio::test]
    async fn test_budget_tracks_failed_calls() {
        let backend = BudgetedBackend::new(Box::new(MockFailureBackend), 2);

        assert!(backend.invoke(create_test_invocation()).await.is_err());
        assert_eq!(backend.call_count(), 1);
        assert!(backend.invoke(create_test_invocation()).await.is_err());
        assert_eq!(backend.call_count(), 2);

        let result = backend.invoke(create_test_invocation()).await;
        match result {
            Err(LlmError::BudgetExceeded { limit, attempted }) => {
                assert_eq!(limit, 2);
                assert_eq!(attempted, 3);
            }
            _ => panic!("Expected BudgetExceeded error, got {result:?}"),
        }
    }

    #[tokio::test]
    async fn test_budget_limit_zero() {
        let backend = BudgetedBackend::new(Box::new(MockSuccessBackend), 0);

        let result = backend.invoke(create_test_invocation()).await;
        match result {
            Err(LlmError::BudgetExceeded { limit, attempted }) => {
                assert_eq!(limit, 0);
                assert_eq!(attempted, 1);
            }
            _ => panic!("Expected BudgetExceeded error, got {result:?}"),
        }
    }

    #[test]
    fn test_budget_precedence_env_over_config() {
        let _guard = env_guard();
        unsafe {
            std::env::remove_var(BUDGET_ENV_VAR);
            std::env::set_var(BUDGET_ENV_VAR, "15");
        }

        let backend = BudgetedBackend::with_limit_from_env(Box::new(MockSuccessBackend), Some(30));
        assert_eq!(backend.limit(), 15);

        unsafe {
            std::env::remove_var(BUDGET_ENV_VAR);
        }
    }

    #[test]
    fn test_budget_precedence_config_over_default() {
        let _guard = env_guard();
        unsafe {
            std::env::remove_var(BUDGET_ENV_VAR);
        }

        let backend = BudgetedBackend::with_limit_from_env(Box::new(MockSuccessBackend), Some(25));
        assert_eq!(backend.limit(), 25);
    }

    #[test]
    fn test_budget_precedence_default_when_none() {
        let _guard = env_guard();
        unsafe {
            std::env::remove_var(BUDGET_ENV_VAR);
        }

        let backend = BudgetedBackend::with_limit_from_env(Box::new(MockSuccessBackend), None);
        assert_eq!(backend.limit(), DEFAULT_BUDGET_LIMIT);
    }

    #[test]
    fn test_budget_precedence_env_invalid_falls_back_to_config() {
        let _guard = env_guard();
        unsafe {
            std::env::remove_var(BUDGET_ENV_VAR);
            std::env::set_var(BUDGET_ENV_VAR, "not-a-number");
        }

        let backend = BudgetedBackend::with_limit_from_env(Box::new(MockSuccessBackend), Some(35));
        assert_eq!(backend.limit(), 35);

        unsafe {
            std::env::remove_var(BUDGET_ENV_VAR);
        }
    }
}
