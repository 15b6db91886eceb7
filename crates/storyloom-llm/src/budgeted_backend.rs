//! Budgeted backend wrapper for LLM call limiting
//!
//! A long story makes hundreds of calls; a runaway repair or revision loop
//! must not be able to make thousands.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use crate::types::{LlmBackend, LlmInvocation, LlmResult};
use storyloom_utils::LlmError;

/// Default budget limit for backend calls per process
pub const DEFAULT_BUDGET_LIMIT: u32 = 2000;

/// Wraps an `LlmBackend` and fails with `BudgetExceeded` once `limit` calls
/// have been attempted.
///
/// Attempts count, not successes: a failing backend still consumes budget.
pub struct BudgetedBackend {
    inner: Box<dyn LlmBackend>,
    calls: AtomicU32,
    limit: u32,
}

impl BudgetedBackend {
    #[must_use]
    pub fn new(inner: Box<dyn LlmBackend>, limit: u32) -> Self {
        debug!(limit, "Creating BudgetedBackend");
        Self {
            inner,
            calls: AtomicU32::new(0),
            limit,
        }
    }

    /// Use the resolved `[llm.openrouter] budget` (env and file already
    /// merged by config discovery), or [`DEFAULT_BUDGET_LIMIT`].
    #[must_use]
    pub fn with_limit_from_config(inner: Box<dyn LlmBackend>, config_budget: Option<u32>) -> Self {
        match config_budget {
            Some(limit) => debug!(limit, "Using configured budget limit"),
            None => debug!(limit = DEFAULT_BUDGET_LIMIT, "Using default budget limit"),
        }
        Self::new(inner, config_budget.unwrap_or(DEFAULT_BUDGET_LIMIT))
    }

    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[async_trait]
impl LlmBackend for BudgetedBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let current = self.calls.fetch_add(1, Ordering::SeqCst);

        if current >= self.limit {
            let attempted = current + 1;
            warn!(limit = self.limit, attempted, "Budget limit exceeded");
            return Err(LlmError::BudgetExceeded {
                limit: self.limit,
                attempted,
            });
        }

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
    use crate::types::Message;
    use std::time::Duration;

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

    fn invocation() -> LlmInvocation {
        LlmInvocation::new(
            "run",
            "outline",
            "test-model",
            Duration::from_secs(60),
            vec![Message::user("test message")],
        )
    }

    #[tokio::test]
    async fn test_budget_allows_calls_under_limit_then_fails() {
        let backend = BudgetedBackend::new(Box::new(MockSuccessBackend), 2);

        assert!(backend.invoke(invocation()).await.is_ok());
        assert!(backend.invoke(invocation()).await.is_ok());

        let err = backend.invoke(invocation()).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::BudgetExceeded {
                limit: 2,
                attempted: 3
            }
        );
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_failures_consume_budget() {
        let backend = BudgetedBackend::new(Box::new(MockFailureBackend), 1);

        assert!(matches!(
            backend.invoke(invocation()).await,
            Err(LlmError::Transport(_))
        ));
        assert!(matches!(
            backend.invoke(invocation()).await,
            Err(LlmError::BudgetExceeded { .. })
        ));
    }

    #[test]
    fn test_limit_resolution() {
        let default = BudgetedBackend::with_limit_from_config(Box::new(MockSuccessBackend), None);
        assert_eq!(default.limit(), DEFAULT_BUDGET_LIMIT);

        let configured =
            BudgetedBackend::with_limit_from_config(Box::new(MockSuccessBackend), Some(7));
        assert_eq!(configured.limit(), 7);
    }
}
