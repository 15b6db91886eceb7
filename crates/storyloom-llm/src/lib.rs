//! LLM backend abstraction
//!
//! All providers implement [`LlmBackend`]. The engine sees only the trait;
//! [`from_config`] picks and wraps the concrete backend.

mod budgeted_backend;
pub(crate) mod http_client;
mod openrouter_backend;
mod types;

pub use budgeted_backend::{BudgetedBackend, DEFAULT_BUDGET_LIMIT};
pub use storyloom_utils::LlmError;
pub use types::{LlmBackend, LlmInvocation, LlmResult, Message, Role};

pub(crate) use openrouter_backend::OpenRouterBackend;

use storyloom_config::Config;
use tracing::info;

/// Construct the configured backend.
///
/// HTTP backends are always wrapped in a [`BudgetedBackend`].
///
/// # Errors
///
/// `LlmError::Unsupported` for unknown providers and
/// `LlmError::Misconfiguration` for missing keys or models.
pub fn from_config(config: &Config) -> Result<Box<dyn LlmBackend>, LlmError> {
    let provider = config.provider();
    match provider {
        "openrouter" => {
            let backend = OpenRouterBackend::new_from_config(config)?;
            let budget = config.llm.openrouter.as_ref().and_then(|o| o.budget);
            info!(provider, "Using OpenRouter backend");
            Ok(Box::new(BudgetedBackend::with_limit_from_config(
                Box::new(backend),
                budget,
            )))
        }
        other => Err(LlmError::Unsupported(format!(
            "Unknown LLM provider '{other}'. Supported providers: openrouter"
        ))),
    }
}

#[cfg(test)]
mod factory_tests {
    use super::*;
    use serial_test::serial;
    use storyloom_config::OpenRouterConfig;

    fn openrouter_config(key_env: &str) -> Config {
        let mut config = Config::default();
        config.llm.openrouter = Some(OpenRouterConfig {
            api_key_env: Some(key_env.to_string()),
            model: Some("google/gemini-2.0-flash-001".to_string()),
            ..OpenRouterConfig::default()
        });
        config
    }

    #[test]
    fn test_unsupported_provider_fails_cleanly() {
        let mut config = Config::default();
        config.llm.provider = Some("carrier-pigeon".to_string());

        match from_config(&config) {
            Err(LlmError::Unsupported(msg)) => assert!(msg.contains("carrier-pigeon")),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    #[serial]
    fn test_missing_api_key_is_misconfiguration() {
        let config = openrouter_config("STORYLOOM_TEST_KEY_UNSET");
        // SAFETY: serialized; no concurrent env access.
        unsafe { std::env::remove_var("STORYLOOM_TEST_KEY_UNSET") };

        assert!(matches!(
            from_config(&config),
            Err(LlmError::Misconfiguration(_))
        ));
    }

    #[test]
    #[serial]
    fn test_missing_model_is_misconfiguration() {
        let mut config = openrouter_config("STORYLOOM_TEST_KEY_SET");
        if let Some(or) = config.llm.openrouter.as_mut() {
            or.model = None;
        }
        unsafe { std::env::set_var("STORYLOOM_TEST_KEY_SET", "sk-test") };
        let result = from_config(&config);
        unsafe { std::env::remove_var("STORYLOOM_TEST_KEY_SET") };

        assert!(matches!(result, Err(LlmError::Misconfiguration(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_openrouter_backend_is_budgeted() {
        let mut config = openrouter_config("STORYLOOM_TEST_KEY_BUDGET");
        if let Some(or) = config.llm.openrouter.as_mut() {
            or.budget = Some(0);
        }
        unsafe { std::env::set_var("STORYLOOM_TEST_KEY_BUDGET", "sk-test") };
        let backend = from_config(&config);
        unsafe { std::env::remove_var("STORYLOOM_TEST_KEY_BUDGET") };

        let inv = LlmInvocation::new(
            "run",
            "outline",
            "",
            std::time::Duration::from_secs(5),
            vec![Message::user("hi")],
        );
        let err = backend.unwrap().invoke(inv).await.unwrap_err();
        assert!(matches!(err, LlmError::BudgetExceeded { limit: 0, attempted: 1 }));
    }
}
