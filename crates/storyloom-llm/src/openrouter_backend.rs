//! OpenRouter HTTP backend
//!
//! OpenAI-compatible chat completions. Seeds and JSON response formats are
//! passed through from invocation metadata.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::http_client::HttpClient;
use crate::types::{LlmBackend, LlmInvocation, LlmResult, Message};
use storyloom_config::Config;
use storyloom_utils::LlmError;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_REFERER: &str = "https://github.com/storyloom/storyloom";
const DEFAULT_TITLE: &str = "storyloom";
pub(crate) const DEFAULT_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

#[derive(Clone)]
pub(crate) struct OpenRouterBackend {
    client: Arc<HttpClient>,
    base_url: String,
    api_key: String,
    default_model: String,
    default_params: HttpParams,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for HttpParams {
    fn default() -> Self {
        Self {
            max_tokens: 8192,
            temperature: 0.8,
        }
    }
}

impl OpenRouterBackend {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        default_model: String,
        default_params: HttpParams,
    ) -> Result<Self, LlmError> {
        Self::with_client(HttpClient::new()?, api_key, base_url, default_model, default_params)
    }

    fn with_client(
        client: HttpClient,
        api_key: String,
        base_url: Option<String>,
        default_model: String,
        default_params: HttpParams,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Arc::new(client),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            default_model,
            default_params,
        })
    }

    /// Build the backend from `[llm.openrouter]`.
    ///
    /// The default model is `[llm.openrouter] model`, falling back to
    /// `[models] default`.
    pub fn new_from_config(config: &Config) -> Result<Self, LlmError> {
        let section = config.llm.openrouter.clone().unwrap_or_default();

        let api_key_env = section
            .api_key_env
            .as_deref()
            .unwrap_or(DEFAULT_API_KEY_ENV);
        let api_key = std::env::var(api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                LlmError::Misconfiguration(format!(
                    "OpenRouter API key not found in environment variable '{api_key_env}'. \
                     Set it or configure a different api_key_env in [llm.openrouter]."
                ))
            })?;

        let default_model = section
            .model
            .clone()
            .or_else(|| config.models.default.clone())
            .ok_or_else(|| {
                LlmError::Misconfiguration(
                    "No model configured. Set [llm.openrouter] model or [models] default."
                        .to_string(),
                )
            })?;

        let defaults = HttpParams::default();
        let params = HttpParams {
            max_tokens: section.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: section.temperature.unwrap_or(defaults.temperature),
        };

        Self::new(api_key, section.base_url, default_model, params)
    }

    /// Per-invocation parameters: `inv.model` and metadata override defaults.
    fn resolve_params(&self, inv: &LlmInvocation) -> (String, HttpParams) {
        let model = if inv.model.is_empty() {
            self.default_model.clone()
        } else {
            inv.model.clone()
        };

        let max_tokens = inv
            .metadata
            .get("max_tokens")
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(self.default_params.max_tokens);

        let temperature = inv
            .metadata
            .get("temperature")
            .and_then(serde_json::Value::as_f64)
            .map(|v| v as f32)
            .unwrap_or(self.default_params.temperature);

        (
            model,
            HttpParams {
                max_tokens,
                temperature,
            },
        )
    }

    fn convert_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|msg| OpenAiMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            })
            .collect()
    }

    fn build_request(&self, inv: &LlmInvocation) -> OpenRouterRequest {
        let (model, params) = self.resolve_params(inv);
        OpenRouterRequest {
            model,
            messages: Self::convert_messages(&inv.messages),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            seed: inv.seed(),
            response_format: inv.metadata.get("response_format").cloned(),
            stream: false,
        }
    }
}

#[async_trait]
impl LlmBackend for OpenRouterBackend {
    async fn invoke(&self, inv: LlmInvocation) -> Result<LlmResult, LlmError> {
        let request_body = self.build_request(&inv);
        let model = request_body.model.clone();

        debug!(
            provider = "openrouter",
            run = %inv.run_id,
            purpose = %inv.purpose,
            model = %model,
            seed = ?request_body.seed,
            structured = request_body.response_format.is_some(),
            timeout_secs = inv.timeout.as_secs(),
            "Invoking OpenRouter backend"
        );

        let request = reqwest::Client::new()
            .post(&self.base_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", DEFAULT_REFERER)
            .header("X-Title", DEFAULT_TITLE)
            .header("Content-Type", "application/json")
            .json(&request_body);

        let response = self
            .client
            .execute_with_retry(request, inv.timeout, "openrouter")
            .await?;

        let response_body: OpenRouterResponse = response.json().await.map_err(|e| {
            LlmError::Transport(format!("Failed to parse OpenRouter response: {e}"))
        })?;

        let choice = response_body.choices.first().ok_or_else(|| {
            LlmError::Transport("OpenRouter response missing choices[0]".to_string())
        })?;

        // Some models return null content on refusals; treat it as empty text
        // so the engine's length checks decide what to do.
        let content = choice.message.content.clone().unwrap_or_default();

        let mut result = LlmResult::new(content, "openrouter", model);
        if let Some(usage) = response_body.usage {
            result = result.with_tokens(usage.prompt_tokens, usage.completion_tokens);
        }
        if let Some(reason) = &choice.finish_reason {
            result = result.with_extension("finish_reason", serde_json::json!(reason));
        }

        debug!(
            provider = "openrouter",
            tokens_input = ?result.tokens_input,
            tokens_output = ?result.tokens_output,
            "OpenRouter invocation completed"
        );

        Ok(result)
    }
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
