//! Frontier SDK-style HTTP adapter, grounded on
//! `llm::remote::{claude,openai,gemini}`'s request/response conversion
//! shape, generalized to the flowchart engine's `ExecutionRequest`/
//! `ExecutionResult` contract instead of a chat-turn `ChatRequest`/
//! `ChatResponse` pair.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use llmctl_core::{EngineError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adapter::ProviderAdapter;
use crate::guardrail::assert_not_cli_binary;
use crate::request::{
    ApiFailureCategory, ExecutionError, ExecutionRequest, ExecutionResult, ExecutionUsage,
};

/// Endpoint + auth configuration for one frontier provider. One instance
/// per configured model, constructed by `llmctl-engine::config` from the
/// provider registry.
#[derive(Debug, Clone)]
pub struct FrontierConfig {
    pub provider_name: &'static str,
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl FrontierConfig {
    pub fn new(provider_name: &'static str, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider_name,
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct FrontierChatBody<'a> {
    model: &'a str,
    messages: Vec<FrontierMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FrontierMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct FrontierResponseBody {
    #[serde(default)]
    content: Vec<FrontierContentBlock>,
    #[serde(default)]
    usage: Option<FrontierUsage>,
}

#[derive(Debug, Deserialize)]
struct FrontierContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrontierUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

/// Adapter for hosted frontier providers (Anthropic/OpenAI/Gemini-style
/// chat-completions APIs) reached over `reqwest`.
pub struct FrontierAdapter {
    config: FrontierConfig,
    client: Client,
}

impl FrontierAdapter {
    pub fn new(config: FrontierConfig) -> Self {
        assert_not_cli_binary(config.provider_name);
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build frontier HTTP client");
        Self { config, client }
    }

    fn build_body<'a>(&self, request: &'a ExecutionRequest, prompt: &'a str) -> FrontierChatBody<'a> {
        FrontierChatBody {
            model: &request.model_config.model,
            messages: vec![FrontierMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: request.model_config.max_tokens,
            temperature: request.model_config.temperature,
        }
    }

    fn classify_transport_error(err: &reqwest::Error) -> ApiFailureCategory {
        if err.is_timeout() {
            ApiFailureCategory::Timeout
        } else if err.is_connect() {
            ApiFailureCategory::ProviderUnavailable
        } else {
            ApiFailureCategory::ProviderUnavailable
        }
    }

    fn classify_status_error(status: reqwest::StatusCode) -> ApiFailureCategory {
        if status.as_u16() == 401 || status.as_u16() == 403 {
            ApiFailureCategory::Auth
        } else if status.as_u16() == 408 || status.as_u16() == 429 {
            ApiFailureCategory::Timeout
        } else {
            ApiFailureCategory::ProviderUnavailable
        }
    }
}

#[async_trait]
impl ProviderAdapter for FrontierAdapter {
    fn name(&self) -> &'static str {
        self.config.provider_name
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let started_at = Utc::now();
        let prompt = request
            .input_context
            .get("user_request")
            .and_then(Value::as_str)
            .unwrap_or_default();

        debug!(provider = self.config.provider_name, node_id = %request.node_id, "dispatching frontier request");

        let body = self.build_body(&request, prompt);
        let response = self
            .client
            .post(format!("{}/v1/messages", self.config.base_url))
            .header("x-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(err) => {
                let category = Self::classify_transport_error(&err);
                warn!(provider = self.config.provider_name, category = category.as_str(), "frontier transport error");
                return Ok(classified_failure(started_at, category, err.to_string()));
            }
        };

        if !response.status().is_success() {
            let category = Self::classify_status_error(response.status());
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Ok(classified_failure(
                started_at,
                category,
                format!("frontier API returned {status}: {body_text}"),
            ));
        }

        let parsed: FrontierResponseBody = response
            .json()
            .await
            .map_err(|err| EngineError::internal(format!("invalid frontier response body: {err}")))?;

        let text = parsed
            .content
            .iter()
            .filter_map(|block| block.text.clone())
            .collect::<Vec<_>>()
            .join("");

        let usage = parsed.usage.map(|u| ExecutionUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        let output_state = json!({
            "node_type": request.node_type,
            "raw_output": text,
            "structured_output": { "text": text },
        });

        let mut result = ExecutionResult::success(started_at, output_state, Value::Object(Default::default()));
        result.provider_metadata = json!({ "executor_provider": self.config.provider_name });
        result.usage = usage;
        Ok(result)
    }
}

fn classified_failure(started_at: chrono::DateTime<Utc>, category: ApiFailureCategory, message: String) -> ExecutionResult {
    let mut result = ExecutionResult::failed(
        started_at,
        ExecutionError {
            code: category.as_str().to_string(),
            message,
            retryable: true,
        },
    );
    result.provider_metadata = json!({ "api_failure_category": category.as_str() });
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_auth_status_codes() {
        assert_eq!(
            FrontierAdapter::classify_status_error(reqwest::StatusCode::UNAUTHORIZED),
            ApiFailureCategory::Auth
        );
        assert_eq!(
            FrontierAdapter::classify_status_error(reqwest::StatusCode::FORBIDDEN),
            ApiFailureCategory::Auth
        );
    }

    #[test]
    fn classifies_rate_limit_as_timeout_category() {
        assert_eq!(
            FrontierAdapter::classify_status_error(reqwest::StatusCode::TOO_MANY_REQUESTS),
            ApiFailureCategory::Timeout
        );
    }

    #[test]
    #[should_panic(expected = "refusing to shell out")]
    fn constructor_rejects_cli_binary_name() {
        let config = FrontierConfig::new("claude", "https://example.invalid", "key");
        let _ = FrontierAdapter::new(config);
    }
}
