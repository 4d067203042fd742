//! Local runner adapter, grounded on `llm::local::ollama::OllamaClient`'s
//! HTTP client shape (`/api/chat`, `/api/tags` health probe), generalized
//! to the flowchart engine's `ExecutionRequest`/`ExecutionResult` contract.

use async_trait::async_trait;
use chrono::Utc;
use llmctl_core::{EngineError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapter::ProviderAdapter;
use crate::guardrail::assert_not_cli_binary;
use crate::request::{ExecutionError, ExecutionRequest, ExecutionResult, ExecutionUsage};

/// Endpoint configuration for a local model runner (Ollama, llama.cpp
/// server, LM Studio — all speak a compatible `/api/chat`-style surface).
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub runner_name: &'static str,
    pub base_url: String,
    pub timeout: Duration,
}

impl LocalConfig {
    pub fn new(runner_name: &'static str, base_url: impl Into<String>) -> Self {
        Self {
            runner_name,
            base_url: base_url.into(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Serialize)]
struct LocalChatBody<'a> {
    model: &'a str,
    messages: Vec<LocalMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocalMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct LocalChatResponse {
    message: LocalMessage,
    #[serde(default)]
    prompt_eval_count: Option<usize>,
    #[serde(default)]
    eval_count: Option<usize>,
}

/// Adapter for a locally hosted model runner. Distinguished from
/// [`crate::frontier::FrontierAdapter`] by its health probe: a stopped
/// local server is `provider_unavailable` before a single request is even
/// attempted, where a frontier provider only learns that from a failed call.
pub struct LocalAdapter {
    config: LocalConfig,
    client: Client,
}

impl LocalAdapter {
    pub fn new(config: LocalConfig) -> Self {
        assert_not_cli_binary(config.runner_name);
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build local runner HTTP client");
        Self { config, client }
    }

    fn build_body<'a>(&self, request: &'a ExecutionRequest, prompt: &'a str) -> LocalChatBody<'a> {
        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.model_config.temperature {
            options.insert("temperature".to_string(), json!(temperature));
        }
        LocalChatBody {
            model: &request.model_config.model,
            messages: vec![LocalMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: false,
            options: if options.is_empty() { None } else { Some(Value::Object(options)) },
        }
    }
}

#[async_trait]
impl ProviderAdapter for LocalAdapter {
    fn name(&self) -> &'static str {
        self.config.runner_name
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        let started_at = Utc::now();

        if !self.is_available().await {
            warn!(runner = self.config.runner_name, "local runner unreachable before dispatch");
            return Ok(ExecutionResult::failed(
                started_at,
                ExecutionError {
                    code: "provider_unavailable".to_string(),
                    message: format!("local runner '{}' did not respond to health probe", self.config.runner_name),
                    retryable: true,
                },
            ));
        }

        let prompt = request
            .input_context
            .get("user_request")
            .and_then(Value::as_str)
            .unwrap_or_default();

        debug!(runner = self.config.runner_name, node_id = %request.node_id, "dispatching local request");

        let body = self.build_body(&request, prompt);
        let response = self
            .client
            .post(format!("{}/api/chat", self.config.base_url))
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(resp) => resp,
            Err(err) => {
                let category = if err.is_timeout() { "provider_timeout" } else { "provider_unavailable" };
                warn!(runner = self.config.runner_name, category, "local runner transport error");
                return Ok(ExecutionResult::failed(
                    started_at,
                    ExecutionError {
                        code: category.to_string(),
                        message: err.to_string(),
                        retryable: true,
                    },
                ));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Ok(ExecutionResult::failed(
                started_at,
                ExecutionError {
                    code: "provider_unavailable".to_string(),
                    message: format!("local runner returned {status}: {body_text}"),
                    retryable: true,
                },
            ));
        }

        let parsed: LocalChatResponse = response
            .json()
            .await
            .map_err(|err| EngineError::internal(format!("invalid local runner response body: {err}")))?;

        let usage = if parsed.prompt_eval_count.is_some() || parsed.eval_count.is_some() {
            let input = parsed.prompt_eval_count.unwrap_or(0);
            let output = parsed.eval_count.unwrap_or(0);
            Some(ExecutionUsage {
                input_tokens: input,
                output_tokens: output,
                total_tokens: input + output,
            })
        } else {
            None
        };

        let output_state = json!({
            "node_type": request.node_type,
            "raw_output": parsed.message.content,
            "structured_output": { "text": parsed.message.content },
        });

        let mut result = ExecutionResult::success(started_at, output_state, Value::Object(Default::default()));
        result.provider_metadata = json!({ "executor_provider": self.config.runner_name });
        result.usage = usage;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "refusing to shell out")]
    fn constructor_rejects_cli_binary_name() {
        let config = LocalConfig::new("gemini", "http://localhost:11434");
        let _ = LocalAdapter::new(config);
    }

    #[test]
    fn builds_options_only_when_temperature_present() {
        let config = LocalConfig::new("ollama", "http://localhost:11434");
        let client = Client::builder().build().unwrap();
        let adapter = LocalAdapter { config, client };

        let mut request = sample_request();
        request.model_config.temperature = None;
        let body = adapter.build_body(&request, "hi");
        assert!(body.options.is_none());

        request.model_config.temperature = Some(0.5);
        let body = adapter.build_body(&request, "hi");
        assert!(body.options.is_some());
    }

    fn sample_request() -> ExecutionRequest {
        use crate::request::{ModelConfig, ProviderChoice};
        use std::collections::HashMap;
        use uuid::Uuid;

        ExecutionRequest {
            node_id: Uuid::nil(),
            node_type: "task".to_string(),
            node_config: Value::Object(Default::default()),
            input_context: json!({ "user_request": "hi" }),
            execution_id: "exec-1".to_string(),
            provider_choice: ProviderChoice::Local,
            mcp_configs: HashMap::new(),
            env: HashMap::new(),
            model_config: ModelConfig {
                model: "llama3".to_string(),
                temperature: None,
                max_tokens: None,
            },
            workspace_identity: "workspace-1".to_string(),
            provider_dispatch_id: None,
        }
    }
}
