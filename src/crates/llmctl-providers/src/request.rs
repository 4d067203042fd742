//! Execution request/result shapes shared by every provider adapter.
//!
//! Grounded on `original_source` `app/llmctl-studio/src/services/execution/
//! contracts.py`'s `ExecutionRequest`/`ExecutionResult` dataclasses (full
//! source read; the Python module itself was filtered out of the retrieval
//! pack but the call site in `workspace_executor.py` pins the field shapes
//! used here), generalized from "workspace/docker/kubernetes provider"
//! selection to a frontier-vs-local provider split.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const EXECUTION_CONTRACT_VERSION: &str = "v1";

/// Which provider family a node has selected, and which one actually ran
/// (they differ only during fallback, never via CLI-binary substitution —
/// see [`crate::guardrail`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderChoice {
    Frontier,
    Local,
}

/// Dispatch lifecycle: `dispatch_pending -> dispatch_submitted ->
/// dispatch_confirmed` or `-> dispatch_failed` or `-> fallback_started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    DispatchPending,
    DispatchSubmitted,
    DispatchConfirmed,
    DispatchFailed,
    FallbackStarted,
}

/// The classified external failure categories the dispatch router matches
/// on when deciding whether a retry or fallback is warranted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFailureCategory {
    Timeout,
    ProviderUnavailable,
    Auth,
}

impl ApiFailureCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiFailureCategory::Timeout => "provider_timeout",
            ApiFailureCategory::ProviderUnavailable => "provider_unavailable",
            ApiFailureCategory::Auth => "provider_auth",
        }
    }
}

/// Model selection/generation parameters forwarded to the adapter. Kept
/// provider-agnostic; adapters translate it to their own wire shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

/// Everything an adapter needs to execute one node attempt. One
/// `ExecutionRequest` corresponds to exactly one `NodeRun`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub node_id: Uuid,
    pub node_type: String,
    pub node_config: Value,
    pub input_context: Value,
    pub execution_id: String,
    pub provider_choice: ProviderChoice,
    /// MCP server configs keyed by server_key, already normalized to the
    /// plain-object shape by `llmctl-engine::mcp`.
    pub mcp_configs: HashMap<String, Value>,
    pub env: HashMap<String, String>,
    pub model_config: ModelConfig,
    pub workspace_identity: String,
    /// Minted before the external call is issued; `None` only before the
    /// router has chosen a dispatch id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_dispatch_id: Option<String>,
}

impl ExecutionRequest {
    pub fn run_metadata_payload(&self) -> Value {
        serde_json::json!({
            "selected_provider": self.provider_choice,
            "provider_dispatch_id": self.provider_dispatch_id,
            "workspace_identity": self.workspace_identity,
        })
    }
}

/// Structured error surfaced on a failed `ExecutionResult`, mirroring the
/// `{code, message, retryable}` shape `llmctl_core::EngineError` also
/// carries (kept as plain fields here rather than a shared type since
/// providers don't depend on the engine's error enum, only its string
/// contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Token usage reported by the call, carried over from `contracts.py`'s
/// `usage` field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// What an adapter returns for one dispatch attempt. Maps directly onto
/// `NodeRun`'s persisted fields (`llmctl-engine::noderun` is the only
/// caller that writes it to the store).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub contract_version: String,
    pub status: ExecutionStatus,
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stdout: String,
    pub stderr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub provider_metadata: Value,
    pub output_state: Value,
    pub routing_state: Value,
    pub run_metadata: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ExecutionUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

impl ExecutionResult {
    pub fn success(started_at: DateTime<Utc>, output_state: Value, routing_state: Value) -> Self {
        Self {
            contract_version: EXECUTION_CONTRACT_VERSION.to_string(),
            status: ExecutionStatus::Success,
            exit_code: 0,
            started_at,
            finished_at: Utc::now(),
            stdout: String::new(),
            stderr: String::new(),
            error: None,
            provider_metadata: Value::Object(Default::default()),
            output_state,
            routing_state,
            run_metadata: Value::Object(Default::default()),
            usage: None,
            artifacts: None,
            warnings: None,
        }
    }

    pub fn failed(started_at: DateTime<Utc>, error: ExecutionError) -> Self {
        Self {
            contract_version: EXECUTION_CONTRACT_VERSION.to_string(),
            status: ExecutionStatus::Failed,
            exit_code: 1,
            started_at,
            finished_at: Utc::now(),
            stdout: String::new(),
            stderr: String::new(),
            error: Some(error),
            provider_metadata: Value::Object(Default::default()),
            output_state: Value::Object(Default::default()),
            routing_state: Value::Object(Default::default()),
            run_metadata: Value::Object(Default::default()),
            usage: None,
            artifacts: None,
            warnings: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Success)
    }
}
