//! Node execution runtime: dispatches one node attempt through a provider
//! adapter and persists the resulting `NodeRun`/`NodeArtifact` pair.
//!
//! Grounded on `orchestrator::executor::llm_executor::LlmTaskExecutor`
//! (prompt-building/dispatch shape) and `original_source`
//! `services/execution/{contracts,idempotency,agent_info}.py` +
//! `core/{prompt_envelope,quick_node}.py` (idempotent dispatch, prompt
//! envelope construction, quick-node fallback), generalized from the
//! teacher's single always-LLM task shape to the five flowchart node
//! types and the idempotent, workspace-scoped dispatch contract spec.md
//! §4.5 describes.

pub mod idempotency;
pub mod quick;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use llmctl_providers::{ExecutionRequest, ExecutionResult, ExecutionStatus, ModelConfig, ProviderAdapter, ProviderChoice};
use llmctl_store::{kinds, Store, StoreExt, StoreSessionExt};

use crate::error::Result;
use crate::model::{Agent, ConnectorEvaluation, FlowchartNode, NodeArtifact, NodeRun, NodeRunError, NodeRunStatus, NodeType, RoutingState};
use crate::router::DispatchRouter;
use crate::workspace::{self, AgentInfo, WorkspaceGuard};

use idempotency::DispatchRegistry;

/// A claimed `(run_id, node_id, execution_index)` dispatch, persisted
/// through the generic [`Store`] as just another entity kind rather than
/// a backend-specific table, so `noderun` stays independent of which
/// `Store` implementation is in use.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct DispatchKeyRecord {
    run_id: Uuid,
    dispatch_id: String,
    node_run_id: Uuid,
    first_seen_at: chrono::DateTime<Utc>,
}

fn dispatch_record_id(run_id: Uuid, dispatch_id: &str) -> String {
    format!("{run_id}:{dispatch_id}")
}

/// Everything a single node attempt needs beyond what the scheduler
/// already tracks on `FlowchartNode`/`FlowchartRun`.
pub struct NodeDispatchInput<'a> {
    pub run_id: Uuid,
    pub node: &'a FlowchartNode,
    pub execution_index: u32,
    pub bound_agent: Option<&'a Agent>,
    pub raw_prompt: Option<&'a str>,
    pub provider_choice: ProviderChoice,
    pub model_config: ModelConfig,
    pub mcp_configs: HashMap<String, Value>,
    pub env: HashMap<String, String>,
    pub workspaces_root: &'a Path,
}

/// Ties workspace acquisition, prompt envelope construction, provider
/// dispatch, and idempotent persistence together for one node attempt.
pub struct NodeDispatcher {
    store: Arc<dyn Store>,
    registry: DispatchRegistry,
    router: DispatchRouter,
}

impl NodeDispatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let router = DispatchRouter::new(store.clone());
        Self { store, registry: DispatchRegistry::new(), router }
    }

    /// Dispatches one node attempt. A duplicate dispatch — the same
    /// `(run_id, node_id, execution_index)` claimed twice, whether by a
    /// concurrent in-process retry or a replay after restart — returns the
    /// already-recorded `NodeRun` rather than re-executing the adapter.
    pub async fn dispatch(&self, adapter: &dyn ProviderAdapter, input: NodeDispatchInput<'_>) -> Result<NodeRun> {
        let dispatch_id = format!("node:{}:execution:{}", input.node.id, input.execution_index);

        if let Some(existing) = self.lookup_existing(input.run_id, &dispatch_id).await? {
            return Ok(existing);
        }
        if !self.registry.register(&input.run_id.to_string(), &dispatch_id) {
            return Ok(self.duplicate_node_run(input.run_id, input.node.id, input.execution_index));
        }

        let guard = WorkspaceGuard::acquire(input.workspaces_root, input.run_id, input.node.id, input.execution_index)?;
        let workspace_identity = guard.path().display().to_string();

        let agent_info = input
            .bound_agent
            .map(AgentInfo::from_agent)
            .unwrap_or_else(quick::fallback_agent_info);
        let system_contract = input
            .bound_agent
            .map(|agent| json!({"role": {"description": agent.markdown}}))
            .unwrap_or_else(quick::fallback_system_contract);

        let (user_request, source_payload) = workspace::parse_prompt_input(input.raw_prompt);
        let envelope = workspace::build_prompt_envelope(
            &user_request,
            system_contract.as_object(),
            Some(&agent_profile_map(&agent_info)),
            None,
            None,
            source_payload.as_ref(),
        );

        let started_at = Utc::now();
        let node_type = input.node.node_type;
        let on_no_match_complete_ok = input.node.on_no_match_complete_ok();
        let request = ExecutionRequest {
            node_id: input.node.id,
            node_type: format!("{:?}", node_type).to_lowercase(),
            node_config: input.node.config.clone(),
            input_context: envelope,
            execution_id: input.run_id.to_string(),
            provider_choice: input.provider_choice,
            mcp_configs: input.mcp_configs,
            env: input.env,
            model_config: input.model_config,
            workspace_identity: workspace_identity.clone(),
            provider_dispatch_id: Some(dispatch_id.clone()),
        };

        let result = self.router.dispatch(adapter, request).await?;
        let node_run = self
            .persist(
                input.run_id,
                input.node.id,
                input.execution_index,
                node_type,
                on_no_match_complete_ok,
                &dispatch_id,
                started_at,
                result,
            )
            .await?;

        drop(guard);
        Ok(node_run)
    }

    async fn lookup_existing(&self, run_id: Uuid, dispatch_id: &str) -> Result<Option<NodeRun>> {
        let record_id = dispatch_record_id(run_id, dispatch_id);
        let Some(record) = self.store.get::<DispatchKeyRecord>(kinds::DISPATCH_KEY, &record_id).await? else {
            return Ok(None);
        };
        let node_run = self.store.get::<NodeRun>(kinds::NODE_RUN, &record.node_run_id.to_string()).await?;
        Ok(node_run)
    }

    fn duplicate_node_run(&self, run_id: Uuid, node_id: Uuid, execution_index: u32) -> NodeRun {
        let mut node_run = NodeRun::new(run_id, node_id, execution_index);
        node_run.status = NodeRunStatus::Failed;
        node_run.error = Some(NodeRunError {
            kind: llmctl_core::EngineErrorCode::DispatchError,
            message: "duplicate dispatch detected for this node run; refusing to execute twice".to_string(),
            retryable: false,
        });
        node_run
    }

    async fn persist(
        &self,
        run_id: Uuid,
        node_id: Uuid,
        execution_index: u32,
        node_type: NodeType,
        on_no_match_complete_ok: bool,
        dispatch_id: &str,
        started_at: chrono::DateTime<Utc>,
        result: ExecutionResult,
    ) -> Result<NodeRun> {
        let mut node_run = NodeRun::new(run_id, node_id, execution_index);
        node_run.started_at = Some(started_at);
        node_run.finished_at = Some(result.finished_at);
        node_run.exit_code = Some(result.exit_code);
        node_run.provider_metadata = result.provider_metadata.clone();
        node_run.stdout = if result.stdout.is_empty() { None } else { Some(result.stdout.clone()) };
        node_run.stderr = if result.stderr.is_empty() { None } else { Some(result.stderr.clone()) };

        let (degraded, degraded_reason) = classify_degradation(&result.run_metadata, &result.provider_metadata);
        node_run.degraded = degraded;
        node_run.degraded_reason = degraded_reason;

        match result.status {
            ExecutionStatus::Success => {
                node_run.status = NodeRunStatus::Succeeded;
            }
            ExecutionStatus::Failed => {
                node_run.status = NodeRunStatus::Failed;
                node_run.error = result.error.map(|e| NodeRunError {
                    kind: parse_error_code(&e.code),
                    message: e.message,
                    retryable: e.retryable,
                });
            }
        }

        // Decision nodes must ship a well-formed `routing_state`; the
        // scheduler refuses to route on anything else (spec §3 invariant,
        // §8 boundary case: empty `matched_connector_ids` with
        // `no_match=false` is never valid — a node cannot both fail to
        // match and decline to declare that it didn't).
        if node_type == NodeType::Decision && node_run.status != NodeRunStatus::Failed {
            match parse_routing_state(&result.routing_state) {
                Ok(mut routing_state) => {
                    // `on_no_match=complete_ok` branches end successfully rather
                    // than failing the run; the scheduler reads `route_key` to
                    // tell this apart from an ordinary matched route (spec §8
                    // boundary case).
                    if routing_state.no_match && routing_state.matched_connector_ids.is_empty() && on_no_match_complete_ok {
                        routing_state.route_key = Some("__no_match__".to_string());
                    }
                    node_run.routing_state = Some(routing_state);
                }
                Err(message) => {
                    node_run.status = NodeRunStatus::Failed;
                    node_run.error = Some(NodeRunError {
                        kind: llmctl_core::EngineErrorCode::ValidationError,
                        message,
                        retryable: false,
                    });
                }
            }
        }

        let node_run_id = node_run.id;
        let artifact = build_artifact(node_type, &node_run, &result);

        let record = DispatchKeyRecord {
            run_id,
            dispatch_id: dispatch_id.to_string(),
            node_run_id,
            first_seen_at: Utc::now(),
        };
        let record_id = dispatch_record_id(run_id, dispatch_id);

        let store = self.store.clone();
        let node_run_for_tx = node_run.clone();
        store
            .execute_atomic(Box::new(move |session| {
                Box::pin(async move {
                    session.insert(kinds::DISPATCH_KEY, &record_id, &record).await?;
                    session.insert(kinds::NODE_RUN, &node_run_for_tx.id.to_string(), &node_run_for_tx).await?;
                    if let Some(artifact) = &artifact {
                        session.insert(kinds::NODE_ARTIFACT, &artifact.id.to_string(), artifact).await?;
                    }
                    Ok(())
                })
            }))
            .await?;

        Ok(node_run)
    }
}

fn agent_profile_map(info: &AgentInfo) -> Map<String, Value> {
    info.to_payload().as_object().cloned().unwrap_or_default()
}

/// Precedence from spec.md §7: an explicit fallback reason wins over a
/// deterministic-fallback marker, which wins over a bare API failure
/// category — each is a weaker signal than the one before it.
fn classify_degradation(run_metadata: &Value, provider_metadata: &Value) -> (bool, Option<String>) {
    if let Some(reason) = run_metadata.get("fallback_reason").and_then(Value::as_str) {
        return (true, Some(reason.to_string()));
    }
    if run_metadata.get("deterministic_fallback_used").and_then(Value::as_bool).unwrap_or(false) {
        return (true, Some("deterministic_fallback_used".to_string()));
    }
    if let Some(category) = provider_metadata.get("api_failure_category").and_then(Value::as_str) {
        return (true, Some(category.to_string()));
    }
    (false, None)
}

fn parse_error_code(code: &str) -> llmctl_core::EngineErrorCode {
    use llmctl_core::EngineErrorCode::*;
    match code {
        "validation_error" => ValidationError,
        "dispatch_error" => DispatchError,
        "provider_timeout" => ProviderTimeout,
        "provider_unavailable" => ProviderUnavailable,
        "provider_auth" => ProviderAuth,
        "decision_no_match" => DecisionNoMatch,
        "iteration_limit_exceeded" => IterationLimitExceeded,
        "storage_conflict" => StorageConflict,
        "compatibility_blocked" => CompatibilityBlocked,
        _ => InternalError,
    }
}

/// Parses an adapter's `routing_state` JSON into the typed shape the
/// scheduler consumes, enforcing spec §8's boundary rule: empty
/// `matched_connector_ids` with `no_match=false` is never valid — a
/// decision node cannot both fail to match anything and decline to say
/// so.
fn parse_routing_state(raw: &Value) -> std::result::Result<RoutingState, String> {
    let matched_connector_ids: Vec<String> = raw
        .get("matched_connector_ids")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let no_match = raw.get("no_match").and_then(Value::as_bool).unwrap_or(false);
    let evaluations = raw
        .get("evaluations")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|entry| {
                    let connector_id = entry.get("connector_id")?.as_str()?.to_string();
                    let matched = entry.get("matched").and_then(Value::as_bool).unwrap_or(false);
                    let detail = entry
                        .get("reason")
                        .or_else(|| entry.get("detail"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    Some(ConnectorEvaluation { connector_id, matched, detail })
                })
                .collect()
        })
        .unwrap_or_default();

    if matched_connector_ids.is_empty() && !no_match {
        return Err(
            "decision node routing_state has empty matched_connector_ids but no_match=false; \
             a decision must either match a connector or declare no_match=true"
                .to_string(),
        );
    }

    Ok(RoutingState {
        matched_connector_ids,
        evaluations,
        no_match,
        route_key: None,
    })
}

fn build_artifact(node_type: NodeType, node_run: &NodeRun, result: &ExecutionResult) -> Option<NodeArtifact> {
    let payload = result.artifacts.clone().unwrap_or_else(|| result.output_state.clone());
    if payload.is_null() || (payload.is_object() && payload.as_object().map(Map::is_empty).unwrap_or(false)) {
        return None;
    }
    let artifact_type = match node_type {
        NodeType::Task => crate::model::ArtifactType::Task,
        NodeType::Decision => crate::model::ArtifactType::Decision,
        NodeType::Memory => crate::model::ArtifactType::Memory,
        NodeType::Rag => crate::model::ArtifactType::Rag,
        NodeType::Skill => crate::model::ArtifactType::Plan,
    };
    Some(NodeArtifact::new(node_run.id, node_run.run_id, artifact_type, payload))
}
