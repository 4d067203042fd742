//! Run-time entities: one `FlowchartRun` per execution, one `NodeRun` per
//! node attempt, zero or more `NodeArtifact`s per `NodeRun`.

use chrono::{DateTime, Utc};
use llmctl_core::EngineErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartRun {
    pub id: Uuid,
    pub flowchart_id: Uuid,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub initiator: String,
}

impl FlowchartRun {
    pub fn new(flowchart_id: Uuid, initiator: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            flowchart_id,
            status: RunStatus::Queued,
            started_at: None,
            finished_at: None,
            initiator: initiator.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Pending,
    Queued,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeRunStatus::Succeeded | NodeRunStatus::Failed | NodeRunStatus::Skipped
        )
    }
}

/// NodeRun.error: the stable code plus a message, mirroring
/// `llmctl_core::EngineError` but persisted rather than propagated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunError {
    pub kind: EngineErrorCode,
    pub message: String,
    pub retryable: bool,
}

/// Decision-node routing outcome: which outgoing connectors fired, and the
/// per-connector evaluation trail the scheduler consults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingState {
    pub matched_connector_ids: Vec<String>,
    pub evaluations: Vec<ConnectorEvaluation>,
    pub no_match: bool,
    /// Set to `"__no_match__"` when an `on_no_match=complete_ok` node ends
    /// its branch without matching any connector (spec §8 boundary case).
    pub route_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorEvaluation {
    pub connector_id: String,
    pub matched: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRun {
    pub id: Uuid,
    pub run_id: Uuid,
    pub node_id: Uuid,
    /// Monotonic per `(run_id, node_id)`, starting at 1. Retries create new
    /// rows; historical NodeRuns are never mutated.
    pub execution_index: u32,
    pub status: NodeRunStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<NodeRunError>,
    pub provider_metadata: Value,
    pub routing_state: Option<RoutingState>,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
    /// Set by the scheduler when a run is cancelled while this NodeRun was
    /// still executing: the run stopped enqueuing new work but let this
    /// attempt finish (or time out) rather than tearing it down mid-flight.
    #[serde(default)]
    pub cancelled_during_flight: bool,
}

impl NodeRun {
    pub fn new(run_id: Uuid, node_id: Uuid, execution_index: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            node_id,
            execution_index,
            status: NodeRunStatus::Pending,
            stdout: None,
            stderr: None,
            exit_code: None,
            started_at: None,
            finished_at: None,
            error: None,
            provider_metadata: Value::Object(Default::default()),
            routing_state: None,
            degraded: false,
            degraded_reason: None,
            cancelled_during_flight: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Plan,
    Task,
    Decision,
    Memory,
    Rag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeArtifact {
    pub id: Uuid,
    pub node_run_id: Uuid,
    pub artifact_type: ArtifactType,
    pub payload: Value,
    /// `flowchart_run:<run>:node_run:<nr>:artifact:<type>`, unique per
    /// `(run, node_run, artifact_type)`.
    pub idempotency_key: String,
}

impl NodeArtifact {
    pub fn idempotency_key(run_id: Uuid, node_run_id: Uuid, artifact_type: ArtifactType) -> String {
        format!(
            "flowchart_run:{run_id}:node_run:{node_run_id}:artifact:{}",
            serde_json::to_value(artifact_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string())
        )
    }

    pub fn new(node_run_id: Uuid, run_id: Uuid, artifact_type: ArtifactType, payload: Value) -> Self {
        let idempotency_key = Self::idempotency_key(run_id, node_run_id, artifact_type);
        Self {
            id: Uuid::new_v4(),
            node_run_id,
            artifact_type,
            payload,
            idempotency_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_matches_spec_format() {
        let run_id = Uuid::nil();
        let node_run_id = Uuid::nil();
        let key = NodeArtifact::idempotency_key(run_id, node_run_id, ArtifactType::Decision);
        assert_eq!(
            key,
            format!("flowchart_run:{run_id}:node_run:{node_run_id}:artifact:decision")
        );
    }

    #[test]
    fn terminal_statuses_are_exactly_the_spec_set() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Queued.is_terminal());
    }
}
