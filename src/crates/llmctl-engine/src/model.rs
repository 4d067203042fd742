//! Engine-level view of the entity model.
//!
//! The entities themselves (`Flowchart`, `FlowchartNode`, `FlowchartConnector`,
//! `FlowchartRun`, `NodeRun`, `NodeArtifact`, `Agent`, `ScriptAttachment`,
//! `MCPServer`, `RAGCollection`, `ChatThread`, `ChatMessage`) are defined in
//! `llmctl_store::models` since the store needs them to implement `Store`'s
//! typed accessors; this module re-exports them so engine code reads
//! `llmctl_engine::model::NodeRun` rather than reaching into the store
//! crate, and adds the handful of types that only exist inside a running
//! scheduler (readiness bookkeeping, ready-queue entries) with no
//! persisted counterpart.

pub use llmctl_store::models::agent::{Agent, ScriptAttachment};
pub use llmctl_store::models::chat::{ChatMessage, ChatThread};
pub use llmctl_store::models::flowchart::{Flowchart, FlowchartConnector, FlowchartNode, NodeType};
pub use llmctl_store::models::mcp::MCPServer;
pub use llmctl_store::models::rag::{CollectionHealth, RAGCollection};
pub use llmctl_store::models::run::{
    ArtifactType, ConnectorEvaluation, FlowchartRun, NodeArtifact, NodeRun, NodeRunError,
    NodeRunStatus, RoutingState, RunStatus,
};

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Per-run readiness bookkeeping: which inbound connectors have fired for a
/// node this run. Kept per-run rather than as global mutable state (spec.md
/// §9 redesign flag), so two runs of the same flowchart never interfere.
#[derive(Debug, Clone, Default)]
pub struct ConnectorFireSet {
    pub fired_connector_ids: HashSet<Uuid>,
    pub suppressed: bool,
}

/// Tracks readiness and cycle counts for one in-flight `FlowchartRun`.
/// Lives only in the scheduler's working memory for the duration of a run;
/// nothing here is persisted directly. A restarted process does not resume
/// this bookkeeping — it checks `llmctl-engine::scheduler::is_run_terminal`
/// against persisted `NodeRun` history instead.
#[derive(Debug, Clone, Default)]
pub struct RunReadinessState {
    pub fired: HashMap<Uuid, ConnectorFireSet>,
    pub iteration_counts: HashMap<Uuid, u32>,
}

impl RunReadinessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_fire(&mut self, to_node: Uuid, connector_id: Uuid, is_suppress: bool) {
        let entry = self.fired.entry(to_node).or_default();
        if is_suppress {
            entry.suppressed = true;
        } else {
            entry.fired_connector_ids.insert(connector_id);
        }
    }

    pub fn increment_iteration(&mut self, node_id: Uuid) -> u32 {
        let counter = self.iteration_counts.entry(node_id).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// One entry in the scheduler's ready queue: lower priority value runs
/// first, ties broken by ascending `node_id` (spec.md §4.6 ordering rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyQueueEntry {
    pub priority: i64,
    pub node_id: Uuid,
}

impl Ord for ReadyQueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for ReadyQueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
