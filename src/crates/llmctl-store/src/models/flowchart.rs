//! Flowchart definition entities: the graph shape a run executes against.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flowchart {
    pub id: Uuid,
    pub name: String,
    pub version: i64,
}

/// The five node kinds a flowchart can route through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Task,
    Decision,
    Memory,
    Rag,
    Skill,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartNode {
    pub id: Uuid,
    pub flowchart_id: Uuid,
    pub node_type: NodeType,
    /// Points at the AgentTask/Skill/RAGCollection this node dispatches to.
    pub ref_id: Option<Uuid>,
    pub config: Value,
}

impl FlowchartNode {
    /// Node priority for scheduler tie-breaking (lower runs first).
    /// Read from `config.priority`, defaulting to 0 when absent or not an
    /// integer.
    pub fn priority(&self) -> i64 {
        self.config
            .get("priority")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    /// `on_no_match` handling for decision nodes (spec §4.6): `complete_ok`
    /// ends the branch successfully instead of failing the run.
    pub fn on_no_match_complete_ok(&self) -> bool {
        self.config
            .get("on_no_match")
            .and_then(Value::as_str)
            .map(|s| s == "complete_ok")
            .unwrap_or(false)
    }

    pub fn timeout_seconds(&self) -> Option<u64> {
        self.config.get("timeout_seconds").and_then(Value::as_u64)
    }
}

/// Directed edge between two nodes. `connector_id` is the label the
/// decision node's `matched_connector_ids` reference; `None` marks an
/// unconditional fan-out edge for non-decision node types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartConnector {
    pub id: Uuid,
    pub flowchart_id: Uuid,
    pub from_node: Uuid,
    pub to_node: Uuid,
    pub connector_id: Option<String>,
    pub condition_text: Option<String>,
    /// Distinguishes the `else` connector a decision node falls back to
    /// when no condition matched.
    pub is_else: bool,
    /// Allows a cycle through this edge, bounded by the given count.
    pub iteration_limit: Option<u32>,
    /// A "suppress" connector blocks readiness on its target even when it
    /// does not fire a normal match (spec §4.6 step 3).
    pub is_suppress: bool,
}
