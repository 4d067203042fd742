//! Flowchart-definition compatibility gate: the thing
//! `migrate-flowchart-runtime-schema` actually runs.
//!
//! Grounded on `scripts/migrate_flowchart_runtime_schema.py`'s call into
//! `run_flowchart_schema_migration` — that function's body isn't in reach
//! here, so this reconstructs its contract from the call site's output
//! shape (`flowchart_count`, `changed_count`, `blocked_count`,
//! `applied_count`) and from spec.md §7's `compatibility_blocked` error
//! code, the way `instructions.rs`'s compiler was rebuilt from its own
//! call sites in the same script family.
//!
//! Two checks run per flowchart:
//! - a connector referencing a `from_node`/`to_node` not present in the
//!   flowchart's own node set is a dangling reference. In strict mode
//!   (the default) this blocks the flowchart; `--non-strict-policy`
//!   downgrades it to a warning so the run can proceed degraded.
//! - a decision node with no `on_no_match` key in its config is missing
//!   an explicit no-match policy; this is always auto-backfilled to
//!   `"fail"` (the scheduler's existing default, spec.md §4.6) and
//!   counted as a change rather than a block, since it changes nothing
//!   observable about how the node already behaves.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

use llmctl_store::kinds;
use llmctl_store::models::flowchart::{FlowchartConnector, FlowchartNode, NodeType};
use llmctl_store::{Query, Store, StoreExt};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartMigrationFinding {
    pub flowchart_id: Uuid,
    pub kind: FindingKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    DanglingConnectorBlocked,
    DanglingConnectorWarning,
    OnNoMatchBackfilled,
}

/// One flowchart's migration outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowchartMigrationOutcome {
    pub flowchart_id: Uuid,
    pub blocked: bool,
    pub changed: bool,
    pub applied: bool,
    pub findings: Vec<FlowchartMigrationFinding>,
}

/// Aggregate report across every flowchart considered, matching the four
/// counters the Python script prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub flowchart_count: usize,
    pub changed_count: usize,
    pub blocked_count: usize,
    pub applied_count: usize,
    pub outcomes: Vec<FlowchartMigrationOutcome>,
}

impl MigrationReport {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("MigrationReport always serializes")
    }
}

/// Runs the compatibility gate over `flowchart_ids` (every flowchart in
/// the store if empty), optionally persisting the `on_no_match`
/// backfill when `apply` is true. `strict_policy` controls whether a
/// dangling connector blocks the flowchart or only warns.
pub async fn run_flowchart_schema_migration(
    store: &dyn Store,
    flowchart_ids: &[Uuid],
    apply: bool,
    strict_policy: bool,
) -> Result<MigrationReport> {
    let ids = if flowchart_ids.is_empty() {
        all_flowchart_ids(store).await?
    } else {
        flowchart_ids.to_vec()
    };

    let mut outcomes = Vec::with_capacity(ids.len());
    for flowchart_id in ids {
        outcomes.push(migrate_one(store, flowchart_id, apply, strict_policy).await?);
    }

    let changed_count = outcomes.iter().filter(|o| o.changed).count();
    let blocked_count = outcomes.iter().filter(|o| o.blocked).count();
    let applied_count = outcomes.iter().filter(|o| o.applied).count();

    Ok(MigrationReport {
        flowchart_count: outcomes.len(),
        changed_count,
        blocked_count,
        applied_count,
        outcomes,
    })
}

async fn all_flowchart_ids(store: &dyn Store) -> Result<Vec<Uuid>> {
    let flowcharts: Vec<llmctl_store::models::flowchart::Flowchart> =
        store.find(kinds::FLOWCHART, &Query::new()).await?;
    Ok(flowcharts.into_iter().map(|f| f.id).collect())
}

async fn migrate_one(
    store: &dyn Store,
    flowchart_id: Uuid,
    apply: bool,
    strict_policy: bool,
) -> Result<FlowchartMigrationOutcome> {
    let nodes: Vec<FlowchartNode> = store
        .find(kinds::FLOWCHART_NODE, &Query::new().eq("flowchart_id", flowchart_id))
        .await?;
    let connectors: Vec<FlowchartConnector> = store
        .find(kinds::FLOWCHART_CONNECTOR, &Query::new().eq("flowchart_id", flowchart_id))
        .await?;

    let node_ids: HashSet<Uuid> = nodes.iter().map(|n| n.id).collect();
    let mut findings = Vec::new();

    for connector in &connectors {
        if !node_ids.contains(&connector.from_node) || !node_ids.contains(&connector.to_node) {
            let detail = format!(
                "connector {} references a node outside flowchart {flowchart_id} (from={}, to={})",
                connector.id, connector.from_node, connector.to_node
            );
            findings.push(FlowchartMigrationFinding {
                flowchart_id,
                kind: if strict_policy {
                    FindingKind::DanglingConnectorBlocked
                } else {
                    FindingKind::DanglingConnectorWarning
                },
                detail,
            });
        }
    }

    let blocked = strict_policy
        && findings
            .iter()
            .any(|f| f.kind == FindingKind::DanglingConnectorBlocked);

    let mut backfill_targets = Vec::new();
    if !blocked {
        for node in &nodes {
            if node.node_type == NodeType::Decision && node.config.get("on_no_match").is_none() {
                findings.push(FlowchartMigrationFinding {
                    flowchart_id,
                    kind: FindingKind::OnNoMatchBackfilled,
                    detail: format!("decision node {} missing on_no_match, backfilling \"fail\"", node.id),
                });
                backfill_targets.push(node.clone());
            }
        }
    }

    let changed = !backfill_targets.is_empty();
    let mut applied = false;

    if apply && !blocked && changed {
        for mut node in backfill_targets {
            if let Some(obj) = node.config.as_object_mut() {
                obj.insert("on_no_match".to_string(), json!("fail"));
            }
            store.update(kinds::FLOWCHART_NODE, &node.id.to_string(), &node).await?;
        }
        applied = true;
    }

    Ok(FlowchartMigrationOutcome {
        flowchart_id,
        blocked,
        changed,
        applied,
        findings,
    })
}
