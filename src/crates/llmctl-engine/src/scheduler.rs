//! Flowchart execution scheduler: decides which nodes are ready to run,
//! enqueues them onto the task queue, evaluates decision-node routing
//! outcomes, and drives a `FlowchartRun` to a terminal status.
//!
//! Grounded on `orchestrator::execution::workflow_engine::
//! WorkflowExecutionEngine`'s `parse_definition → find_next_nodes →
//! execute_node` loop, generalized from the teacher's "task/conditional"
//! two-type toy model (an in-memory `current_nodes: Vec<String>` frontier
//! recomputed each pass from static pattern edges) to the five flowchart
//! node types and the full routing/readiness/cycle semantics this engine
//! needs, and made restart-safe: readiness is per-run working memory
//! (`RunReadinessState`, not a global), and every status transition is
//! written through `llmctl-store` the way the teacher's loop calls into
//! `WorkflowRepository` rather than mutating an in-process struct alone.

pub mod retry;

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use llmctl_core::{EngineError, EngineErrorCode};
use llmctl_store::{kinds, Query, Store, StoreExt};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::events::{EngineEvent, EventSink};
use crate::config::QueueName;
use crate::error::Result;
use crate::model::{
    ConnectorFireSet, FlowchartConnector, FlowchartNode, FlowchartRun, NodeRun, NodeRunStatus,
    NodeType, ReadyQueueEntry, RunReadinessState, RunStatus,
};
use crate::queue::{Task, TaskHandler, TaskQueue};

fn internal_error(message: impl Into<String>) -> EngineError {
    EngineError {
        code: EngineErrorCode::InternalError,
        message: message.into(),
        retryable: false,
    }
}

/// Seam between the scheduler and the node execution runtime. The
/// scheduler owns routing and readiness; it has no opinion on how a node
/// actually dispatches (agent binding, provider choice, MCP configs — all
/// `llmctl-engine::noderun` concerns). A production embedder implements
/// this by resolving those inputs and calling `NodeDispatcher::dispatch`;
/// tests implement it directly against scripted results.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, run: &FlowchartRun, node: &FlowchartNode, execution_index: u32) -> Result<NodeRun>;
}

/// Outcome of evaluating one completed node's outgoing routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// These connector ids fire and unblock their targets.
    Fire(Vec<Uuid>),
    /// A decision node's `on_no_match=complete_ok` branch ends here,
    /// successfully, with no downstream connector firing.
    CompleteOk,
    /// A decision node matched nothing, has no `else` connector, and does
    /// not complete ok — the run fails with `decision_no_match`.
    NoMatchFailure,
}

/// Inbound connector ids a node must see fired (excluding suppress edges)
/// before it is ready.
pub fn required_connectors(node_id: Uuid, connectors: &[FlowchartConnector]) -> HashSet<Uuid> {
    connectors
        .iter()
        .filter(|c| c.to_node == node_id && !c.is_suppress)
        .map(|c| c.id)
        .collect()
}

/// Nodes with no inbound connector at all — the run's starting frontier.
pub fn entry_nodes<'a>(nodes: &'a [FlowchartNode], connectors: &[FlowchartConnector]) -> Vec<&'a FlowchartNode> {
    let targets: HashSet<Uuid> = connectors.iter().map(|c| c.to_node).collect();
    nodes.iter().filter(|n| !targets.contains(&n.id)).collect()
}

/// spec.md §4.6 step 3: ready when every inbound matched connector has
/// fired and no inbound suppress connector fired this run.
pub fn node_is_ready(node_id: Uuid, connectors: &[FlowchartConnector], readiness: &RunReadinessState) -> bool {
    let required = required_connectors(node_id, connectors);
    if required.is_empty() {
        return false;
    }
    match readiness.fired.get(&node_id) {
        Some(ConnectorFireSet { fired_connector_ids, suppressed: false }) => required.is_subset(fired_connector_ids),
        _ => false,
    }
}

/// Resolves a completed node's `NodeRun` into the connectors that fire
/// downstream. Task/memory/rag/skill nodes fan out unconditionally;
/// decision nodes follow only `matched_connector_ids`, falling back to the
/// `else` connector or `on_no_match=complete_ok` per spec §4.6 step 2.
pub fn evaluate_routing(
    node: &FlowchartNode,
    node_run: &NodeRun,
    connectors: &[FlowchartConnector],
) -> std::result::Result<RoutingOutcome, EngineError> {
    if node.node_type != NodeType::Decision {
        let fired = connectors.iter().filter(|c| c.from_node == node.id).map(|c| c.id).collect();
        return Ok(RoutingOutcome::Fire(fired));
    }

    let routing_state = node_run
        .routing_state
        .as_ref()
        .ok_or_else(|| internal_error("decision node run is missing routing_state"))?;

    if !routing_state.matched_connector_ids.is_empty() {
        let fired = routing_state
            .matched_connector_ids
            .iter()
            .filter_map(|label| connectors.iter().find(|c| c.from_node == node.id && c.connector_id.as_deref() == Some(label.as_str())))
            .map(|c| c.id)
            .collect();
        return Ok(RoutingOutcome::Fire(fired));
    }

    if let Some(else_connector) = connectors.iter().find(|c| c.from_node == node.id && c.is_else) {
        return Ok(RoutingOutcome::Fire(vec![else_connector.id]));
    }

    if node.on_no_match_complete_ok() {
        return Ok(RoutingOutcome::CompleteOk);
    }

    Ok(RoutingOutcome::NoMatchFailure)
}

/// Pure terminal-status check over a run's graph snapshot and its
/// `NodeRun` history: true once every node reachable given what has
/// actually fired so far has a terminal NodeRun. Used by restart recovery
/// and exercised directly by the scheduler's property tests, independent
/// of the live `outstanding`-set bookkeeping the running scheduler uses.
pub fn is_run_terminal(nodes: &[FlowchartNode], connectors: &[FlowchartConnector], node_runs: &[NodeRun]) -> bool {
    let mut latest: HashMap<Uuid, &NodeRun> = HashMap::new();
    for node_run in node_runs {
        latest
            .entry(node_run.node_id)
            .and_modify(|existing| {
                if node_run.execution_index > existing.execution_index {
                    *existing = node_run;
                }
            })
            .or_insert(node_run);
    }

    let mut reachable: HashSet<Uuid> = entry_nodes(nodes, connectors).into_iter().map(|n| n.id).collect();
    let mut changed = true;
    while changed {
        changed = false;
        for node in nodes {
            if !reachable.contains(&node.id) {
                continue;
            }
            let Some(node_run) = latest.get(&node.id) else { continue };
            if node_run.status != NodeRunStatus::Succeeded {
                continue;
            }
            let Ok(RoutingOutcome::Fire(fired)) = evaluate_routing(node, node_run, connectors) else { continue };
            for connector in connectors.iter().filter(|c| fired.contains(&c.id)) {
                if !connector.is_suppress && reachable.insert(connector.to_node) {
                    changed = true;
                }
            }
        }
    }

    reachable
        .iter()
        .all(|node_id| latest.get(node_id).map(|nr| nr.status.is_terminal()).unwrap_or(false))
}

/// Working memory for one in-flight run. Recomputed fresh by `start_run`;
/// crash-recovered runs are out of scope for the in-process scheduler
/// (a restarted process re-derives reachability via `is_run_terminal`
/// against persisted state rather than resuming live bookkeeping).
struct RunState {
    nodes: HashMap<Uuid, FlowchartNode>,
    connectors: Vec<FlowchartConnector>,
    readiness: RunReadinessState,
    execution_counts: HashMap<Uuid, u32>,
    outstanding: HashSet<Uuid>,
    cancel_requested: bool,
    failure: Option<String>,
}

impl RunState {
    fn next_execution_index(&mut self, node_id: Uuid) -> u32 {
        let counter = self.execution_counts.entry(node_id).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// Drives flowchart runs end to end: seeds entry nodes, reacts to each
/// `NodeRun` a `NodeExecutor` produces, and advances readiness until the
/// run reaches a terminal status.
pub struct Scheduler {
    store: Arc<dyn Store>,
    queue: Arc<dyn TaskQueue>,
    executor: Arc<dyn NodeExecutor>,
    events: Arc<dyn EventSink>,
    runs: Mutex<HashMap<Uuid, RunState>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, queue: Arc<dyn TaskQueue>, executor: Arc<dyn NodeExecutor>, events: Arc<dyn EventSink>) -> Arc<Self> {
        let scheduler = Arc::new(Self {
            store,
            queue: queue.clone(),
            executor,
            events,
            runs: Mutex::new(HashMap::new()),
        });
        queue.register_handler(QueueName::StudioDefault, scheduler.clone());
        scheduler
    }

    /// Loads the flowchart's graph, validates it has at least one entry
    /// node, creates and persists the `FlowchartRun`, and enqueues its
    /// entry nodes in priority order.
    pub async fn start_run(&self, flowchart_id: Uuid, initiator: impl Into<String>) -> Result<FlowchartRun> {
        let nodes: Vec<FlowchartNode> = self.store.find(kinds::FLOWCHART_NODE, &Query::new().eq("flowchart_id", flowchart_id)).await?;
        let connectors: Vec<FlowchartConnector> = self.store.find(kinds::FLOWCHART_CONNECTOR, &Query::new().eq("flowchart_id", flowchart_id)).await?;

        let entries: Vec<Uuid> = entry_nodes(&nodes, &connectors).into_iter().map(|n| n.id).collect();
        if entries.is_empty() {
            return Err(internal_error("flowchart has no entry node: every node has an inbound connector").into());
        }

        let mut run = FlowchartRun::new(flowchart_id, initiator);
        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        self.store.insert(kinds::FLOWCHART_RUN, &run.id.to_string(), &run).await?;

        self.events.emit(EngineEvent::RunStarted { run_id: run.id, flowchart_id, at: Utc::now() });

        let node_map: HashMap<Uuid, FlowchartNode> = nodes.into_iter().map(|n| (n.id, n)).collect();
        let mut ready_queue: BinaryHeap<Reverse<ReadyQueueEntry>> = entries
            .iter()
            .map(|id| Reverse(ReadyQueueEntry { priority: node_map.get(id).map(|n| n.priority()).unwrap_or(0), node_id: *id }))
            .collect();

        let mut dispatch_order = Vec::with_capacity(entries.len());
        while let Some(Reverse(entry)) = ready_queue.pop() {
            dispatch_order.push(entry.node_id);
        }

        let state = RunState {
            nodes: node_map,
            connectors,
            readiness: RunReadinessState::new(),
            execution_counts: HashMap::new(),
            outstanding: dispatch_order.iter().copied().collect(),
            cancel_requested: false,
            failure: None,
        };
        self.runs.lock().await.insert(run.id, state);

        for node_id in dispatch_order {
            self.enqueue_node(run.id, node_id).await?;
        }

        Ok(run)
    }

    /// Requests cancellation: no further nodes are enqueued. NodeRuns
    /// already dispatched are left to finish (or time out) and are marked
    /// `cancelled_during_flight`; the run becomes `cancelled` once the
    /// outstanding set empties.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<()> {
        let should_finalize = {
            let mut runs = self.runs.lock().await;
            match runs.get_mut(&run_id) {
                Some(state) => {
                    state.cancel_requested = true;
                    state.outstanding.is_empty()
                }
                None => false,
            }
        };
        if should_finalize {
            self.finalize_run(run_id).await?;
        }
        Ok(())
    }

    async fn enqueue_node(&self, run_id: Uuid, node_id: Uuid) -> Result<()> {
        self.queue
            .enqueue(QueueName::StudioDefault, json!({"run_id": run_id, "node_id": node_id}))
            .await
            .map_err(|e| internal_error(format!("failed to enqueue node {node_id}: {e}")))?;
        self.events.emit(EngineEvent::NodeEnqueued { run_id, node_id, at: Utc::now() });
        Ok(())
    }

    async fn process_node(&self, run_id: Uuid, node_id: Uuid) -> Result<()> {
        let skip = {
            let runs = self.runs.lock().await;
            match runs.get(&run_id) {
                Some(state) => state.cancel_requested || state.failure.is_some(),
                None => true,
            }
        };
        if skip {
            self.resolve_outstanding(run_id, node_id).await?;
            return Ok(());
        }

        let run: FlowchartRun = self
            .store
            .get(kinds::FLOWCHART_RUN, &run_id.to_string())
            .await?
            .ok_or_else(|| internal_error(format!("flowchart run {run_id} not found")))?;
        let node = {
            let runs = self.runs.lock().await;
            runs.get(&run_id)
                .and_then(|state| state.nodes.get(&node_id).cloned())
                .ok_or_else(|| internal_error(format!("node {node_id} not tracked for run {run_id}")))?
        };

        let mut attempt = 1u32;
        let mut node_run = loop {
            let execution_index = {
                let mut runs = self.runs.lock().await;
                let state = runs.get_mut(&run_id).ok_or_else(|| internal_error("run state disappeared mid-dispatch"))?;
                state.next_execution_index(node_id)
            };
            let result = self.executor.execute(&run, &node, execution_index).await?;

            if result.status == NodeRunStatus::Failed {
                let retryable = result.error.as_ref().map(|e| e.retryable).unwrap_or(false);
                if retryable && attempt < retry::MAX_ATTEMPTS {
                    let delay = retry::backoff_with_jitter((attempt - 1) as usize);
                    warn!(run_id = %run_id, node_id = %node_id, attempt, delay_ms = delay.as_millis() as u64, "node run failed with a retryable error; scheduling retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
            }
            break result;
        };

        let cancelled_during = {
            let runs = self.runs.lock().await;
            runs.get(&run_id).map(|s| s.cancel_requested).unwrap_or(false)
        };
        if cancelled_during && !node_run.cancelled_during_flight {
            node_run.cancelled_during_flight = true;
            self.store.update(kinds::NODE_RUN, &node_run.id.to_string(), &node_run).await?;
        }

        self.events.emit(EngineEvent::NodeCompleted {
            run_id,
            node_id,
            node_run_id: node_run.id,
            status: format!("{:?}", node_run.status).to_lowercase(),
            at: Utc::now(),
        });

        if !cancelled_during {
            match node_run.status {
                NodeRunStatus::Succeeded => match evaluate_routing(&node, &node_run, &self.snapshot_connectors(run_id).await) {
                    Ok(RoutingOutcome::Fire(fired)) => {
                        self.record_fires_and_advance(run_id, &fired).await?;
                    }
                    Ok(RoutingOutcome::CompleteOk) => {}
                    Ok(RoutingOutcome::NoMatchFailure) => {
                        self.fail_run(run_id, EngineErrorCode::DecisionNoMatch.as_str()).await;
                    }
                    Err(err) => {
                        self.fail_run(run_id, err.code.as_str()).await;
                    }
                },
                NodeRunStatus::Failed => {
                    let code = node_run.error.as_ref().map(|e| e.kind.as_str()).unwrap_or("internal_error");
                    self.fail_run(run_id, code).await;
                }
                _ => {}
            }
        }

        self.resolve_outstanding(run_id, node_id).await?;
        Ok(())
    }

    async fn snapshot_connectors(&self, run_id: Uuid) -> Vec<FlowchartConnector> {
        self.runs.lock().await.get(&run_id).map(|s| s.connectors.clone()).unwrap_or_default()
    }

    async fn record_fires_and_advance(&self, run_id: Uuid, fired_connector_ids: &[Uuid]) -> Result<()> {
        let mut to_enqueue: Vec<(Uuid, i64)> = Vec::new();
        let mut iteration_exceeded = false;

        {
            let mut runs = self.runs.lock().await;
            let Some(state) = runs.get_mut(&run_id) else { return Ok(()) };
            if state.cancel_requested || state.failure.is_some() {
                return Ok(());
            }

            let connectors = state.connectors.clone();
            let mut touched: HashSet<Uuid> = HashSet::new();

            for connector in connectors.iter().filter(|c| fired_connector_ids.contains(&c.id)) {
                if let Some(limit) = connector.iteration_limit {
                    let count = state.readiness.increment_iteration(connector.to_node);
                    if count > limit {
                        iteration_exceeded = true;
                        break;
                    }
                }
                state.readiness.record_fire(connector.to_node, connector.id, connector.is_suppress);
                touched.insert(connector.to_node);
            }

            if !iteration_exceeded {
                for target in touched {
                    if node_is_ready(target, &connectors, &state.readiness) {
                        state.readiness.fired.remove(&target);
                        let priority = state.nodes.get(&target).map(|n| n.priority()).unwrap_or(0);
                        state.outstanding.insert(target);
                        to_enqueue.push((target, priority));
                    }
                }
            }
        }

        if iteration_exceeded {
            self.fail_run(run_id, EngineErrorCode::IterationLimitExceeded.as_str()).await;
            return Ok(());
        }

        to_enqueue.sort_by_key(|(node_id, priority)| (*priority, *node_id));
        for (node_id, _) in to_enqueue {
            self.enqueue_node(run_id, node_id).await?;
        }
        Ok(())
    }

    async fn fail_run(&self, run_id: Uuid, reason: &str) {
        let mut runs = self.runs.lock().await;
        if let Some(state) = runs.get_mut(&run_id) {
            if state.failure.is_none() {
                state.failure = Some(reason.to_string());
            }
        }
    }

    async fn resolve_outstanding(&self, run_id: Uuid, node_id: Uuid) -> Result<()> {
        let done = {
            let mut runs = self.runs.lock().await;
            let Some(state) = runs.get_mut(&run_id) else { return Ok(()) };
            state.outstanding.remove(&node_id);
            state.outstanding.is_empty()
        };
        if done {
            self.finalize_run(run_id).await?;
        }
        Ok(())
    }

    async fn finalize_run(&self, run_id: Uuid) -> Result<()> {
        let outcome = {
            let runs = self.runs.lock().await;
            match runs.get(&run_id) {
                Some(state) if state.cancel_requested => RunStatus::Cancelled,
                Some(state) if state.failure.is_some() => RunStatus::Failed,
                Some(_) => RunStatus::Succeeded,
                None => return Ok(()),
            }
        };

        if let Some(mut run) = self.store.get::<FlowchartRun>(kinds::FLOWCHART_RUN, &run_id.to_string()).await? {
            if !run.status.is_terminal() {
                run.status = outcome;
                run.finished_at = Some(Utc::now());
                self.store.update(kinds::FLOWCHART_RUN, &run_id.to_string(), &run).await?;
                let event = if outcome == RunStatus::Cancelled {
                    EngineEvent::RunCancelled { run_id, at: Utc::now() }
                } else {
                    EngineEvent::RunCompleted { run_id, status: format!("{outcome:?}").to_lowercase(), at: Utc::now() }
                };
                self.events.emit(event);
                info!(run_id = %run_id, status = ?outcome, "flowchart run reached a terminal status");
            }
        }

        self.runs.lock().await.remove(&run_id);
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for Scheduler {
    async fn handle(&self, task: Task) -> std::result::Result<(), String> {
        let run_id: Uuid = serde_json::from_value(task.payload.get("run_id").cloned().unwrap_or(Value::Null)).map_err(|e| e.to_string())?;
        let node_id: Uuid = serde_json::from_value(task.payload.get("node_id").cloned().unwrap_or(Value::Null)).map_err(|e| e.to_string())?;
        self.process_node(run_id, node_id).await.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::events::NullEventSink;
    use crate::model::{NodeRunError, RoutingState};
    use crate::queue::InProcessQueue;
    use llmctl_store::InMemoryStore;
    use std::sync::Mutex as StdMutex;

    fn node(flowchart_id: Uuid, node_type: NodeType) -> FlowchartNode {
        FlowchartNode {
            id: Uuid::new_v4(),
            flowchart_id,
            node_type,
            ref_id: None,
            config: json!({}),
        }
    }

    fn connector(flowchart_id: Uuid, from: Uuid, to: Uuid) -> FlowchartConnector {
        FlowchartConnector {
            id: Uuid::new_v4(),
            flowchart_id,
            from_node: from,
            to_node: to,
            connector_id: None,
            condition_text: None,
            is_else: false,
            iteration_limit: None,
            is_suppress: false,
        }
    }

    fn succeeded_run(run_id: Uuid, node_id: Uuid, execution_index: u32) -> NodeRun {
        let mut nr = NodeRun::new(run_id, node_id, execution_index);
        nr.status = NodeRunStatus::Succeeded;
        nr.started_at = Some(Utc::now());
        nr.finished_at = Some(Utc::now());
        nr
    }

    #[test]
    fn entry_nodes_excludes_anything_with_an_inbound_connector() {
        let flowchart_id = Uuid::new_v4();
        let a = node(flowchart_id, NodeType::Task);
        let b = node(flowchart_id, NodeType::Task);
        let connectors = vec![connector(flowchart_id, a.id, b.id)];
        let entries = entry_nodes(&[a.clone(), b.clone()], &connectors);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, a.id);
    }

    #[test]
    fn node_is_ready_requires_every_non_suppress_inbound_connector() {
        let flowchart_id = Uuid::new_v4();
        let a = node(flowchart_id, NodeType::Task);
        let b = node(flowchart_id, NodeType::Task);
        let join = node(flowchart_id, NodeType::Task);
        let c1 = connector(flowchart_id, a.id, join.id);
        let c2 = connector(flowchart_id, b.id, join.id);
        let connectors = vec![c1.clone(), c2.clone()];

        let mut readiness = RunReadinessState::new();
        readiness.record_fire(join.id, c1.id, false);
        assert!(!node_is_ready(join.id, &connectors, &readiness));

        readiness.record_fire(join.id, c2.id, false);
        assert!(node_is_ready(join.id, &connectors, &readiness));
    }

    #[test]
    fn suppress_connector_blocks_readiness_even_if_required_set_satisfied() {
        let flowchart_id = Uuid::new_v4();
        let a = node(flowchart_id, NodeType::Task);
        let target = node(flowchart_id, NodeType::Task);
        let mut required = connector(flowchart_id, a.id, target.id);
        required.is_suppress = false;
        let mut suppress = connector(flowchart_id, a.id, target.id);
        suppress.is_suppress = true;
        let connectors = vec![required.clone(), suppress.clone()];

        let mut readiness = RunReadinessState::new();
        readiness.record_fire(target.id, required.id, false);
        readiness.record_fire(target.id, suppress.id, true);
        assert!(!node_is_ready(target.id, &connectors, &readiness));
    }

    #[test]
    fn evaluate_routing_follows_matched_connector_by_label() {
        let flowchart_id = Uuid::new_v4();
        let decision = node(flowchart_id, NodeType::Decision);
        let b = node(flowchart_id, NodeType::Task);
        let mut next = connector(flowchart_id, decision.id, b.id);
        next.connector_id = Some("next".to_string());
        let connectors = vec![next.clone()];

        let mut node_run = NodeRun::new(Uuid::new_v4(), decision.id, 1);
        node_run.status = NodeRunStatus::Succeeded;
        node_run.routing_state = Some(RoutingState {
            matched_connector_ids: vec!["next".to_string()],
            evaluations: vec![],
            no_match: false,
            route_key: None,
        });

        let outcome = evaluate_routing(&decision, &node_run, &connectors).unwrap();
        assert_eq!(outcome, RoutingOutcome::Fire(vec![next.id]));
    }

    #[test]
    fn evaluate_routing_falls_back_to_else_connector_on_no_match() {
        let flowchart_id = Uuid::new_v4();
        let decision = node(flowchart_id, NodeType::Decision);
        let b = node(flowchart_id, NodeType::Task);
        let mut else_connector = connector(flowchart_id, decision.id, b.id);
        else_connector.is_else = true;
        let connectors = vec![else_connector.clone()];

        let mut node_run = NodeRun::new(Uuid::new_v4(), decision.id, 1);
        node_run.status = NodeRunStatus::Succeeded;
        node_run.routing_state = Some(RoutingState { matched_connector_ids: vec![], evaluations: vec![], no_match: true, route_key: None });

        let outcome = evaluate_routing(&decision, &node_run, &connectors).unwrap();
        assert_eq!(outcome, RoutingOutcome::Fire(vec![else_connector.id]));
    }

    #[test]
    fn evaluate_routing_no_match_without_else_or_complete_ok_fails() {
        let flowchart_id = Uuid::new_v4();
        let decision = node(flowchart_id, NodeType::Decision);

        let mut node_run = NodeRun::new(Uuid::new_v4(), decision.id, 1);
        node_run.status = NodeRunStatus::Succeeded;
        node_run.routing_state = Some(RoutingState { matched_connector_ids: vec![], evaluations: vec![], no_match: true, route_key: None });

        let outcome = evaluate_routing(&decision, &node_run, &[]).unwrap();
        assert_eq!(outcome, RoutingOutcome::NoMatchFailure);
    }

    #[test]
    fn evaluate_routing_no_match_with_complete_ok_ends_branch() {
        let flowchart_id = Uuid::new_v4();
        let mut decision = node(flowchart_id, NodeType::Decision);
        decision.config = json!({"on_no_match": "complete_ok"});

        let mut node_run = NodeRun::new(Uuid::new_v4(), decision.id, 1);
        node_run.status = NodeRunStatus::Succeeded;
        node_run.routing_state = Some(RoutingState { matched_connector_ids: vec![], evaluations: vec![], no_match: true, route_key: None });

        let outcome = evaluate_routing(&decision, &node_run, &[]).unwrap();
        assert_eq!(outcome, RoutingOutcome::CompleteOk);
    }

    #[test]
    fn is_run_terminal_false_while_a_reachable_node_has_no_terminal_run() {
        let flowchart_id = Uuid::new_v4();
        let a = node(flowchart_id, NodeType::Task);
        let b = node(flowchart_id, NodeType::Task);
        let connectors = vec![connector(flowchart_id, a.id, b.id)];
        let run_id = Uuid::new_v4();

        let node_runs = vec![succeeded_run(run_id, a.id, 1)];
        assert!(!is_run_terminal(&[a.clone(), b.clone()], &connectors, &node_runs));
    }

    #[test]
    fn is_run_terminal_true_once_every_reachable_node_has_succeeded() {
        let flowchart_id = Uuid::new_v4();
        let a = node(flowchart_id, NodeType::Task);
        let b = node(flowchart_id, NodeType::Task);
        let connectors = vec![connector(flowchart_id, a.id, b.id)];
        let run_id = Uuid::new_v4();

        let node_runs = vec![succeeded_run(run_id, a.id, 1), succeeded_run(run_id, b.id, 1)];
        assert!(is_run_terminal(&[a, b], &connectors, &node_runs));
    }

    #[test]
    fn is_run_terminal_ignores_a_branch_a_decision_never_fired() {
        let flowchart_id = Uuid::new_v4();
        let decision = node(flowchart_id, NodeType::Decision);
        let taken = node(flowchart_id, NodeType::Task);
        let not_taken = node(flowchart_id, NodeType::Task);
        let mut to_taken = connector(flowchart_id, decision.id, taken.id);
        to_taken.connector_id = Some("yes".to_string());
        let mut to_not_taken = connector(flowchart_id, decision.id, not_taken.id);
        to_not_taken.connector_id = Some("no".to_string());
        let connectors = vec![to_taken.clone(), to_not_taken];
        let run_id = Uuid::new_v4();

        let mut decision_run = succeeded_run(run_id, decision.id, 1);
        decision_run.routing_state = Some(RoutingState {
            matched_connector_ids: vec!["yes".to_string()],
            evaluations: vec![],
            no_match: false,
            route_key: None,
        });
        let node_runs = vec![decision_run, succeeded_run(run_id, taken.id, 1)];

        assert!(is_run_terminal(&[decision, taken, not_taken], &connectors, &node_runs));
    }

    /// Mimics a real `NodeExecutor`'s contract: persists the `NodeRun` it
    /// produces before returning it, the way a `NodeDispatcher`-backed
    /// implementation would, so the scheduler's `cancelled_during_flight`
    /// update (which assumes the row already exists) and tests reading
    /// `kinds::NODE_RUN` back out of the store both see real data.
    struct ScriptedExecutor {
        store: Arc<dyn Store>,
        statuses: StdMutex<HashMap<Uuid, Vec<NodeRunStatus>>>,
    }

    impl ScriptedExecutor {
        fn new(store: Arc<dyn Store>) -> Self {
            Self { store, statuses: StdMutex::new(HashMap::new()) }
        }

        fn script(&self, node_id: Uuid, statuses: Vec<NodeRunStatus>) {
            self.statuses.lock().unwrap().insert(node_id, statuses);
        }
    }

    #[async_trait]
    impl NodeExecutor for ScriptedExecutor {
        async fn execute(&self, run: &FlowchartRun, node: &FlowchartNode, execution_index: u32) -> Result<NodeRun> {
            let status = {
                let mut statuses = self.statuses.lock().unwrap();
                let queue = statuses.entry(node.id).or_insert_with(|| vec![NodeRunStatus::Succeeded]);
                if queue.len() > 1 { queue.remove(0) } else { queue[0] }
            };
            let mut node_run = NodeRun::new(run.id, node.id, execution_index);
            node_run.status = status;
            node_run.started_at = Some(Utc::now());
            node_run.finished_at = Some(Utc::now());
            if status == NodeRunStatus::Failed {
                node_run.error = Some(NodeRunError { kind: EngineErrorCode::ProviderTimeout, message: "scripted timeout".to_string(), retryable: true });
            }
            if node.node_type == NodeType::Decision {
                node_run.routing_state = Some(RoutingState { matched_connector_ids: vec!["next".to_string()], evaluations: vec![], no_match: false, route_key: None });
            }
            self.store.insert(kinds::NODE_RUN, &node_run.id.to_string(), &node_run).await?;
            Ok(node_run)
        }
    }

    /// Wraps a `ScriptedExecutor` and pauses `execute` on one chosen node:
    /// signals `started` then blocks on `release` before delegating, so a
    /// test can call `cancel_run` while that node is provably still
    /// in-flight (spec.md §8 scenario 6).
    struct GatedExecutor {
        inner: Arc<ScriptedExecutor>,
        gated_node: Uuid,
        started: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl NodeExecutor for GatedExecutor {
        async fn execute(&self, run: &FlowchartRun, node: &FlowchartNode, execution_index: u32) -> Result<NodeRun> {
            if node.id == self.gated_node {
                self.started.notify_one();
                self.release.notified().await;
            }
            self.inner.execute(run, node, execution_index).await
        }
    }

    async fn wait_for_terminal(store: &Arc<dyn Store>, run_id: Uuid) -> FlowchartRun {
        for _ in 0..200 {
            if let Some(run) = store.get::<FlowchartRun>(kinds::FLOWCHART_RUN, &run_id.to_string()).await.unwrap() {
                if run.status.is_terminal() {
                    return run;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("run never reached a terminal status");
    }

    #[tokio::test]
    async fn a_two_node_chain_runs_to_completion() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let queue: Arc<dyn TaskQueue> = InProcessQueue::new(2, 16);
        let executor = Arc::new(ScriptedExecutor::new(store.clone()));
        let events: Arc<dyn EventSink> = Arc::new(NullEventSink);

        let flowchart_id = Uuid::new_v4();
        let a = node(flowchart_id, NodeType::Task);
        let b = node(flowchart_id, NodeType::Task);
        let conn = connector(flowchart_id, a.id, b.id);
        store.insert(kinds::FLOWCHART_NODE, &a.id.to_string(), &a).await.unwrap();
        store.insert(kinds::FLOWCHART_NODE, &b.id.to_string(), &b).await.unwrap();
        store.insert(kinds::FLOWCHART_CONNECTOR, &conn.id.to_string(), &conn).await.unwrap();

        let scheduler = Scheduler::new(store.clone(), queue, executor, events);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let run = scheduler.start_run(flowchart_id, "test").await.unwrap();
        let finished = wait_for_terminal(&store, run.id).await;
        assert_eq!(finished.status, RunStatus::Succeeded);

        let node_runs: Vec<NodeRun> = store.find(kinds::NODE_RUN, &Query::new().eq("run_id", run.id)).await.unwrap();
        assert_eq!(node_runs.len(), 2);
    }

    #[tokio::test]
    async fn a_branch_the_decision_does_not_take_never_runs() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let queue: Arc<dyn TaskQueue> = InProcessQueue::new(2, 16);
        let executor = Arc::new(ScriptedExecutor::new(store.clone()));
        let events: Arc<dyn EventSink> = Arc::new(NullEventSink);

        let flowchart_id = Uuid::new_v4();
        let decision = node(flowchart_id, NodeType::Decision);
        let taken = node(flowchart_id, NodeType::Task);
        let not_taken = node(flowchart_id, NodeType::Task);
        let mut to_taken = connector(flowchart_id, decision.id, taken.id);
        to_taken.connector_id = Some("next".to_string());
        let mut to_not_taken = connector(flowchart_id, decision.id, not_taken.id);
        to_not_taken.connector_id = Some("other".to_string());

        for n in [&decision, &taken, &not_taken] {
            store.insert(kinds::FLOWCHART_NODE, &n.id.to_string(), n).await.unwrap();
        }
        for c in [&to_taken, &to_not_taken] {
            store.insert(kinds::FLOWCHART_CONNECTOR, &c.id.to_string(), c).await.unwrap();
        }

        let scheduler = Scheduler::new(store.clone(), queue, executor, events);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let run = scheduler.start_run(flowchart_id, "test").await.unwrap();
        let finished = wait_for_terminal(&store, run.id).await;
        assert_eq!(finished.status, RunStatus::Succeeded);

        let node_runs: Vec<NodeRun> = store.find(kinds::NODE_RUN, &Query::new().eq("run_id", run.id)).await.unwrap();
        let ran_node_ids: HashSet<Uuid> = node_runs.iter().map(|nr| nr.node_id).collect();
        assert!(ran_node_ids.contains(&decision.id));
        assert!(ran_node_ids.contains(&taken.id));
        assert!(!ran_node_ids.contains(&not_taken.id));
    }

    #[tokio::test]
    async fn a_terminal_node_failure_fails_the_whole_run() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let queue: Arc<dyn TaskQueue> = InProcessQueue::new(2, 16);
        let executor = Arc::new(ScriptedExecutor::new(store.clone()));
        let events: Arc<dyn EventSink> = Arc::new(NullEventSink);

        let flowchart_id = Uuid::new_v4();
        let a = node(flowchart_id, NodeType::Task);
        store.insert(kinds::FLOWCHART_NODE, &a.id.to_string(), &a).await.unwrap();
        executor.script(a.id, vec![NodeRunStatus::Failed, NodeRunStatus::Failed, NodeRunStatus::Failed]);

        let scheduler = Scheduler::new(store.clone(), queue, executor, events);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let run = scheduler.start_run(flowchart_id, "test").await.unwrap();
        let finished = wait_for_terminal(&store, run.id).await;
        assert_eq!(finished.status, RunStatus::Failed);

        let node_runs: Vec<NodeRun> = store.find(kinds::NODE_RUN, &Query::new().eq("run_id", run.id)).await.unwrap();
        // 3 scripted attempts: the scheduler's own retry ceiling (spec.md §7).
        assert_eq!(node_runs.len(), 3);
    }

    #[tokio::test]
    async fn a_retryable_failure_recovers_on_a_later_attempt() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let queue: Arc<dyn TaskQueue> = InProcessQueue::new(2, 16);
        let executor = Arc::new(ScriptedExecutor::new(store.clone()));
        let events: Arc<dyn EventSink> = Arc::new(NullEventSink);

        let flowchart_id = Uuid::new_v4();
        let a = node(flowchart_id, NodeType::Task);
        store.insert(kinds::FLOWCHART_NODE, &a.id.to_string(), &a).await.unwrap();
        executor.script(a.id, vec![NodeRunStatus::Failed, NodeRunStatus::Succeeded]);

        let scheduler = Scheduler::new(store.clone(), queue, executor, events);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let run = scheduler.start_run(flowchart_id, "test").await.unwrap();
        let finished = wait_for_terminal(&store, run.id).await;
        assert_eq!(finished.status, RunStatus::Succeeded);
    }

    /// spec.md §8 scenario 6: cancel while N2 of N1→N2→N3 is running. N2
    /// finishes and records `cancelled_during_flight=true`, N3 is never
    /// enqueued, and the run ends `cancelled`.
    #[tokio::test]
    async fn cancelling_mid_flight_finishes_the_running_node_and_stops_downstream() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let queue: Arc<dyn TaskQueue> = InProcessQueue::new(2, 16);
        let events: Arc<dyn EventSink> = Arc::new(NullEventSink);

        let flowchart_id = Uuid::new_v4();
        let n1 = node(flowchart_id, NodeType::Task);
        let n2 = node(flowchart_id, NodeType::Task);
        let n3 = node(flowchart_id, NodeType::Task);
        let c1 = connector(flowchart_id, n1.id, n2.id);
        let c2 = connector(flowchart_id, n2.id, n3.id);
        for n in [&n1, &n2, &n3] {
            store.insert(kinds::FLOWCHART_NODE, &n.id.to_string(), n).await.unwrap();
        }
        for c in [&c1, &c2] {
            store.insert(kinds::FLOWCHART_CONNECTOR, &c.id.to_string(), c).await.unwrap();
        }

        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let executor = Arc::new(GatedExecutor {
            inner: Arc::new(ScriptedExecutor::new(store.clone())),
            gated_node: n2.id,
            started: started.clone(),
            release: release.clone(),
        });

        let scheduler = Scheduler::new(store.clone(), queue, executor, events);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let run = scheduler.start_run(flowchart_id, "test").await.unwrap();

        started.notified().await;
        scheduler.cancel_run(run.id).await.unwrap();
        release.notify_one();

        let finished = wait_for_terminal(&store, run.id).await;
        assert_eq!(finished.status, RunStatus::Cancelled);

        let node_runs: Vec<NodeRun> = store.find(kinds::NODE_RUN, &Query::new().eq("run_id", run.id)).await.unwrap();
        let ran_node_ids: HashSet<Uuid> = node_runs.iter().map(|nr| nr.node_id).collect();
        assert!(ran_node_ids.contains(&n1.id));
        assert!(ran_node_ids.contains(&n2.id));
        assert!(!ran_node_ids.contains(&n3.id));

        let n2_run = node_runs.iter().find(|nr| nr.node_id == n2.id).unwrap();
        assert!(n2_run.cancelled_during_flight);
    }
}
