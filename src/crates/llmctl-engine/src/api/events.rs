//! Scheduler event stream: the socket/log seam downstream observers (a
//! studio UI, a CLI `--watch`, structured logs) subscribe to instead of
//! polling `FlowchartRun`/`NodeRun` rows.
//!
//! Grounded on `orchestrator::api::ws::events::RealtimeEvent`'s tagged
//! enum shape, narrowed from that teacher's dozen websocket event kinds
//! to the handful the scheduler itself produces, and delivered over a
//! `tokio::sync::broadcast` channel rather than a per-client queue since
//! this crate has no socket layer of its own to fan events out through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// One observable scheduler transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    #[serde(rename = "run.started")]
    RunStarted { run_id: Uuid, flowchart_id: Uuid, at: DateTime<Utc> },

    #[serde(rename = "node.enqueued")]
    NodeEnqueued { run_id: Uuid, node_id: Uuid, at: DateTime<Utc> },

    #[serde(rename = "node.completed")]
    NodeCompleted { run_id: Uuid, node_id: Uuid, node_run_id: Uuid, status: String, at: DateTime<Utc> },

    #[serde(rename = "run.completed")]
    RunCompleted { run_id: Uuid, status: String, at: DateTime<Utc> },

    #[serde(rename = "run.cancelled")]
    RunCancelled { run_id: Uuid, at: DateTime<Utc> },
}

/// Seam a socket layer or a test harness implements to observe scheduler
/// activity. Kept separate from `TaskQueue`/`Store` so the scheduler never
/// has to know whether anyone is listening.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Default sink: a broadcast channel with a bounded backlog, the same
/// drop-oldest-under-backpressure shape the teacher's websocket layer
/// applies per client, applied here to a single process-wide event feed.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<EngineEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error; the event is simply dropped.
        let _ = self.sender.send(event);
    }
}

/// Discards every event. Used where a caller wires a `Scheduler` without
/// caring to observe it (most unit tests).
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: EngineEvent) {}
}
