//! Vector collections used by `rag` flowchart nodes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionHealth {
    Healthy,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RAGCollection {
    pub id: Uuid,
    pub name: String,
    pub vector_backend: String,
    pub health: CollectionHealth,
}
