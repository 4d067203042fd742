//! Agent/Role definitions consumed by the instruction compiler, and script
//! attachments nodes can reference.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub markdown: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptAttachment {
    pub id: Uuid,
    pub file_name: String,
    pub file_path: String,
    pub content_type: String,
    pub content_hash: String,
}
