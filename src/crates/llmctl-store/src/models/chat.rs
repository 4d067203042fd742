//! Chat thread persistence. `ChatMessage` mirrors `llmctl_core::Message` but
//! adds the bookkeeping fields (thread ownership, ordering, token count)
//! that only matter once a message is stored.

use chrono::{DateTime, Utc};
use llmctl_core::{Message, MessageRole};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: Uuid,
    pub context_window_tokens: usize,
    /// The running "prior conversation summary" produced by compaction
    /// (spec §4.7 step 2), `None` until the first compaction fires.
    pub history_compaction_summary: Option<String>,
}

impl ChatThread {
    pub fn new(context_window_tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            context_window_tokens,
            history_compaction_summary: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub thread_id: Uuid,
    /// Position within the thread; strictly increasing.
    pub sequence: u64,
    pub role: MessageRole,
    pub content: String,
    pub token_count: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn from_message(thread_id: Uuid, sequence: u64, message: &Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            sequence,
            role: message.role.clone(),
            content: message.text_owned(),
            token_count: None,
            created_at: Utc::now(),
        }
    }

    pub fn to_message(&self) -> Message {
        Message::new(self.role.clone(), self.content.clone())
    }
}
