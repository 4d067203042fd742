//! Response types returned by `ChatModel::chat` and `ChatModel::stream`.

use crate::messages::Message;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

/// Token usage for a single chat call. Fed into the context budgeter's
/// running totals and surfaced on `NodeRun` for cost accounting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: usize,
    pub output_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<usize>,
    pub total_tokens: usize,
}

/// A thinking model's extracted reasoning trace, present only when
/// `ReasoningMode::should_capture()` was set on the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningContent {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
}

/// A complete, non-streamed response from a chat model.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<UsageMetadata>,
    pub reasoning: Option<ReasoningContent>,
    pub metadata: HashMap<String, Value>,
}

/// A chunk of a streaming message, mirroring `ChatResponse` at token
/// granularity.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    pub content: String,
    pub message_id: Option<String>,
    pub is_final: bool,
    pub metadata: Option<Value>,
}

impl MessageChunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            message_id: None,
            is_final: false,
            metadata: None,
        }
    }

    pub fn final_chunk(mut self) -> Self {
        self.is_final = true;
        self
    }
}

pub type MessageChunkStream = Pin<Box<dyn Stream<Item = MessageChunk> + Send>>;

/// A streaming response. `usage` is populated only once the stream yields
/// its final chunk; adapters complete it via an internal channel rather than
/// blocking the caller.
pub struct ChatStreamResponse {
    pub stream: MessageChunkStream,
    pub reasoning: Option<ReasoningContent>,
}
