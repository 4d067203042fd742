//! The provider-agnostic chat model trait.
//!
//! Every provider adapter (frontier API clients and local-inference clients
//! alike) implements this trait. The node runtime and dispatch router only
//! ever see `Arc<dyn ChatModel>`; they never know whether a call is going to
//! Anthropic's API or to an Ollama server on the workspace host.

use crate::error::Result;
use crate::llm::config::ChatRequest;
use crate::llm::response::{ChatResponse, ChatStreamResponse};
use crate::llm::tools::ToolDefinition;
use async_trait::async_trait;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one complete chat turn and return the assistant's message.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Stream a chat turn chunk by chunk.
    async fn stream(&self, request: ChatRequest) -> Result<ChatStreamResponse>;

    /// Cheap reachability check. Local adapters use this to detect a
    /// stopped server before a dispatch attempt; frontier adapters can rely
    /// on the default and let `chat`/`stream` surface auth/network errors.
    async fn is_available(&self) -> Result<bool> {
        Ok(true)
    }

    /// Tools bound to this model instance, if any.
    fn bound_tools(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    fn clone_box(&self) -> Box<dyn ChatModel>;
}

impl Clone for Box<dyn ChatModel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
