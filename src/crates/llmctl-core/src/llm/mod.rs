//! Provider-agnostic chat model trait and request/response types.
//!
//! This module defines the seam between the node runtime and provider
//! adapters: `llmctl-engine` depends only on `ChatModel`; `llmctl-providers`
//! is where concrete frontier and local clients live.

pub mod config;
pub mod response;
pub mod tools;
pub mod traits;

pub use config::{ChatConfig, ChatRequest, ReasoningMode};
pub use response::{ChatResponse, ChatStreamResponse, MessageChunk, MessageChunkStream, ReasoningContent, UsageMetadata};
pub use tools::{ToolCall, ToolDefinition, ToolResult};
pub use traits::ChatModel;
