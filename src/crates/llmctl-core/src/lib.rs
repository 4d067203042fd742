//! Shared primitives for the llmctl flowchart execution engine: chat
//! messages, the provider-agnostic `ChatModel` trait, the engine's stable
//! error taxonomy, and retry backoff.
//!
//! Everything in this crate is deliberately provider- and storage-agnostic.
//! `llmctl-providers` implements `ChatModel` for real APIs and local
//! inference servers; `llmctl-store` implements persistence; `llmctl-engine`
//! wires both together into the scheduler and node runtime.

pub mod error;
pub mod llm;
pub mod messages;
pub mod retry;

pub use error::{EngineError, EngineErrorCode, Result};
pub use llm::{
    ChatModel, ChatRequest, ChatResponse, ChatStreamResponse, ReasoningMode, ToolCall,
    ToolDefinition, ToolResult, UsageMetadata,
};
pub use messages::{ContentPart, Message, MessageContent, MessageRole};
pub use retry::{RetryPolicy, RetryState};
