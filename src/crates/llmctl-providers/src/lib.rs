//! Provider adapters for the llmctl flowchart execution engine.
//!
//! Generalizes `llm::{remote, local}`'s `ChatModel` clients from a
//! chat-turn request/response pair to the node-dispatch
//! [`request::ExecutionRequest`]/[`request::ExecutionResult`] contract: one
//! call per `NodeRun` attempt, with stdout/exit_code/dispatch-state fields
//! a scheduler can persist directly. [`adapter::ProviderAdapter`] is the
//! dyn-safe seam the dispatch router holds adapters behind; [`frontier`]
//! and [`local`] are its two implementations. [`guardrail`] enforces, at
//! every adapter constructor, that neither ever shells out to a vendor CLI
//! binary in place of its HTTP API.

pub mod adapter;
pub mod frontier;
pub mod guardrail;
pub mod local;
pub mod request;

pub use adapter::ProviderAdapter;
pub use frontier::{FrontierAdapter, FrontierConfig};
pub use local::{LocalAdapter, LocalConfig};
pub use request::{
    ApiFailureCategory, DispatchStatus, ExecutionError, ExecutionRequest, ExecutionResult,
    ExecutionStatus, ExecutionUsage, ModelConfig, ProviderChoice, EXECUTION_CONTRACT_VERSION,
};
