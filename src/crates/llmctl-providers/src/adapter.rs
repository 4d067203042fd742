//! The seam between node execution and provider APIs.

use async_trait::async_trait;
use llmctl_core::Result;

use crate::request::{ExecutionRequest, ExecutionResult};

/// Implemented once per LLM family. The dispatch router
/// (`llmctl-engine::router`) holds these behind `Arc<dyn ProviderAdapter>`
/// and never knows which concrete client it's talking to.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable name used in logs and `provider_metadata.executor_provider`.
    fn name(&self) -> &'static str;

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult>;

    /// Cheap reachability probe. Local adapters use this to detect a
    /// stopped server before counting a failure as `provider_unavailable`;
    /// frontier adapters can rely on the default.
    async fn is_available(&self) -> bool {
        true
    }
}
