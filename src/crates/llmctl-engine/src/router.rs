//! Provider dispatch router: frontier-first dispatch with one jittered
//! retry on classified transient failures, never a CLI-binary fallback.
//!
//! Grounded on `orchestrator::router::llm_router::LlmRouter`'s
//! try-then-fallback shape, reused here for *dispatch retry* rather than
//! *pattern selection*: the teacher tries an LLM call and falls back to a
//! distinct rule-based router on failure, this router tries one adapter
//! call and retries the same adapter once on a classified transient
//! failure — there is deliberately no second adapter to fall back to,
//! since spec.md §4.3 forbids CLI-binary fallback outright and the engine
//! has no third dispatch path to substitute.

use std::sync::Arc;

use llmctl_core::RetryPolicy;
use llmctl_providers::{ExecutionResult, ExecutionStatus, ProviderAdapter};
use llmctl_store::{kinds, Query, Store, StoreExt};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::Result;

/// Failure categories eligible for one same-provider retry (spec.md
/// §4.3 rule 2): `{timeout, provider_unavailable, auth}` map to the
/// `ExecutionError.code` strings an adapter classifies its own failures
/// into.
const RETRYABLE_CATEGORIES: [&str; 3] = ["provider_timeout", "provider_unavailable", "provider_auth"];

/// Routes one node dispatch through an adapter, applying spec.md §4.3's
/// retry/fallback policy. Holds an optional `Store` handle so it can
/// resolve `dispatch_uncertain` results against persisted artifacts
/// (rule 3) without the node runtime duplicating that lookup.
pub struct DispatchRouter {
    store: Arc<dyn Store>,
    retry_policy: RetryPolicy,
}

impl DispatchRouter {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            // One retry, spec's "retry once on the same provider with
            // jitter" — not the scheduler's separate 3-attempt/0.5s-2s-8s
            // backoff (that applies to NodeRun-level retries after this
            // router has already surfaced a terminal failure).
            retry_policy: RetryPolicy::new(1).with_initial_interval(0.5).with_max_interval(0.5),
        }
    }

    /// Dispatches `request` through `adapter`. On success, returns the
    /// result unchanged. On a classified transient failure, retries once
    /// with jitter on the same adapter and tags the outcome with
    /// `fallback_attempted`/`fallback_reason` either way so
    /// `noderun::classify_degradation` can mark the NodeRun degraded.
    pub async fn dispatch(
        &self,
        adapter: &dyn ProviderAdapter,
        request: llmctl_providers::ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let dispatch_id = request.provider_dispatch_id.clone();
        let first = adapter.execute(request.clone()).await?;

        if first.is_success() {
            return self.resolve_uncertain(first, dispatch_id.as_deref()).await;
        }

        let category = first
            .error
            .as_ref()
            .map(|e| e.code.as_str())
            .unwrap_or("");

        if !RETRYABLE_CATEGORIES.contains(&category) {
            return Ok(first);
        }

        let delay = self.retry_policy.calculate_delay(0);
        warn!(
            node_id = %request.node_id,
            category,
            delay_ms = delay.as_millis() as u64,
            "dispatch failed with a classified transient error; retrying once on the same provider"
        );
        tokio::time::sleep(delay).await;

        let mut retried = adapter.execute(request.clone()).await?;
        mark_fallback(&mut retried, category);
        info!(
            node_id = %request.node_id,
            category,
            status = ?retried.status,
            "fallback retry completed"
        );
        self.resolve_uncertain(retried, dispatch_id.as_deref()).await
    }

    /// Rule 3: a result flagged `dispatch_uncertain=true` is never
    /// re-submitted by this router (it already executed exactly once per
    /// call above); it is only treated as retryable by the *caller*
    /// (`noderun`/scheduler retry loop) when the store has no record of
    /// this dispatch yet. A persisted `kinds::DISPATCH_KEY` row is the
    /// store's proof that a NodeRun (and any artifact it produced) already exists
    /// for this dispatch — the same row `noderun::lookup_existing` reads —
    /// so its presence stands in for "a NodeArtifact exists" without a
    /// second join through `node_run_id`. When that row already exists,
    /// the uncertain result is downgraded to success so the caller does
    /// not duplicate work whose effect already landed.
    async fn resolve_uncertain(&self, mut result: ExecutionResult, dispatch_id: Option<&str>) -> Result<ExecutionResult> {
        let uncertain = result
            .provider_metadata
            .get("dispatch_uncertain")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !uncertain {
            return Ok(result);
        }

        let Some(dispatch_id) = dispatch_id else {
            return Ok(result);
        };

        let already_recorded = self.dispatch_already_recorded(dispatch_id).await?;
        if already_recorded && matches!(result.status, ExecutionStatus::Failed) {
            // The external effect already landed (an artifact exists for
            // this dispatch); surfacing a failure here would invite a
            // caller retry that re-does work already recorded.
            result.status = ExecutionStatus::Success;
        }
        Ok(result)
    }

    async fn dispatch_already_recorded(&self, dispatch_id: &str) -> Result<bool> {
        let query = Query::new().eq("dispatch_id", dispatch_id);
        let rows = self.store.find_json(kinds::DISPATCH_KEY, &query).await?;
        Ok(!rows.is_empty())
    }
}

fn mark_fallback(result: &mut ExecutionResult, category: &str) {
    let mut provider_metadata = result
        .provider_metadata
        .as_object()
        .cloned()
        .unwrap_or_default();
    provider_metadata.insert("fallback_attempted".to_string(), json!(true));
    provider_metadata.insert("fallback_reason".to_string(), json!(category));
    result.provider_metadata = Value::Object(provider_metadata);

    let mut run_metadata = result.run_metadata.as_object().cloned().unwrap_or_default();
    run_metadata.insert("fallback_attempted".to_string(), json!(true));
    run_metadata.insert("fallback_reason".to_string(), json!(category));
    result.run_metadata = Value::Object(run_metadata);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use llmctl_providers::{ExecutionError, ExecutionRequest, ModelConfig, ProviderChoice};
    use llmctl_store::InMemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct FlakyAdapter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for FlakyAdapter {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn execute(&self, _request: llmctl_providers::ExecutionRequest) -> llmctl_core::Result<ExecutionResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                Ok(ExecutionResult::failed(
                    Utc::now(),
                    ExecutionError {
                        code: "provider_unavailable".to_string(),
                        message: "connection refused".to_string(),
                        retryable: true,
                    },
                ))
            } else {
                Ok(ExecutionResult::success(Utc::now(), json!({"raw_output": "pong"}), Value::Null))
            }
        }
    }

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            node_id: Uuid::new_v4(),
            node_type: "task".to_string(),
            node_config: Value::Object(Default::default()),
            input_context: Value::Object(Default::default()),
            execution_id: "run-1".to_string(),
            provider_choice: ProviderChoice::Frontier,
            mcp_configs: Default::default(),
            env: Default::default(),
            model_config: ModelConfig::default(),
            workspace_identity: "ws".to_string(),
            provider_dispatch_id: Some("dispatch-1".to_string()),
        }
    }

    #[tokio::test]
    async fn retries_once_on_provider_unavailable_and_marks_degraded() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let router = DispatchRouter::new(store);
        let adapter = FlakyAdapter { calls: AtomicUsize::new(0) };

        let result = router.dispatch(&adapter, request()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.provider_metadata["fallback_attempted"], json!(true));
        assert_eq!(result.provider_metadata["fallback_reason"], json!("provider_unavailable"));
        assert_eq!(result.run_metadata["fallback_reason"], json!("provider_unavailable"));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }

    struct AlwaysFailingAdapter;

    #[async_trait]
    impl ProviderAdapter for AlwaysFailingAdapter {
        fn name(&self) -> &'static str {
            "always_failing"
        }

        async fn execute(&self, _request: llmctl_providers::ExecutionRequest) -> llmctl_core::Result<ExecutionResult> {
            Ok(ExecutionResult::failed(
                Utc::now(),
                ExecutionError {
                    code: "provider_unavailable".to_string(),
                    message: "still down".to_string(),
                    retryable: true,
                },
            ))
        }
    }

    #[tokio::test]
    async fn surfaces_failure_after_one_retry() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let router = DispatchRouter::new(store);
        let adapter = AlwaysFailingAdapter;

        let result = router.dispatch(&adapter, request()).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(result.provider_metadata["fallback_attempted"], json!(true));
    }

    struct NonRetryableAdapter;

    #[async_trait]
    impl ProviderAdapter for NonRetryableAdapter {
        fn name(&self) -> &'static str {
            "non_retryable"
        }

        async fn execute(&self, _request: llmctl_providers::ExecutionRequest) -> llmctl_core::Result<ExecutionResult> {
            Ok(ExecutionResult::failed(
                Utc::now(),
                ExecutionError {
                    code: "validation_error".to_string(),
                    message: "bad config".to_string(),
                    retryable: false,
                },
            ))
        }
    }

    #[tokio::test]
    async fn does_not_retry_non_classified_categories() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let router = DispatchRouter::new(store);
        let adapter = NonRetryableAdapter;

        let result = router.dispatch(&adapter, request()).await.unwrap();

        assert!(!result.is_success());
        assert!(result.provider_metadata.get("fallback_attempted").is_none());
    }
}
