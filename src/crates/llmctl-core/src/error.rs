//! Stable error taxonomy shared across the flowchart engine.
//!
//! The codes here are part of the external contract (spec §7 / §6 error
//! envelope): they are persisted on `NodeRun.error` and serialized at the API
//! boundary, so renaming a variant is a breaking change even though the
//! underlying Rust type is free to evolve.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, wire-visible error code. Mirrors spec.md §7's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorCode {
    ValidationError,
    DispatchError,
    ProviderTimeout,
    ProviderUnavailable,
    ProviderAuth,
    DecisionNoMatch,
    IterationLimitExceeded,
    StorageConflict,
    CompatibilityBlocked,
    InternalError,
}

impl EngineErrorCode {
    /// Whether this class of failure is retryable in isolation, ignoring the
    /// scheduler's attempt-count ceiling (spec §7).
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            EngineErrorCode::ProviderTimeout
                | EngineErrorCode::ProviderUnavailable
                | EngineErrorCode::StorageConflict
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EngineErrorCode::ValidationError => "validation_error",
            EngineErrorCode::DispatchError => "dispatch_error",
            EngineErrorCode::ProviderTimeout => "provider_timeout",
            EngineErrorCode::ProviderUnavailable => "provider_unavailable",
            EngineErrorCode::ProviderAuth => "provider_auth",
            EngineErrorCode::DecisionNoMatch => "decision_no_match",
            EngineErrorCode::IterationLimitExceeded => "iteration_limit_exceeded",
            EngineErrorCode::StorageConflict => "storage_conflict",
            EngineErrorCode::CompatibilityBlocked => "compatibility_blocked",
            EngineErrorCode::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The engine-wide error type. Carries a stable `code`, a human message, and
/// whether the scheduler is allowed to retry it — `retryable` defaults from
/// the code but can be overridden (e.g. a `dispatch_error` is never retried
/// even though nothing stops a caller from constructing one with an
/// optimistic flag).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct EngineError {
    pub code: EngineErrorCode,
    pub message: String,
    pub retryable: bool,
}

impl EngineError {
    pub fn new(code: EngineErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            retryable: code.default_retryable(),
            code,
            message,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(EngineErrorCode::ValidationError, message)
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::new(EngineErrorCode::DispatchError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(EngineErrorCode::InternalError, message)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::validation(format!("invalid JSON: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_retryable_matches_spec_taxonomy() {
        assert!(EngineErrorCode::ProviderTimeout.default_retryable());
        assert!(EngineErrorCode::ProviderUnavailable.default_retryable());
        assert!(EngineErrorCode::StorageConflict.default_retryable());
        assert!(!EngineErrorCode::DispatchError.default_retryable());
        assert!(!EngineErrorCode::ValidationError.default_retryable());
    }

    #[test]
    fn code_round_trips_through_serde() {
        let code = EngineErrorCode::DecisionNoMatch;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, "\"decision_no_match\"");
        let back: EngineErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, code);
    }

    #[test]
    fn new_error_defaults_retryable_from_code() {
        let err = EngineError::new(EngineErrorCode::ProviderAuth, "bad key");
        assert!(!err.retryable);
        let err = EngineError::new(EngineErrorCode::ProviderTimeout, "slow");
        assert!(err.retryable);
    }
}
