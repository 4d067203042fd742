//! The `{ok:false, error:{...}}` envelope every external-facing surface
//! (CLI JSON output, and any HTTP layer built on top of this crate) wraps
//! a failure in, so a caller never has to special-case "which endpoint
//! returned this error" to find the code.
//!
//! Grounded on `web/api_contracts.py`'s `build_api_error_envelope`: same
//! field set, same rule that `details` defaults to an empty object rather
//! than being omitted, same optional top-level `correlation_id`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use llmctl_core::error::EngineError;

/// Bumped only if the envelope's field set changes; unrelated to the
/// engine's own crate version.
pub const API_ERROR_CONTRACT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub contract_version: String,
    pub code: String,
    pub message: String,
    pub details: Value,
    pub request_id: String,
}

/// The full envelope. `ok` is always `false` here — callers on the
/// success path don't build one of these, they serialize their payload
/// directly with no wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorEnvelope {
    pub ok: bool,
    pub error: ApiErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ApiErrorEnvelope {
    pub fn new(code: impl Into<String>, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: ApiErrorBody {
                contract_version: API_ERROR_CONTRACT_VERSION.to_string(),
                code: code.into(),
                message: message.into(),
                details: json!({}),
                request_id: request_id.into(),
            },
            correlation_id: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error.details = details;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// A `request_id` the caller never supplied (no `X-Request-ID` header
    /// equivalent on a CLI invocation) still needs to be something; a
    /// fresh v4 fills that gap the way the original's `uuid.uuid4().hex`
    /// fallback does.
    pub fn with_generated_request_id(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, Uuid::new_v4().to_string())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("ApiErrorEnvelope always serializes")
    }
}

impl From<EngineError> for ApiErrorEnvelope {
    fn from(err: EngineError) -> Self {
        Self::with_generated_request_id(err.code.as_str(), err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmctl_core::error::EngineErrorCode;

    #[test]
    fn envelope_omits_correlation_id_when_absent() {
        let envelope = ApiErrorEnvelope::new("validation_error", "bad input", "req-1");
        let value = envelope.to_value();
        assert!(value.get("correlation_id").is_none());
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["details"], json!({}));
    }

    #[test]
    fn envelope_includes_correlation_id_when_set() {
        let envelope = ApiErrorEnvelope::new("validation_error", "bad input", "req-1")
            .with_correlation_id("corr-9");
        let value = envelope.to_value();
        assert_eq!(value["correlation_id"], "corr-9");
    }

    #[test]
    fn from_engine_error_carries_code_and_message() {
        let err = EngineError::new(EngineErrorCode::CompatibilityBlocked, "dangling connector");
        let envelope: ApiErrorEnvelope = err.into();
        assert_eq!(envelope.error.code, "compatibility_blocked");
        assert_eq!(envelope.error.message, "dangling connector");
        assert!(!envelope.error.request_id.is_empty());
    }
}
