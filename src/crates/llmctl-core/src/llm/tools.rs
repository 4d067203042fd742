//! Tool/function calling types shared by provider adapters and node runtime.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Definition of a tool a model may call, described as a JSON Schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<JsonValue>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: JsonValue) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// A tool invocation a model requested in its response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: JsonValue,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of actually executing a `ToolCall`, fed back as a tool message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(call_id: impl Into<String>, result: JsonValue) -> Self {
        Self {
            call_id: call_id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"error":"failed to serialize tool result"}"#.to_string())
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_result_success_round_trips_to_json() {
        let result = ToolResult::success("call_1", json!({"answer": 42}));
        let json_str = result.to_json_string();
        assert!(json_str.contains("call_1"));
        assert!(result.is_success());
    }

    #[test]
    fn tool_result_error_has_no_result() {
        let result = ToolResult::error("call_2", "division by zero");
        assert!(!result.is_success());
        assert_eq!(result.error.as_deref(), Some("division by zero"));
    }
}
