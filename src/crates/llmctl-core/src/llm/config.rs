//! Request configuration for chat-model calls.

use crate::llm::tools::ToolDefinition;
use crate::messages::Message;
use serde::{Deserialize, Serialize};

/// A request to a chat model: messages plus generation configuration.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub config: ChatConfig,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            config: ChatConfig::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_reasoning(mut self, mode: ReasoningMode) -> Self {
        self.config.reasoning_mode = mode;
        self
    }

    pub fn with_stop_sequences(mut self, sequences: Vec<String>) -> Self {
        self.config.stop_sequences = sequences;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.config.tools = tools;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.config.top_p = Some(top_p);
        self
    }
}

/// Generation parameters. Not every provider honors every field.
#[derive(Debug, Clone, Default)]
pub struct ChatConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub reasoning_mode: ReasoningMode,
    pub stop_sequences: Vec<String>,
    pub tools: Vec<ToolDefinition>,
    pub top_p: Option<f32>,
}

/// How a provider adapter should surface a thinking model's reasoning trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningMode {
    /// Drop reasoning content entirely; `response.reasoning` is `None`.
    Disabled,
    /// Provider default: reasoning may end up in message content or metadata.
    #[default]
    Default,
    /// Extract reasoning into `response.reasoning`, separate from the answer.
    Separated,
    /// Request deeper reasoning where the provider supports it; falls back
    /// to `Separated` behavior otherwise.
    Extended,
}

impl ReasoningMode {
    pub fn should_capture(&self) -> bool {
        matches!(self, ReasoningMode::Separated | ReasoningMode::Extended)
    }
}
