//! Common types for LLM interactions

use crate::db::{Message, MessageContent, ToolCall};

/// LLM request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Tool definition offered to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Complete model response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    /// Tool-call intents, all pending
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

impl LlmResponse {
    #[cfg(test)]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            usage: Usage::default(),
        }
    }

    /// Turn the response into an assistant message for the thread
    pub fn into_message(self) -> Message {
        Message::assistant(MessageContent::Text(self.content), self.tool_calls)
    }
}

/// Incremental output of a streamed completion
///
/// Concatenating every `TextDelta` in order yields `Completed.content`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    Completed(LlmResponse),
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
