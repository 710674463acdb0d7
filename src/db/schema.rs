//! Database schema and thread data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// SQL schema for initialization
///
/// Every statement is `IF NOT EXISTS` so opening an existing file is a no-op.
pub const SCHEMA: &str = r"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS threads (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    thread_id TEXT NOT NULL,
    sequence_id INTEGER NOT NULL,
    message_id TEXT NOT NULL,
    role TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    PRIMARY KEY (thread_id, sequence_id),
    FOREIGN KEY (thread_id) REFERENCES threads(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_message_id ON messages(thread_id, message_id);
";

/// Who authored a message. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Human,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message body: plain text or an ordered list of blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(s: impl Into<String>) -> Self {
        MessageContent::Text(s.into())
    }

    /// Concatenated text of the message, images skipped
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

/// One block of a multi-part message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Image reference, either an https URL or a `data:` URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A model-issued intent to call a named capability
///
/// Pending until exactly one of `output` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
            output: None,
            error: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.output.is_none() && self.error.is_none()
    }

    #[must_use]
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self.error = None;
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.output = None;
        self
    }

    /// Text handed back to the model for this call
    pub fn result_text(&self) -> String {
        match (&self.output, &self.error) {
            (_, Some(error)) => error.clone(),
            (Some(Value::String(s)), None) => s.clone(),
            (Some(other), None) => other.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// A single entry in a thread. Immutable once appended, except that the
/// latest revision of an assistant message may replace its predecessor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool messages: the call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on tool messages: the capability name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: MessageContent) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            created_at: Utc::now(),
        }
    }

    pub fn human(content: MessageContent) -> Self {
        Self::with_role(Role::Human, content)
    }

    pub fn assistant(content: MessageContent, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::with_role(Role::Assistant, content);
        message.tool_calls = tool_calls;
        message
    }

    /// Tool message answering a resolved call
    pub fn tool_result(call: &ToolCall) -> Self {
        let mut message = Self::with_role(Role::Tool, MessageContent::Text(call.result_text()));
        message.tool_call_id = Some(call.id.clone());
        message.name = Some(call.name.clone());
        message
    }

    /// Tool calls still waiting for a result
    pub fn pending_tool_calls(&self) -> Vec<&ToolCall> {
        self.tool_calls.iter().filter(|c| c.is_pending()).collect()
    }

    pub fn has_pending_tool_calls(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.iter().any(ToolCall::is_pending)
    }
}

/// Full ordered history of one thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: String,
    pub messages: Vec<Message>,
}

impl ThreadState {
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replace the most recent message, which must carry the same id
    pub fn replace_last(&mut self, message: Message) -> bool {
        match self.messages.last_mut() {
            Some(last) if last.id == message.id => {
                *last = message;
                true
            }
            _ => false,
        }
    }
}

/// Tool call ids listed by assistant messages that no tool message answers
pub fn unanswered_tool_calls(messages: &[Message]) -> Vec<(usize, String)> {
    let mut pending: Vec<(usize, String)> = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        match message.role {
            Role::Assistant => {
                pending.extend(message.tool_calls.iter().map(|c| (index, c.id.clone())));
            }
            Role::Tool => {
                if let Some(answered) = &message.tool_call_id {
                    pending.retain(|(_, id)| id != answered);
                }
            }
            Role::Human => {}
        }
    }
    pending
}
