//! Turn events streamed to the client
//!
//! Each turn owns one ordered channel. The executor is the only writer, the
//! transport drains it as newline-delimited JSON.

use crate::db::{Message, ToolCall};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Terminal status of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndStatus {
    Success,
    Error,
}

/// One record of the turn stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Incremental model output
    Chunk { content: String },
    /// Tool-call intents detected in the latest assistant message
    ToolCalls { tool_calls: Vec<ToolCall> },
    /// A resolved tool call
    ToolResult { name: String, data: Value },
    /// A failed tool call
    ToolError { name: String, data: Value },
    /// Exactly one per turn, always last
    End {
        status: EndStatus,
        thread_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
        #[serde(skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<Message>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl TurnEvent {
    /// Result or error record for a resolved call
    pub fn for_resolved_call(call: &ToolCall) -> Self {
        match (&call.error, &call.output) {
            (Some(error), _) => TurnEvent::ToolError {
                name: call.name.clone(),
                data: json!({ "id": call.id, "args": call.args, "error": error }),
            },
            (None, output) => TurnEvent::ToolResult {
                name: call.name.clone(),
                data: json!({ "id": call.id, "args": call.args, "output": output }),
            },
        }
    }

    pub fn success(thread_id: impl Into<String>, message: Message, messages: Vec<Message>) -> Self {
        TurnEvent::End {
            status: EndStatus::Success,
            thread_id: thread_id.into(),
            message: Some(message),
            messages: Some(messages),
            error: None,
        }
    }

    pub fn failure(thread_id: impl Into<String>, error: impl Into<String>) -> Self {
        TurnEvent::End {
            status: EndStatus::Error,
            thread_id: thread_id.into(),
            message: None,
            messages: None,
            error: Some(error.into()),
        }
    }

    /// Serialize as one NDJSON line, newline included
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Receiver went away; the turn should stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Writer half of a turn's event channel
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<TurnEvent>,
    cancel: CancellationToken,
}

impl EventEmitter {
    pub fn channel(
        buffer: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<TurnEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx, cancel }, rx)
    }

    /// Send in order. A closed channel means the client is gone, which
    /// cancels the turn.
    pub async fn emit(&self, event: TurnEvent) -> Result<(), Disconnected> {
        if self.cancel.is_cancelled() {
            return Err(Disconnected);
        }
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Event receiver dropped, cancelling turn");
            self.cancel.cancel();
            return Err(Disconnected);
        }
        Ok(())
    }
}
