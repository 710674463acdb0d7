//! Turn executor
//!
//! Walks the compiled workflow's graph for one turn: append the human
//! message, then alternate MODEL and TOOLS until the transition function says
//! DONE. Every step is checkpointed before its events are emitted, and nothing
//! is written once the turn is cancelled.

use super::events::{Disconnected, EventEmitter, TurnEvent};
use super::traits::CheckpointStore;
use super::TurnError;
use crate::db::{unanswered_tool_calls, Message, ThreadState, ToolCall};
use crate::llm::{LlmError, StreamEvent};
use crate::state_machine::{transition, TurnState};
use crate::tools::ToolContext;
use crate::workflow::CompiledWorkflow;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Error recorded on calls still pending when the round-trip cap is hit
pub const ROUND_TRIP_LIMIT_MESSAGE: &str = "Round-trip limit exceeded";

/// Error recorded on calls an earlier turn left unanswered
pub const INTERRUPTED_CALL_MESSAGE: &str = "Tool execution interrupted before completion";

impl From<Disconnected> for TurnError {
    fn from(_: Disconnected) -> Self {
        TurnError::Cancelled
    }
}

/// Runs a single turn against one thread
pub struct TurnExecutor<S: CheckpointStore> {
    store: S,
    workflow: Arc<CompiledWorkflow>,
    thread_id: String,
    emitter: EventEmitter,
    cancel: CancellationToken,
    max_round_trips: usize,
}

impl<S: CheckpointStore> TurnExecutor<S> {
    pub fn new(
        store: S,
        workflow: Arc<CompiledWorkflow>,
        thread_id: impl Into<String>,
        emitter: EventEmitter,
        cancel: CancellationToken,
        max_round_trips: usize,
    ) -> Self {
        Self {
            store,
            workflow,
            thread_id: thread_id.into(),
            emitter,
            cancel,
            max_round_trips,
        }
    }

    /// Run the turn to completion and emit the terminal record
    pub async fn run(self, human: Message) {
        match self.drive(human).await {
            Ok(thread) => {
                let final_message = thread.last().cloned();
                tracing::info!(
                    thread_id = %self.thread_id,
                    messages = thread.messages.len(),
                    "Turn completed"
                );
                if let Some(message) = final_message {
                    let _ = self
                        .emitter
                        .emit(TurnEvent::success(&self.thread_id, message, thread.messages))
                        .await;
                }
            }
            Err(TurnError::Cancelled) => {
                tracing::info!(thread_id = %self.thread_id, "Turn cancelled");
            }
            Err(e) => {
                tracing::error!(thread_id = %self.thread_id, error = %e, "Turn failed");
                let _ = self
                    .emitter
                    .emit(TurnEvent::failure(&self.thread_id, e.to_string()))
                    .await;
            }
        }
    }

    async fn drive(&self, human: Message) -> Result<ThreadState, TurnError> {
        let mut thread = self.store.load(&self.thread_id).await?;
        self.ensure_active()?;
        let settled = self
            .settle_unanswered(&mut thread, INTERRUPTED_CALL_MESSAGE)
            .await?;
        if !settled.is_empty() {
            tracing::warn!(
                thread_id = %self.thread_id,
                calls = settled.len(),
                "Answered tool calls left over from an earlier turn"
            );
        }
        self.store
            .append(&self.thread_id, std::slice::from_ref(&human))
            .await?;
        thread.messages.push(human);

        let shape = self.workflow.graph.shape();
        let mut state = TurnState::Model;
        let mut round_trips = 0;

        while !state.is_terminal() {
            match state {
                TurnState::Model => self.model_step(&mut thread).await?,
                TurnState::Tools => {
                    round_trips += 1;
                    if round_trips > self.max_round_trips {
                        let settled = self
                            .settle_unanswered(&mut thread, ROUND_TRIP_LIMIT_MESSAGE)
                            .await?;
                        for call in &settled {
                            self.emitter.emit(TurnEvent::for_resolved_call(call)).await?;
                        }
                        return Err(TurnError::RoundTripLimit(self.max_round_trips));
                    }
                    self.tools_step(&mut thread).await?;
                }
                TurnState::Done => {}
            }
            let next = transition(shape, state, thread.last())?;
            tracing::debug!(thread_id = %self.thread_id, from = %state, to = %next, "Transition");
            state = next;
        }

        Ok(thread)
    }

    fn ensure_active(&self) -> Result<(), TurnError> {
        if self.cancel.is_cancelled() {
            Err(TurnError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// MODEL: stream a completion, persist it, announce any tool calls
    async fn model_step(&self, thread: &mut ThreadState) -> Result<(), TurnError> {
        let adapter = &self.workflow.adapter;
        let mut stream = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(TurnError::Cancelled),
            result = adapter.stream_invoke(&thread.messages) => result?,
        };

        let mut completed = None;
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(TurnError::Cancelled),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(StreamEvent::TextDelta(content))) => {
                    self.emitter.emit(TurnEvent::Chunk { content }).await?;
                }
                Some(Ok(StreamEvent::Completed(response))) => {
                    completed = Some(response);
                    break;
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        let response = completed
            .ok_or_else(|| LlmError::unknown("Model stream ended without a completion"))?;
        let message = response.into_message();

        self.ensure_active()?;
        self.store
            .append(&self.thread_id, std::slice::from_ref(&message))
            .await?;

        let pending: Vec<ToolCall> = message.pending_tool_calls().into_iter().cloned().collect();
        thread.messages.push(message);

        if !pending.is_empty() {
            tracing::info!(
                thread_id = %self.thread_id,
                model = %adapter.model_id(),
                calls = pending.len(),
                "Model requested tools"
            );
            self.emitter
                .emit(TurnEvent::ToolCalls {
                    tool_calls: pending,
                })
                .await?;
        }
        Ok(())
    }

    /// TOOLS: resolve every pending call concurrently, then persist the
    /// updated assistant message and one tool message per call
    async fn tools_step(&self, thread: &mut ThreadState) -> Result<(), TurnError> {
        let Some(mut assistant) = thread.last().cloned() else {
            return Ok(());
        };

        let pending: Vec<ToolCall> = assistant.pending_tool_calls().into_iter().cloned().collect();
        let resolved: Vec<ToolCall> =
            futures::future::join_all(pending.into_iter().map(|call| self.execute_call(call)))
                .await;

        self.ensure_active()?;

        for call in &mut assistant.tool_calls {
            if let Some(done) = resolved.iter().find(|r| r.id == call.id) {
                call.clone_from(done);
            }
        }
        self.persist_resolved(thread, assistant, &resolved).await?;

        for call in &resolved {
            self.emitter.emit(TurnEvent::for_resolved_call(call)).await?;
        }
        Ok(())
    }

    /// Store the updated assistant message, then one tool message per call
    async fn persist_resolved(
        &self,
        thread: &mut ThreadState,
        assistant: Message,
        resolved: &[ToolCall],
    ) -> Result<(), TurnError> {
        self.store.replace_last(&self.thread_id, &assistant).await?;
        thread.replace_last(assistant);

        let tool_messages: Vec<Message> = resolved.iter().map(Message::tool_result).collect();
        self.store.append(&self.thread_id, &tool_messages).await?;
        thread.messages.extend(tool_messages);
        Ok(())
    }

    /// Answer the calls of the latest assistant message that no tool message
    /// answers yet. Calls still pending get `reason` as their error.
    ///
    /// Returns the calls that were answered, in the order the model listed them.
    async fn settle_unanswered(
        &self,
        thread: &mut ThreadState,
        reason: &str,
    ) -> Result<Vec<ToolCall>, TurnError> {
        let Some(last_index) = thread.messages.len().checked_sub(1) else {
            return Ok(Vec::new());
        };
        let (latest, earlier): (Vec<_>, Vec<_>) = unanswered_tool_calls(&thread.messages)
            .into_iter()
            .partition(|(index, _)| *index == last_index);
        if !earlier.is_empty() {
            // Only startup repair rewrites messages behind the latest one
            tracing::warn!(
                thread_id = %self.thread_id,
                calls = earlier.len(),
                "Unanswered tool calls behind later messages"
            );
        }
        let Some(mut assistant) = thread.last().cloned().filter(|_| !latest.is_empty()) else {
            return Ok(Vec::new());
        };

        let mut settled = Vec::with_capacity(latest.len());
        for call in &mut assistant.tool_calls {
            if !latest.iter().any(|(_, id)| *id == call.id) {
                continue;
            }
            if call.is_pending() {
                call.error = Some(reason.to_string());
            }
            settled.push(call.clone());
        }

        self.ensure_active()?;
        self.persist_resolved(thread, assistant, &settled).await?;
        Ok(settled)
    }

    /// Run one tool call. Never fails: every problem becomes the call's error.
    async fn execute_call(&self, call: ToolCall) -> ToolCall {
        let Some(tool) = self.workflow.graph.tool(&call.name) else {
            tracing::warn!(tool = %call.name, id = %call.id, "Model called an unbound tool");
            let error = format!("Unknown tool: {}", call.name);
            return call.with_error(error);
        };

        let child = self.cancel.child_token();
        let ctx = ToolContext::new(child.clone(), self.thread_id.clone());
        let handler = tool.handler.clone();
        let input = Value::Object(call.args.clone());
        let started = std::time::Instant::now();

        let mut task = tokio::spawn(async move { handler.run(input, ctx).await });

        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                child.cancel();
                task.abort();
                return call.with_error("Tool execution cancelled");
            }
            outcome = tokio::time::timeout(tool.timeout, &mut task) => outcome,
        };

        let duration_ms = started.elapsed().as_millis();
        match outcome {
            Ok(Ok(output)) if output.success => {
                tracing::info!(tool = %tool.id, id = %call.id, duration_ms = %duration_ms, "Tool succeeded");
                call.with_output(Value::String(output.output))
            }
            Ok(Ok(output)) => {
                tracing::warn!(tool = %tool.id, id = %call.id, duration_ms = %duration_ms, error = %output.output, "Tool failed");
                call.with_error(output.output)
            }
            Ok(Err(join_error)) => {
                tracing::error!(tool = %tool.id, id = %call.id, error = %join_error, "Tool task crashed");
                call.with_error(format!("Tool '{}' crashed: {join_error}", tool.name))
            }
            Err(_) => {
                child.cancel();
                task.abort();
                tracing::warn!(tool = %tool.id, id = %call.id, timeout_ms = %tool.timeout.as_millis(), "Tool timed out");
                let error = format!(
                    "Tool '{}' timed out after {}ms",
                    tool.name,
                    tool.timeout.as_millis()
                );
                call.with_error(error)
            }
        }
    }
}
