//! Runtime for executing chat turns
//!
//! Each turn runs as its own task. Turns on the same thread are serialized
//! through a per-thread lock; different threads run fully in parallel.

pub mod events;
mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use events::{EventEmitter, TurnEvent};
pub use executor::TurnExecutor;
pub use traits::*;

use crate::db::{DbError, DbResult, Message, MessageContent, ThreadState};
use crate::llm::LlmError;
use crate::state_machine::TransitionError;
use crate::workflow::WorkflowCompiler;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Engine over a type-erased store, as shared with the HTTP layer
pub type DynEngine = ChatEngine<Arc<dyn CheckpointStore>>;

pub const DEFAULT_MAX_ROUND_TRIPS: usize = 25;
pub const DEFAULT_EVENT_BUFFER: usize = 64;

/// Turn-level failures, reported once through the terminal `end` record
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(#[from] LlmError),
    #[error("Persistence failed: {0}")]
    Persistence(#[from] DbError),
    #[error("Exceeded {0} model/tool round trips")]
    RoundTripLimit(usize),
    #[error("Turn cancelled")]
    Cancelled,
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Upper bound on TOOLS steps within one turn
    pub max_round_trips: usize,
    /// Capacity of each turn's event channel
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// One incoming human message
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub content: MessageContent,
    pub tool_ids: Vec<String>,
    pub model: Option<String>,
}

type ThreadLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Entry point for running turns and reading thread state
pub struct ChatEngine<S: CheckpointStore + Clone + 'static> {
    store: S,
    compiler: Arc<WorkflowCompiler>,
    config: EngineConfig,
    thread_locks: Arc<ThreadLocks>,
}

impl<S: CheckpointStore + Clone + 'static> ChatEngine<S> {
    pub fn new(store: S, compiler: Arc<WorkflowCompiler>, config: EngineConfig) -> Self {
        Self {
            store,
            compiler,
            config,
            thread_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn compiler(&self) -> &Arc<WorkflowCompiler> {
        &self.compiler
    }

    /// Start a turn in the background and return its event stream.
    ///
    /// The stream always ends with exactly one `end` record unless `cancel`
    /// fires (or the receiver is dropped) first.
    pub fn start_turn(
        &self,
        request: TurnRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<TurnEvent> {
        let (emitter, rx) = EventEmitter::channel(self.config.event_buffer, cancel.clone());
        let store = self.store.clone();
        let compiler = self.compiler.clone();
        let locks = self.thread_locks.clone();
        let max_round_trips = self.config.max_round_trips;

        tokio::spawn(async move {
            let thread_id = request.thread_id.clone();
            let lock = thread_lock(&locks, &thread_id);
            let guard = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                guard = lock.clone().lock_owned() => Some(guard),
            };

            if let Some(_guard) = guard {
                tracing::info!(
                    thread_id = %thread_id,
                    model = ?request.model,
                    tools = ?request.tool_ids,
                    "Starting turn"
                );
                match compiler.get_or_compile(request.model.as_deref(), &request.tool_ids) {
                    Ok(workflow) => {
                        let executor = TurnExecutor::new(
                            store,
                            workflow,
                            thread_id.clone(),
                            emitter,
                            cancel,
                            max_round_trips,
                        );
                        executor.run(Message::human(request.content)).await;
                    }
                    Err(e) => {
                        let error = TurnError::ModelUnavailable(e);
                        tracing::error!(thread_id = %thread_id, error = %error, "Turn failed");
                        let _ = emitter
                            .emit(TurnEvent::failure(&thread_id, error.to_string()))
                            .await;
                    }
                }
            }

            drop(lock);
            release_thread_lock(&locks, &thread_id);
        });

        rx
    }

    /// Full history of a thread; unknown ids yield an empty thread
    pub async fn history(&self, thread_id: &str) -> DbResult<ThreadState> {
        self.store.load(thread_id).await
    }

    /// Delete a thread once any in-flight turn on it has finished
    pub async fn delete_thread(&self, thread_id: &str) -> DbResult<bool> {
        let lock = thread_lock(&self.thread_locks, thread_id);
        let deleted = {
            let _guard = lock.lock().await;
            self.store.delete(thread_id).await
        };
        drop(lock);
        release_thread_lock(&self.thread_locks, thread_id);
        deleted
    }
}

fn thread_lock(locks: &ThreadLocks, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
    locks
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(thread_id.to_string())
        .or_default()
        .clone()
}

/// Drop the thread's lock entry when nobody else holds or awaits it
fn release_thread_lock(locks: &ThreadLocks, thread_id: &str) {
    let mut locks = locks.lock().unwrap_or_else(PoisonError::into_inner);
    if locks
        .get(thread_id)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(thread_id);
    }
}
