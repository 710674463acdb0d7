//! Mock implementations for testing
//!
//! These mocks enable engine and API tests without a provider or a database.

use super::traits::CheckpointStore;
use super::{ChatEngine, DynEngine, EngineConfig, TurnEvent};
use crate::db::{DbError, DbResult, Message, ThreadState};
use crate::llm::{LlmError, LlmRequest, LlmResponse, LlmService, ModelRegistry};
use crate::tools::{
    CapabilityRegistry, CapabilitySpec, Tool, ToolContext, ToolOutput, DEFAULT_TOOL_TIMEOUT,
};
use crate::workflow::{WorkflowCompiler, DEFAULT_CACHE_CAPACITY};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

// ============================================================================
// Mock LLM Service
// ============================================================================

/// Mock LLM service that returns queued responses
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    model_id: String,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlmService {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            model_id: model_id.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_response(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.next_response(request)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ============================================================================
// Delayed Mock LLM Service (for cancellation testing)
// ============================================================================

/// Mock LLM service with configurable delay
pub struct DelayedMockLlmService {
    inner: MockLlmService,
    delay: Duration,
    /// Notified when a request starts
    pub request_started: Arc<Notify>,
}

impl DelayedMockLlmService {
    pub fn new(model_id: impl Into<String>, delay: Duration) -> Self {
        Self {
            inner: MockLlmService::new(model_id),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, response: LlmResponse) {
        self.inner.queue_response(response);
    }
}

#[async_trait]
impl LlmService for DelayedMockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.next_response(request)
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}

// ============================================================================
// Mock Tools
// ============================================================================

/// Tool that always succeeds with a fixed output
pub struct StaticTool {
    name: String,
    output: String,
    /// Inputs seen, in call order
    pub calls: Mutex<Vec<Value>>,
}

impl StaticTool {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: output.into(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> String {
        format!("Mock {}", self.name)
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, input: Value, _ctx: ToolContext) -> ToolOutput {
        self.calls.lock().unwrap().push(input);
        ToolOutput::success(self.output.clone())
    }
}

/// Tool whose handler always reports failure
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "failing"
    }

    fn description(&self) -> String {
        "Always fails".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn run(&self, _input: Value, _ctx: ToolContext) -> ToolOutput {
        ToolOutput::error("handler exploded")
    }
}

/// Tool that panics inside its handler
pub struct PanickingTool;

#[async_trait]
impl Tool for PanickingTool {
    fn name(&self) -> &str {
        "panicking"
    }

    fn description(&self) -> String {
        "Panics".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn run(&self, _input: Value, _ctx: ToolContext) -> ToolOutput {
        panic!("tool panicked");
    }
}

/// Tool that sleeps, ignoring cancellation
pub struct SlowTool {
    pub delay: Duration,
    /// Notified when the handler starts
    pub started: Arc<Notify>,
    pub finished: Arc<AtomicBool>,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            started: Arc::new(Notify::new()),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> String {
        "Takes a while".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn run(&self, _input: Value, _ctx: ToolContext) -> ToolOutput {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.finished.store(true, Ordering::SeqCst);
        ToolOutput::success("finally")
    }
}

// ============================================================================
// In-Memory Checkpointer
// ============================================================================

/// In-memory checkpoint store for testing
#[derive(Default)]
pub struct InMemoryCheckpointer {
    threads: Mutex<HashMap<String, Vec<Message>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following append/replace fail
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn messages(&self, thread_id: &str) -> Vec<Message> {
        self.threads
            .lock()
            .unwrap()
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    fn check_writable(&self) -> DbResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::Sqlite(rusqlite::Error::InvalidQuery));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointer {
    async fn load(&self, thread_id: &str) -> DbResult<ThreadState> {
        Ok(ThreadState {
            thread_id: thread_id.to_string(),
            messages: self.messages(thread_id),
        })
    }

    async fn append(&self, thread_id: &str, messages: &[Message]) -> DbResult<()> {
        self.check_writable()?;
        self.threads
            .lock()
            .unwrap()
            .entry(thread_id.to_string())
            .or_default()
            .extend_from_slice(messages);
        Ok(())
    }

    async fn replace_last(&self, thread_id: &str, message: &Message) -> DbResult<()> {
        self.check_writable()?;
        let mut threads = self.threads.lock().unwrap();
        let last = threads
            .get_mut(thread_id)
            .and_then(|messages| messages.last_mut())
            .filter(|last| last.id == message.id)
            .ok_or_else(|| DbError::MessageNotFound(message.id.clone()))?;
        *last = message.clone();
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> DbResult<bool> {
        Ok(self.threads.lock().unwrap().remove(thread_id).is_some())
    }
}

// ============================================================================
// Test Engine
// ============================================================================

/// Engine wired to in-memory storage, a mock model, and the given tools
pub struct TestHarness {
    pub engine: DynEngine,
    pub store: Arc<InMemoryCheckpointer>,
    pub capabilities: Arc<CapabilityRegistry>,
}

impl TestHarness {
    pub fn new(model: Arc<dyn LlmService>, tools: Vec<CapabilitySpec>) -> Self {
        Self::with_config(model, tools, EngineConfig::default())
    }

    pub fn with_config(
        model: Arc<dyn LlmService>,
        tools: Vec<CapabilitySpec>,
        config: EngineConfig,
    ) -> Self {
        let models = Arc::new(ModelRegistry::new_empty());
        models.register(model);

        let capabilities = Arc::new(CapabilityRegistry::new(DEFAULT_TOOL_TIMEOUT));
        for spec in tools {
            capabilities.register(spec).unwrap();
        }

        let compiler = Arc::new(WorkflowCompiler::new(
            capabilities.clone(),
            models,
            DEFAULT_CACHE_CAPACITY,
        ));
        let store = Arc::new(InMemoryCheckpointer::new());
        let shared: Arc<dyn CheckpointStore> = store.clone();
        Self {
            engine: ChatEngine::new(shared, compiler, config),
            store,
            capabilities,
        }
    }
}

/// Drain a turn's events until the channel closes
pub async fn collect_events(mut rx: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// Wire type of each event, for order assertions
pub fn event_types(events: &[TurnEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|e| match e {
            TurnEvent::Chunk { .. } => "chunk",
            TurnEvent::ToolCalls { .. } => "tool_calls",
            TurnEvent::ToolResult { .. } => "tool_result",
            TurnEvent::ToolError { .. } => "tool_error",
            TurnEvent::End { .. } => "end",
        })
        .collect()
}
