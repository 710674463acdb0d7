//! Workflow compiler
//!
//! A compiled workflow is the immutable plan for a `(model, tool set)` pair:
//! the model adapter bound to the resolved tools, plus the graph shape the
//! executor walks. It holds no per-thread data and is shared by every turn
//! that asks for the same key.

mod cache;

pub use cache::{WorkflowCache, DEFAULT_CACHE_CAPACITY};

use crate::llm::{LlmError, ModelAdapter, ModelRegistry, ToolDefinition};
use crate::state_machine::GraphShape;
use crate::tools::{CapabilityRegistry, Tool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Cache key: resolved model id plus the sorted, deduplicated tool ids
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowKey {
    pub model_id: String,
    pub tool_ids: Vec<String>,
}

impl WorkflowKey {
    pub fn new(model_id: impl Into<String>, tool_ids: &[String]) -> Self {
        let mut tool_ids = tool_ids.to_vec();
        tool_ids.sort();
        tool_ids.dedup();
        Self {
            model_id: model_id.into(),
            tool_ids,
        }
    }

    pub fn cache_key(&self) -> String {
        format!("{}|{}", self.model_id, self.tool_ids.join(","))
    }
}

/// A capability as bound into a compiled workflow
#[derive(Clone)]
pub struct BoundTool {
    pub id: String,
    pub name: String,
    pub timeout: Duration,
    pub handler: Arc<dyn Tool>,
}

/// Graph shape fixed at compile time
#[derive(Clone)]
pub enum WorkflowGraph {
    /// `MODEL -> DONE`; no tools state exists
    ModelOnly,
    /// `MODEL <-> TOOLS -> DONE`, tools keyed by the name the model calls
    ModelWithTools { tools: HashMap<String, BoundTool> },
}

impl WorkflowGraph {
    pub fn shape(&self) -> GraphShape {
        match self {
            WorkflowGraph::ModelOnly => GraphShape::ModelOnly,
            WorkflowGraph::ModelWithTools { .. } => GraphShape::ModelWithTools,
        }
    }

    pub fn tool(&self, name: &str) -> Option<&BoundTool> {
        match self {
            WorkflowGraph::ModelOnly => None,
            WorkflowGraph::ModelWithTools { tools } => tools.get(name),
        }
    }
}

/// Immutable execution plan shared by every thread using the same key
pub struct CompiledWorkflow {
    pub key: WorkflowKey,
    pub adapter: ModelAdapter,
    pub graph: WorkflowGraph,
}

impl std::fmt::Debug for CompiledWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledWorkflow")
            .field("key", &self.key.cache_key())
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}

/// Builds and caches compiled workflows
pub struct WorkflowCompiler {
    capabilities: Arc<CapabilityRegistry>,
    models: Arc<ModelRegistry>,
    cache: WorkflowCache<Arc<CompiledWorkflow>>,
}

impl WorkflowCompiler {
    pub fn new(
        capabilities: Arc<CapabilityRegistry>,
        models: Arc<ModelRegistry>,
        cache_capacity: usize,
    ) -> Self {
        let cache = WorkflowCache::new(cache_capacity);
        tracing::debug!(capacity = cache.capacity(), "Workflow cache ready");
        Self {
            capabilities,
            models,
            cache,
        }
    }

    pub fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        &self.capabilities
    }

    /// Return the cached workflow for this model and tool set, compiling it
    /// on a miss. Concurrent misses on one key may both compile; the last
    /// insert wins.
    pub fn get_or_compile(
        &self,
        model_id: Option<&str>,
        tool_ids: &[String],
    ) -> Result<Arc<CompiledWorkflow>, LlmError> {
        let service = self.models.resolve(model_id)?;
        let key = WorkflowKey::new(service.model_id(), tool_ids);
        let cache_key = key.cache_key();

        if let Some(hit) = self.cache.get(&cache_key) {
            tracing::debug!(key = %cache_key, "Workflow cache hit");
            return Ok(hit);
        }

        let mut bound = HashMap::new();
        let mut definitions = Vec::new();
        for id in &key.tool_ids {
            let Some(capability) = self.capabilities.get(id) else {
                tracing::warn!(tool = %id, "Skipping unknown tool");
                continue;
            };
            if !capability.enabled {
                tracing::info!(tool = %id, "Skipping disabled tool");
                continue;
            }
            definitions.push(ToolDefinition {
                name: capability.name.clone(),
                description: capability.description.clone(),
                input_schema: capability.input_schema.clone(),
            });
            bound.insert(
                capability.name.clone(),
                BoundTool {
                    id: capability.id,
                    name: capability.name,
                    timeout: capability.timeout,
                    handler: capability.handler,
                },
            );
        }

        let graph = if bound.is_empty() {
            WorkflowGraph::ModelOnly
        } else {
            WorkflowGraph::ModelWithTools { tools: bound }
        };
        let workflow = Arc::new(CompiledWorkflow {
            adapter: ModelAdapter::new(service).bind_tools(definitions),
            graph,
            key,
        });

        tracing::info!(
            key = %cache_key,
            tools = workflow.adapter.tools().len(),
            "Compiled workflow"
        );
        self.cache.insert(cache_key, workflow.clone());
        Ok(workflow)
    }

    #[cfg(test)]
    pub fn is_cached(&self, key: &WorkflowKey) -> bool {
        self.cache.contains(&key.cache_key())
    }
}
