//! Model adapter: a resolved service optionally bound to a tool set

#[cfg(test)]
use super::LlmResponse;
use super::{LlmError, LlmRequest, LlmService, LlmStream, StreamEvent, ToolDefinition};
use crate::db::Message;
use futures::StreamExt;
use std::sync::Arc;

/// Chat model with the capabilities it may call
///
/// An unbound adapter never offers tools to the provider, and drops any tool
/// calls the provider returns anyway.
#[derive(Clone)]
pub struct ModelAdapter {
    service: Arc<dyn LlmService>,
    tools: Vec<ToolDefinition>,
}

impl ModelAdapter {
    pub fn new(service: Arc<dyn LlmService>) -> Self {
        Self {
            service,
            tools: Vec::new(),
        }
    }

    #[must_use]
    pub fn bind_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn is_bound(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn model_id(&self) -> &str {
        self.service.model_id()
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    fn request(&self, messages: &[Message]) -> LlmRequest {
        LlmRequest {
            messages: messages.to_vec(),
            tools: self.tools.clone(),
        }
    }

    /// Run one completion over the conversation
    #[cfg(test)]
    pub async fn invoke(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        let mut response = self.service.complete(&self.request(messages)).await?;
        if !self.is_bound() {
            response.tool_calls.clear();
        }
        Ok(response)
    }

    /// Run one streamed completion over the conversation
    pub async fn stream_invoke(&self, messages: &[Message]) -> Result<LlmStream, LlmError> {
        let stream = self.service.stream(&self.request(messages)).await?;
        if self.is_bound() {
            return Ok(stream);
        }
        Ok(Box::pin(stream.map(|event| match event {
            Ok(StreamEvent::Completed(mut response)) => {
                response.tool_calls.clear();
                Ok(StreamEvent::Completed(response))
            }
            other => other,
        })))
    }
}

impl std::fmt::Debug for ModelAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAdapter")
            .field("model", &self.service.model_id())
            .field("tools", &self.tools.len())
            .finish()
    }
}
