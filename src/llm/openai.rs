//! `OpenAI`-compatible chat completions provider

use super::types::{LlmRequest, LlmResponse, StreamEvent, ToolDefinition, Usage};
use super::{LlmError, LlmService, LlmStream};
use crate::db::{ContentPart, Message, MessageContent, Role, ToolCall};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Connection settings for one model
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
}

/// Chat completions service for `OpenAI` and compatible endpoints
pub struct OpenAIService {
    client: Client,
    config: OpenAIConfig,
    url: String,
}

impl OpenAIService {
    pub fn new(config: OpenAIConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;
        let url = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        Ok(Self {
            client,
            config,
            url,
        })
    }

    fn translate_request(&self, request: &LlmRequest, stream: bool) -> OpenAIRequest {
        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(OpenAITool::from).collect())
        };

        OpenAIRequest {
            model: self.config.model.clone(),
            messages: request.messages.iter().map(translate_message).collect(),
            tools,
            temperature: self.config.temperature,
            stream,
            stream_options: stream.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn send(&self, body: &OpenAIRequest) -> Result<reqwest::Response, LlmError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<OpenAIErrorResponse>(&body)
            .map_or(body, |e| e.error.message);
        Err(LlmError::from_status(status.as_u16(), &message))
    }
}

#[async_trait]
impl LlmService for OpenAIService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let response = self.send(&self.translate_request(request, false)).await?;
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network(format!("Failed to read response: {e}")))?;
        let parsed: OpenAIResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::unknown(format!("Failed to parse response: {e} - body: {body}"))
        })?;
        normalize_response(parsed)
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        let response = self.send(&self.translate_request(request, true)).await?;
        Ok(Box::pin(parse_sse(response.bytes_stream())))
    }

    fn model_id(&self) -> &str {
        &self.config.model
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::network(format!("Request timeout: {e}"))
    } else if e.is_connect() {
        LlmError::network(format!("Connection failed: {e}"))
    } else {
        LlmError::unknown(format!("Request failed: {e}"))
    }
}

fn translate_message(msg: &Message) -> OpenAIMessage {
    match msg.role {
        Role::Human => OpenAIMessage {
            role: "user",
            content: Some(translate_content(&msg.content)),
            tool_calls: None,
            tool_call_id: None,
        },
        Role::Assistant => {
            let text = msg.content.as_text();
            let tool_calls: Vec<_> = msg
                .tool_calls
                .iter()
                .map(|tc| OpenAIToolCall {
                    id: tc.id.clone(),
                    r#type: "function".to_string(),
                    function: OpenAIFunctionCall {
                        name: tc.name.clone(),
                        arguments: Value::Object(tc.args.clone()).to_string(),
                    },
                })
                .collect();
            OpenAIMessage {
                role: "assistant",
                content: (!text.is_empty() || tool_calls.is_empty()).then(|| Value::String(text)),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Role::Tool => OpenAIMessage {
            role: "tool",
            content: Some(Value::String(msg.content.as_text())),
            tool_calls: None,
            tool_call_id: msg.tool_call_id.clone(),
        },
    }
}

fn translate_content(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Parts(parts) => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => serde_json::json!({"type": "text", "text": text}),
                    ContentPart::ImageUrl { image_url } => {
                        serde_json::json!({"type": "image_url", "image_url": image_url})
                    }
                })
                .collect(),
        ),
    }
}

/// Parse a tool-call argument string; anything but a JSON object becomes `{}`
fn parse_arguments(arguments: &str) -> Map<String, Value> {
    match serde_json::from_str(arguments) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn normalize_response(resp: OpenAIResponse) -> Result<LlmResponse, LlmError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::unknown("No choices in response"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .filter(|tc| !tc.function.name.is_empty())
        .map(|tc| ToolCall::new(tc.id, tc.function.name, parse_arguments(&tc.function.arguments)))
        .collect();

    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        usage: resp.usage.map(Usage::from).unwrap_or_default(),
    })
}

/// Turn a chat-completions SSE byte stream into text deltas and a final response
fn parse_sse<S, B, E>(bytes: S) -> impl Stream<Item = Result<StreamEvent, LlmError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let events = Box::pin(bytes.eventsource());
    futures::stream::unfold(
        (events, StreamAccumulator::default()),
        |(mut events, mut acc)| async move {
            loop {
                if let Some(item) = acc.pending.pop_front() {
                    return Some((item, (events, acc)));
                }
                if acc.finished {
                    return None;
                }
                match events.next().await {
                    Some(Ok(event)) => acc.handle_data(&event.data),
                    Some(Err(e)) => {
                        acc.fail(LlmError::network(format!("SSE stream error: {e}")));
                    }
                    None => acc.complete(),
                }
            }
        },
    )
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds streamed chunks into one response
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<u64, PartialToolCall>,
    usage: Usage,
    pending: VecDeque<Result<StreamEvent, LlmError>>,
    finished: bool,
}

impl StreamAccumulator {
    fn handle_data(&mut self, data: &str) {
        let trimmed = data.trim();
        if trimmed.is_empty() {
            return;
        }
        if trimmed == "[DONE]" {
            self.complete();
            return;
        }

        let chunk: StreamChunk = match serde_json::from_str(trimmed) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.fail(LlmError::unknown(format!("Failed to parse SSE JSON: {e}")));
                return;
            }
        };

        if let Some(error) = chunk.error {
            self.fail(LlmError::server_error(error.message));
            return;
        }
        if let Some(usage) = chunk.usage {
            self.usage = usage.into();
        }

        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                self.content.push_str(&text);
                self.pending.push_back(Ok(StreamEvent::TextDelta(text)));
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let entry = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
                    entry.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
        }
    }

    fn complete(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_iter()
            .filter(|(_, tc)| !tc.name.is_empty())
            .map(|(index, tc)| {
                let id = if tc.id.is_empty() {
                    format!("call_{index}")
                } else {
                    tc.id
                };
                ToolCall::new(id, tc.name, parse_arguments(&tc.arguments))
            })
            .collect();
        self.pending.push_back(Ok(StreamEvent::Completed(LlmResponse {
            content: std::mem::take(&mut self.content),
            tool_calls,
            usage: self.usage,
        })));
    }

    fn fail(&mut self, error: LlmError) {
        self.finished = true;
        self.pending.push_back(Err(error));
    }
}

// OpenAI API types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    r#type: &'static str,
    function: OpenAIFunction,
}

impl From<&ToolDefinition> for OpenAITool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: OpenAIFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIToolCall {
    id: String,
    r#type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct OpenAIUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<OpenAIUsage> for Usage {
    fn from(usage: OpenAIUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    usage: Option<OpenAIUsage>,
    error: Option<OpenAIErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u64,
    id: Option<String>,
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
