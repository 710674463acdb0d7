//! API request and response types

use crate::db::Message;
use crate::tools::Capability;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_VERSION: &str = "1.0.0";

/// Request to run one chat turn
///
/// `message` stays loosely typed here; the handler accepts a string, an
/// array of content blocks, or a stored-message object with `content`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// `?thread_id=` on GET and DELETE
#[derive(Debug, Deserialize)]
pub struct ThreadQuery {
    pub thread_id: Option<String>,
}

/// Response with a thread's full history
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub thread_id: String,
    pub history: Vec<Message>,
}

/// Endpoint listing returned by a bare GET
#[derive(Debug, Serialize)]
pub struct ApiInfoResponse {
    pub message: &'static str,
    pub version: &'static str,
    pub endpoints: ApiEndpoints,
}

#[derive(Debug, Serialize)]
pub struct ApiEndpoints {
    pub chat: &'static str,
    pub history: &'static str,
}

impl Default for ApiInfoResponse {
    fn default() -> Self {
        Self {
            message: "Chat API with tool calling",
            version: API_VERSION,
            endpoints: ApiEndpoints {
                chat: "POST /api/chat",
                history: "GET /api/chat?thread_id=YOUR_THREAD_ID",
            },
        }
    }
}

/// Response for lifecycle actions
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// One capability as exposed to administrators
#[derive(Debug, Serialize)]
pub struct ToolInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub timeout_ms: u64,
}

impl From<Capability> for ToolInfo {
    fn from(capability: Capability) -> Self {
        Self {
            timeout_ms: u64::try_from(capability.timeout.as_millis()).unwrap_or(u64::MAX),
            id: capability.id,
            name: capability.name,
            description: capability.description,
            enabled: capability.enabled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolInfo>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
