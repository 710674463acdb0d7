//! HTTP request handlers

use super::stream::{ndjson_body, NDJSON_CONTENT_TYPE};
use super::types::{
    ApiInfoResponse, ChatRequest, ErrorResponse, HistoryResponse, SuccessResponse, ThreadQuery,
    ToolInfo, ToolListResponse,
};
use super::AppState;
use crate::db::{ContentPart, MessageContent};
use crate::runtime::TurnRequest;
use crate::tools::ToolError;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const INVALID_MESSAGE: &str = "invalid message format";

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Chat turns, history, deletion
        .route(
            "/api/chat",
            get(get_chat).post(send_chat).delete(delete_chat),
        )
        .route("/chat", get(get_chat).post(send_chat).delete(delete_chat))
        // Capability administration
        .route("/api/tools", get(list_tools))
        .route("/api/tools/:id/enable", post(enable_tool))
        .route("/api/tools/:id/disable", post(disable_tool))
        .with_state(state)
}

// ============================================================
// Chat
// ============================================================

async fn send_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|e| {
        tracing::debug!(error = %e, "Rejected chat body");
        AppError::BadRequest(INVALID_MESSAGE.to_string())
    })?;
    let content = request
        .message
        .ok_or_else(|| AppError::BadRequest(INVALID_MESSAGE.to_string()))
        .and_then(parse_message)?;

    let thread_id = request
        .thread_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let cancel = CancellationToken::new();
    let rx = state.engine.start_turn(
        TurnRequest {
            thread_id,
            content,
            tool_ids: request.tools,
            model: request.model,
        },
        cancel.clone(),
    );

    Ok((
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        ndjson_body(rx, cancel),
    )
        .into_response())
}

/// Accept a plain string, a non-empty block array, or a stored-message
/// object carrying either under `content` (or `kwargs.content`)
fn parse_message(value: Value) -> Result<MessageContent, AppError> {
    let invalid = || AppError::BadRequest(INVALID_MESSAGE.to_string());
    match value {
        Value::String(text) if !text.is_empty() => Ok(MessageContent::Text(text)),
        Value::Array(blocks) if !blocks.is_empty() => {
            let parts: Vec<ContentPart> =
                serde_json::from_value(Value::Array(blocks)).map_err(|_| invalid())?;
            Ok(MessageContent::Parts(parts))
        }
        Value::Object(mut fields) => {
            let content = match fields.remove("content") {
                Some(content) => Some(content),
                None => fields
                    .get_mut("kwargs")
                    .and_then(Value::as_object_mut)
                    .and_then(|kwargs| kwargs.remove("content")),
            };
            match content {
                Some(inner @ (Value::String(_) | Value::Array(_))) => parse_message(inner),
                _ => Err(invalid()),
            }
        }
        _ => Err(invalid()),
    }
}

async fn get_chat(
    State(state): State<AppState>,
    Query(query): Query<ThreadQuery>,
) -> Result<Response, AppError> {
    let Some(thread_id) = query.thread_id.filter(|id| !id.is_empty()) else {
        return Ok(Json(ApiInfoResponse::default()).into_response());
    };

    let thread = state
        .engine
        .history(&thread_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(HistoryResponse {
        thread_id: thread.thread_id,
        history: thread.messages,
    })
    .into_response())
}

async fn delete_chat(
    State(state): State<AppState>,
    Query(query): Query<ThreadQuery>,
) -> Result<Json<SuccessResponse>, AppError> {
    let thread_id = query
        .thread_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("thread_id is required".to_string()))?;

    let success = state
        .engine
        .delete_thread(&thread_id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    tracing::info!(thread_id = %thread_id, deleted = success, "Thread delete requested");
    Ok(Json(SuccessResponse { success }))
}

// ============================================================
// Capabilities
// ============================================================

async fn list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .capabilities()
        .list()
        .into_iter()
        .map(ToolInfo::from)
        .collect();
    Json(ToolListResponse { tools })
}

async fn enable_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ToolInfo>, AppError> {
    state.capabilities().enable(&id)?;
    tool_info(&state, &id)
}

async fn disable_tool(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ToolInfo>, AppError> {
    state.capabilities().disable(&id)?;
    tool_info(&state, &id)
}

fn tool_info(state: &AppState, id: &str) -> Result<Json<ToolInfo>, AppError> {
    state
        .capabilities()
        .get(id)
        .map(|capability| Json(ToolInfo::from(capability)))
        .ok_or_else(|| AppError::NotFound(format!("Unknown capability: {id}")))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<ToolError> for AppError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::UnknownCapability(_) => AppError::NotFound(e.to_string()),
            ToolError::InvalidCapability { .. } => AppError::BadRequest(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
