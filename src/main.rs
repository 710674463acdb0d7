//! chatloop - streaming chat server with tool calling
//!
//! Runs each chat turn as a small MODEL/TOOLS state machine over a compiled,
//! cached workflow, checkpoints every step to `SQLite`, and streams the turn
//! back as newline-delimited JSON.

mod api;
mod config;
mod db;
mod llm;
mod runtime;
mod state_machine;
mod tools;
mod workflow;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use llm::{LlmConfig, ModelRegistry};
use runtime::{ChatEngine, CheckpointStore, DatabaseCheckpointer};
use std::net::SocketAddr;
use std::sync::Arc;
use tools::CapabilityRegistry;
use tower_http::{
    compression::{
        predicate::{DefaultPredicate, NotForContentType, Predicate},
        CompressionLayer,
    },
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use workflow::WorkflowCompiler;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatloop=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    // A store that cannot open is fatal: nothing is served without it
    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let repaired = db.repair_interrupted_tool_calls()?;
    if repaired > 0 {
        tracing::warn!(repaired, "Repaired tool calls interrupted by a restart");
    }

    let models = Arc::new(ModelRegistry::new(LlmConfig::from_env()));
    if models.has_provider() {
        tracing::info!(default = %models.default_model_id(), "Model registry initialized");
    } else {
        tracing::warn!("No model provider configured. Set OPENAI_API_KEY.");
    }

    let capabilities = Arc::new(CapabilityRegistry::standard(config.tool_timeout)?);
    for id in &config.disabled_tools {
        if let Err(e) = capabilities.disable(id) {
            tracing::warn!(id = %id, error = %e, "Cannot disable capability");
        }
    }

    let compiler = Arc::new(WorkflowCompiler::new(
        capabilities,
        models,
        config.workflow_cache_size,
    ));
    let store: Arc<dyn CheckpointStore> = Arc::new(DatabaseCheckpointer::new(db));
    let state = AppState::new(ChatEngine::new(store, compiler, config.engine_config()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Compressing NDJSON would buffer the turn stream
    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true)
        .compress_when(
            DefaultPredicate::new().and(NotForContentType::new(api::NDJSON_CONTENT_TYPE)),
        );

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("chatloop server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
