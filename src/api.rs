//! HTTP API for chatloop
//!
//! Chat turns stream back as newline-delimited JSON; history, thread deletion
//! and capability toggles are plain JSON.

mod handlers;
mod stream;
mod types;

pub use handlers::create_router;
pub use stream::NDJSON_CONTENT_TYPE;

use crate::runtime::DynEngine;
use crate::tools::CapabilityRegistry;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<DynEngine>,
}

impl AppState {
    pub fn new(engine: DynEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    fn capabilities(&self) -> &Arc<CapabilityRegistry> {
        self.engine.compiler().capabilities()
    }
}
