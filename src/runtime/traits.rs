//! Trait abstractions for runtime I/O
//!
//! The executor only touches persistence through `CheckpointStore`, so it can
//! be tested against an in-memory store.

use crate::db::{Database, DbResult, Message, ThreadState};
use async_trait::async_trait;
use std::sync::Arc;

/// Durable, per-thread ordered message history
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load a thread; unknown ids yield an empty thread
    async fn load(&self, thread_id: &str) -> DbResult<ThreadState>;

    /// Append messages in order
    async fn append(&self, thread_id: &str, messages: &[Message]) -> DbResult<()>;

    /// Replace the latest message with a newer revision carrying the same id
    async fn replace_last(&self, thread_id: &str, message: &Message) -> DbResult<()>;

    /// Drop a thread; returns whether it existed
    async fn delete(&self, thread_id: &str) -> DbResult<bool>;
}

// ============================================================================
// Arc implementation for trait objects
// ============================================================================

#[async_trait]
impl<T: CheckpointStore + ?Sized> CheckpointStore for Arc<T> {
    async fn load(&self, thread_id: &str) -> DbResult<ThreadState> {
        (**self).load(thread_id).await
    }

    async fn append(&self, thread_id: &str, messages: &[Message]) -> DbResult<()> {
        (**self).append(thread_id, messages).await
    }

    async fn replace_last(&self, thread_id: &str, message: &Message) -> DbResult<()> {
        (**self).replace_last(thread_id, message).await
    }

    async fn delete(&self, thread_id: &str) -> DbResult<bool> {
        (**self).delete(thread_id).await
    }
}

// ============================================================================
// Production Adapter
// ============================================================================

/// Adapter to use Database as a checkpoint store
#[derive(Clone)]
pub struct DatabaseCheckpointer {
    db: Database,
}

impl DatabaseCheckpointer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStore for DatabaseCheckpointer {
    async fn load(&self, thread_id: &str) -> DbResult<ThreadState> {
        self.db.load_thread(thread_id)
    }

    async fn append(&self, thread_id: &str, messages: &[Message]) -> DbResult<()> {
        self.db.append_messages(thread_id, messages)
    }

    async fn replace_last(&self, thread_id: &str, message: &Message) -> DbResult<()> {
        self.db.replace_last_message(thread_id, message)
    }

    async fn delete(&self, thread_id: &str) -> DbResult<bool> {
        self.db.delete_thread(thread_id)
    }
}
