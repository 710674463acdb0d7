//! Checkpoint database
//!
//! Durable, per-thread ordered message history backed by `SQLite`.

mod schema;

pub use schema::*;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Marker text for tool calls cut off by a process restart
pub const INTERRUPTED_TOOL_MESSAGE: &str = "Tool execution interrupted by server restart";

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Message not found: {0}")]
    MessageNotFound(String),
    #[error("Database lock poisoned")]
    LockPoisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    // ==================== Thread Operations ====================

    /// Load the full history of a thread. Unknown ids yield an empty thread.
    pub fn load_thread(&self, thread_id: &str) -> DbResult<ThreadState> {
        let conn = self.conn()?;
        let messages = load_messages(&conn, thread_id)?;
        Ok(ThreadState {
            thread_id: thread_id.to_string(),
            messages,
        })
    }

    /// Append messages in order, creating the thread on first write
    pub fn append_messages(&self, thread_id: &str, messages: &[Message]) -> DbResult<()> {
        if messages.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        touch_thread(&tx, thread_id)?;

        let mut sequence_id: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence_id), 0) FROM messages WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )?;

        for message in messages {
            sequence_id += 1;
            insert_message(&tx, thread_id, sequence_id, message)?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Replace the latest message of a thread with a newer revision of it
    ///
    /// Fails with `MessageNotFound` when the thread's last message has a
    /// different id.
    pub fn replace_last_message(&self, thread_id: &str, message: &Message) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let last: Option<(i64, String)> = tx
            .query_row(
                "SELECT sequence_id, message_id FROM messages
                 WHERE thread_id = ?1 ORDER BY sequence_id DESC LIMIT 1",
                params![thread_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let sequence_id = match last {
            Some((sequence_id, message_id)) if message_id == message.id => sequence_id,
            _ => return Err(DbError::MessageNotFound(message.id.clone())),
        };

        let body = serde_json::to_string(message)?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE messages SET body = ?1, updated_at = ?2 WHERE thread_id = ?3 AND sequence_id = ?4",
            params![body, now, thread_id, sequence_id],
        )?;
        tx.execute(
            "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
            params![now, thread_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Delete a thread and its history. Returns whether it existed.
    pub fn delete_thread(&self, thread_id: &str) -> DbResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE thread_id = ?1", params![thread_id])?;
        let deleted = tx.execute("DELETE FROM threads WHERE id = ?1", params![thread_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }

    /// Answer tool calls orphaned by a crash during tool execution.
    ///
    /// Each unanswered call is marked with an error on its assistant message
    /// and a synthetic tool message is appended, so the thread can resume.
    /// Returns the number of calls repaired.
    pub fn repair_interrupted_tool_calls(&self) -> DbResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let thread_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM threads")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut repaired = 0;
        for thread_id in thread_ids {
            let mut messages = load_messages(&tx, &thread_id)?;
            let orphans = unanswered_tool_calls(&messages);
            if orphans.is_empty() {
                continue;
            }

            let mut sequence_id: i64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence_id), 0) FROM messages WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )?;

            for (index, call_id) in orphans {
                let assistant = &mut messages[index];
                let Some(call) = assistant.tool_calls.iter_mut().find(|c| c.id == call_id) else {
                    continue;
                };
                *call = call.clone().with_error(INTERRUPTED_TOOL_MESSAGE);
                let tool_message = Message::tool_result(call);

                let body = serde_json::to_string(&*assistant)?;
                tx.execute(
                    "UPDATE messages SET body = ?1 WHERE thread_id = ?2 AND message_id = ?3",
                    params![body, thread_id, assistant.id],
                )?;

                sequence_id += 1;
                insert_message(&tx, &thread_id, sequence_id, &tool_message)?;
                repaired += 1;

                tracing::info!(
                    thread_id = %thread_id,
                    tool_call_id = %call_id,
                    "Injected synthetic tool result for interrupted tool call"
                );
            }
        }

        tx.commit()?;
        Ok(repaired)
    }
}

fn touch_thread(tx: &Transaction<'_>, thread_id: &str) -> DbResult<()> {
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO threads (id, created_at, updated_at) VALUES (?1, ?2, ?2)
         ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
        params![thread_id, now],
    )?;
    Ok(())
}

fn insert_message(
    tx: &Transaction<'_>,
    thread_id: &str,
    sequence_id: i64,
    message: &Message,
) -> DbResult<()> {
    let body = serde_json::to_string(message)?;
    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO messages (thread_id, sequence_id, message_id, role, body, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            thread_id,
            sequence_id,
            message.id,
            message.role.as_str(),
            body,
            now
        ],
    )?;
    Ok(())
}

fn load_messages(conn: &Connection, thread_id: &str) -> DbResult<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT body FROM messages WHERE thread_id = ?1 ORDER BY sequence_id ASC",
    )?;
    let bodies = stmt
        .query_map(params![thread_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    bodies
        .iter()
        .map(|body| serde_json::from_str(body).map_err(DbError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, Map::new())
    }

    #[test]
    fn test_unknown_thread_loads_empty() {
        let db = Database::open_in_memory().unwrap();
        let thread = db.load_thread("nope").unwrap();
        assert_eq!(thread.thread_id, "nope");
        assert!(thread.is_empty());
    }

    #[test]
    fn test_append_preserves_order() {
        let db = Database::open_in_memory().unwrap();

        let first = Message::human(MessageContent::text("one"));
        let second = Message::assistant(MessageContent::text("two"), vec![]);
        let third = Message::human(MessageContent::text("three"));

        db.append_messages("t1", &[first.clone(), second.clone()]).unwrap();
        db.append_messages("t1", &[third.clone()]).unwrap();

        let thread = db.load_thread("t1").unwrap();
        let ids: Vec<_> = thread.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![first.id.as_str(), second.id.as_str(), third.id.as_str()]);
        assert_eq!(thread.messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_threads_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        db.append_messages("a", &[Message::human(MessageContent::text("for a"))])
            .unwrap();
        db.append_messages("b", &[Message::human(MessageContent::text("for b"))])
            .unwrap();

        assert_eq!(db.load_thread("a").unwrap().messages.len(), 1);
        assert_eq!(
            db.load_thread("b").unwrap().messages[0].content.as_text(),
            "for b"
        );
    }

    #[test]
    fn test_replace_last_message() {
        let db = Database::open_in_memory().unwrap();
        let assistant = Message::assistant(MessageContent::text(""), vec![call("c1", "calc")]);
        db.append_messages("t", &[assistant.clone()]).unwrap();

        let mut resolved = assistant.clone();
        resolved.tool_calls[0] = resolved.tool_calls[0].clone().with_output(json!("42"));
        db.replace_last_message("t", &resolved).unwrap();

        let thread = db.load_thread("t").unwrap();
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.messages[0].tool_calls[0].output, Some(json!("42")));
    }

    #[test]
    fn test_replace_last_rejects_other_message() {
        let db = Database::open_in_memory().unwrap();
        db.append_messages("t", &[Message::human(MessageContent::text("hi"))])
            .unwrap();

        let stranger = Message::assistant(MessageContent::text("x"), vec![]);
        let result = db.replace_last_message("t", &stranger);
        assert!(matches!(result, Err(DbError::MessageNotFound(_))));
    }

    #[test]
    fn test_delete_thread() {
        let db = Database::open_in_memory().unwrap();
        db.append_messages("t", &[Message::human(MessageContent::text("hi"))])
            .unwrap();

        assert!(db.delete_thread("t").unwrap());
        assert!(db.load_thread("t").unwrap().is_empty());
        assert!(!db.delete_thread("t").unwrap());
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");

        let human = Message::human(MessageContent::text("remember me"));
        {
            let db = Database::open(&path).unwrap();
            db.append_messages("durable", &[human.clone()]).unwrap();
        }

        // Second open re-runs initialization against the existing file
        let db = Database::open(&path).unwrap();
        let thread = db.load_thread("durable").unwrap();
        assert_eq!(thread.messages, vec![human]);
    }

    #[test]
    fn test_repair_answers_orphaned_calls() {
        let db = Database::open_in_memory().unwrap();

        let assistant = Message::assistant(
            MessageContent::text(""),
            vec![call("tool-1", "calc"), call("tool-2", "calc"), call("tool-3", "calc")],
        );
        let done = assistant.tool_calls[0].clone().with_output(json!("ok"));
        db.append_messages(
            "t",
            &[
                Message::human(MessageContent::text("go")),
                assistant.clone(),
                Message::tool_result(&done),
            ],
        )
        .unwrap();

        assert_eq!(db.repair_interrupted_tool_calls().unwrap(), 2);

        let thread = db.load_thread("t").unwrap();
        assert_eq!(thread.messages.len(), 5);
        assert!(unanswered_tool_calls(&thread.messages).is_empty());

        let repaired_ids: Vec<_> = thread.messages[3..]
            .iter()
            .map(|m| m.tool_call_id.clone().unwrap())
            .collect();
        assert_eq!(repaired_ids, vec!["tool-2", "tool-3"]);
        assert_eq!(
            thread.messages[1].tool_calls[2].error.as_deref(),
            Some(INTERRUPTED_TOOL_MESSAGE)
        );
    }

    #[test]
    fn test_repair_leaves_complete_exchanges_alone() {
        let db = Database::open_in_memory().unwrap();
        let resolved = call("tool-1", "calc").with_output(json!("2"));
        db.append_messages(
            "t",
            &[
                Message::assistant(MessageContent::text(""), vec![resolved.clone()]),
                Message::tool_result(&resolved),
                Message::assistant(MessageContent::text("It is 2."), vec![]),
            ],
        )
        .unwrap();

        assert_eq!(db.repair_interrupted_tool_calls().unwrap(), 0);
        assert_eq!(db.load_thread("t").unwrap().messages.len(), 3);
    }
}
