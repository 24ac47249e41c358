//! Test utilities for convsync
//!
//! Fixtures shared by unit tests: sample records, caller contexts and
//! temporary SQLite stores.

use crate::storage::{ConversationRecord, Message, SqliteStore};
use crate::sync::CallerContext;
use tempfile::TempDir;

/// Build a never-persisted record with one user message
pub fn sample_record(id: &str, owner_id: &str) -> ConversationRecord {
    let mut record = ConversationRecord::new(id, owner_id, format!("Conversation {}", id));
    record.messages.push(Message::user("How do I beat the first boss?"));
    record
}

/// Caller context with full capabilities for `owner_id`
pub fn caller(owner_id: &str) -> CallerContext {
    CallerContext::new(owner_id).with_force_overwrite(true)
}

/// Create a SQLite store inside a fresh temporary directory
///
/// Returns both the store and the `TempDir` so the caller keeps the
/// directory alive for the duration of the test.
pub fn temp_sqlite_store() -> (SqliteStore, TempDir) {
    let dir = TempDir::new().expect("failed to create tempdir");
    let store = SqliteStore::new_with_path(dir.path().join("conversations.db"))
        .expect("failed to create sqlite store");
    (store, dir)
}
