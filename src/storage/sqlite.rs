//! SQLite-backed conversation store
//!
//! The table deliberately keys rows by a surrogate `row_id` and does not
//! declare `(id, owner_id)` unique, matching a remote store that cannot be
//! trusted to enforce it. Conditional writes run inside an `IMMEDIATE`
//! transaction so the read-compare-write of one key is atomic.

use super::{
    collapse_for_listing, plan_upsert, ConversationRecord, ConversationStore, UpsertOutcome,
    UpsertPlan,
};
use crate::error::{ConvsyncError, Result, StoreError, StoreResult};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use directories::ProjectDirs;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the default database location
pub const DB_PATH_ENV: &str = "CONVSYNC_DB";

const SELECT_COLUMNS: &str = "row_id, id, owner_id, title, messages, insights, context, \
     is_pinned, version, checksum, last_modified, created_at, deleted_at";

/// Conversation store persisted to a SQLite file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Create a store in the user's data directory
    ///
    /// Honors the `CONVSYNC_DB` environment variable when set.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var(DB_PATH_ENV) {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("dev", "convsync", "convsync")
            .ok_or_else(|| ConvsyncError::Storage("Could not determine data directory".into()))?;

        Self::new_with_path(proj_dirs.data_dir().join("conversations.db"))
    }

    /// Create a store backed by the database file at `db_path`
    ///
    /// Parent directories are created as needed.
    ///
    /// # Examples
    ///
    /// ```
    /// use convsync::storage::SqliteStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteStore::new_with_path(dir.path().join("conversations.db")).unwrap();
    /// assert!(store.db_path().ends_with("conversations.db"));
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| ConvsyncError::Storage(e.to_string()))?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Path of the backing database file
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| ConvsyncError::Storage(e.to_string()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                title TEXT NOT NULL,
                messages JSON NOT NULL,
                insights JSON NOT NULL,
                context JSON NOT NULL,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                version INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_conversations_key
                ON conversations (owner_id, id);",
        )
        .context("Failed to create tables")
        .map_err(|e| ConvsyncError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn with_connection<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&db_path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {}", e)))?
    }

    /// Append a row without any conditional checks
    ///
    /// Exposed so tests and repair tooling can reproduce duplicate rows.
    pub async fn insert_raw(&self, record: ConversationRecord) -> StoreResult<()> {
        self.with_connection(move |conn| {
            insert_row(conn, &record)?;
            Ok(())
        })
        .await
    }
}

fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<(i64, ConversationRecord)> {
    let row_id: i64 = row.get(0)?;
    let version: i64 = row.get(8)?;
    let deleted_at = match row.get::<_, Option<String>>(12)? {
        Some(_) => Some(parse_timestamp(row, 12)?),
        None => None,
    };
    let record = ConversationRecord {
        id: row.get(1)?,
        owner_id: row.get(2)?,
        title: row.get(3)?,
        messages: parse_json(row, 4)?,
        insights: parse_json(row, 5)?,
        context: parse_json(row, 6)?,
        is_pinned: row.get(7)?,
        version: u64::try_from(version).map_err(|e| conversion_error(8, e))?,
        checksum: row.get(9)?,
        last_modified: parse_timestamp(row, 10)?,
        created_at: parse_timestamp(row, 11)?,
        deleted_at,
    };
    Ok((row_id, record))
}

fn encode(record: &ConversationRecord) -> StoreResult<(String, String, String)> {
    let encode_err = |e: serde_json::Error| StoreError::Corrupt(e.to_string());
    Ok((
        serde_json::to_string(&record.messages).map_err(encode_err)?,
        serde_json::to_string(&record.insights).map_err(encode_err)?,
        serde_json::to_string(&record.context).map_err(encode_err)?,
    ))
}

fn encode_version(record: &ConversationRecord) -> StoreResult<i64> {
    i64::try_from(record.version).map_err(|_| {
        StoreError::Corrupt(format!(
            "version {} of {} does not fit the version column",
            record.version, record.id
        ))
    })
}

fn insert_row(conn: &Connection, record: &ConversationRecord) -> StoreResult<()> {
    let version = encode_version(record)?;
    let (messages, insights, context) = encode(record)?;
    conn.execute(
        "INSERT INTO conversations (id, owner_id, title, messages, insights, context,
            is_pinned, version, checksum, last_modified, created_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.id,
            record.owner_id,
            record.title,
            messages,
            insights,
            context,
            record.is_pinned,
            version,
            record.checksum,
            timestamp(&record.last_modified),
            timestamp(&record.created_at),
            record.deleted_at.as_ref().map(timestamp),
        ],
    )?;
    Ok(())
}

fn replace_row(conn: &Connection, row_id: i64, record: &ConversationRecord) -> StoreResult<()> {
    let version = encode_version(record)?;
    let (messages, insights, context) = encode(record)?;
    conn.execute(
        "UPDATE conversations SET
            title = ?1, messages = ?2, insights = ?3, context = ?4, is_pinned = ?5,
            version = ?6, checksum = ?7, last_modified = ?8, created_at = ?9, deleted_at = ?10
         WHERE row_id = ?11",
        params![
            record.title,
            messages,
            insights,
            context,
            record.is_pinned,
            version,
            record.checksum,
            timestamp(&record.last_modified),
            timestamp(&record.created_at),
            record.deleted_at.as_ref().map(timestamp),
            row_id,
        ],
    )?;
    Ok(())
}

fn query_records(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> StoreResult<Vec<(i64, ConversationRecord)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, read_row)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn live_rows(conn: &Connection, id: &str, owner_id: &str) -> StoreResult<Vec<ConversationRecord>> {
    let sql = format!(
        "SELECT {} FROM conversations
         WHERE id = ?1 AND owner_id = ?2 AND deleted_at IS NULL",
        SELECT_COLUMNS
    );
    Ok(query_records(conn, &sql, &[&id, &owner_id])?
        .into_iter()
        .map(|(_, r)| r)
        .collect())
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn fetch_one(&self, id: &str, owner_id: &str) -> StoreResult<Option<ConversationRecord>> {
        let (id, owner_id) = (id.to_string(), owner_id.to_string());
        self.with_connection(move |conn| {
            let mut rows = live_rows(conn, &id, &owner_id)?;
            if rows.len() > 1 {
                return Err(StoreError::NotSingleRow { rows: rows.len() });
            }
            Ok(rows.pop())
        })
        .await
    }

    async fn fetch_by_key(&self, id: &str, owner_id: &str) -> StoreResult<Vec<ConversationRecord>> {
        let (id, owner_id) = (id.to_string(), owner_id.to_string());
        self.with_connection(move |conn| live_rows(conn, &id, &owner_id))
            .await
    }

    async fn fetch_safe(&self, id: &str, owner_id: &str) -> StoreResult<Option<ConversationRecord>> {
        let (id, owner_id) = (id.to_string(), owner_id.to_string());
        self.with_connection(move |conn| {
            let sql = format!(
                "SELECT {} FROM conversations
                 WHERE id = ?1 AND owner_id = ?2 AND deleted_at IS NULL
                 ORDER BY last_modified DESC, version DESC
                 LIMIT 1",
                SELECT_COLUMNS
            );
            Ok(query_records(conn, &sql, &[&id, &owner_id])?
                .pop()
                .map(|(_, r)| r))
        })
        .await
    }

    async fn upsert(
        &self,
        record: &ConversationRecord,
        expected_version: Option<u64>,
        force_overwrite: bool,
    ) -> StoreResult<UpsertOutcome> {
        let record = record.clone();
        self.with_connection(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let sql = format!(
                "SELECT {} FROM conversations WHERE id = ?1 AND owner_id = ?2",
                SELECT_COLUMNS
            );
            let rows = query_records(&tx, &sql, &[&record.id, &record.owner_id])?;

            let outcome = match plan_upsert(&rows, &record, expected_version, force_overwrite)? {
                UpsertPlan::Conflict(stored) => UpsertOutcome {
                    stored,
                    conflict: true,
                },
                UpsertPlan::Replace {
                    target,
                    record,
                    retire,
                } => {
                    let now = timestamp(&Utc::now());
                    for row_id in retire {
                        tx.execute(
                            "UPDATE conversations SET deleted_at = ?1 WHERE row_id = ?2",
                            params![now, row_id],
                        )?;
                    }
                    replace_row(&tx, target, &record)?;
                    UpsertOutcome {
                        stored: record,
                        conflict: false,
                    }
                }
                UpsertPlan::Insert(record) => {
                    insert_row(&tx, &record)?;
                    UpsertOutcome {
                        stored: record,
                        conflict: false,
                    }
                }
            };

            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<ConversationRecord>> {
        let owner_id = owner_id.to_string();
        self.with_connection(move |conn| {
            let sql = format!(
                "SELECT {} FROM conversations
                 WHERE owner_id = ?1 AND deleted_at IS NULL
                 ORDER BY is_pinned DESC, last_modified DESC",
                SELECT_COLUMNS
            );
            let rows = query_records(conn, &sql, &[&owner_id])?
                .into_iter()
                .map(|(_, r)| r)
                .collect();
            Ok(collapse_for_listing(rows))
        })
        .await
    }
}
