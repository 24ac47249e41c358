//! Remote store abstraction and backends
//!
//! The [`ConversationStore`] trait is the only seam between the sync core
//! and whatever holds conversations durably. Backends must not be assumed
//! to enforce `(id, owner_id)` uniqueness: a key may transiently map to
//! several live rows, and the shared rules in this module
//! ([`select_authoritative`], [`plan_upsert`]) define how every backend and
//! the reader resolve that ambiguity.
//!
//! Implementations:
//!
//! - [`SqliteStore`]: file-backed store over `rusqlite`.
//! - [`MemoryStore`]: in-process store with fault injection for tests.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub mod memory;
pub mod sqlite;
pub mod types;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::{
    ConversationContext, ConversationRecord, ConversationSummary, Insight, Message, MessageRole,
};

/// Result of a conditional upsert
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// The record now authoritative for the key (the winner on conflict)
    pub stored: ConversationRecord,
    /// True when the write was rejected because the stored version advanced
    pub conflict: bool,
}

/// Row store holding conversations keyed by `(id, owner_id)`
///
/// Every method filters out tombstoned rows except where noted. None of
/// the lookups may assume a single live row exists per key.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Point lookup expecting at most one live row
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotSingleRow`] when more than one
    /// live row matches.
    async fn fetch_one(&self, id: &str, owner_id: &str) -> StoreResult<Option<ConversationRecord>>;

    /// All live rows for the key, in no guaranteed order
    async fn fetch_by_key(&self, id: &str, owner_id: &str) -> StoreResult<Vec<ConversationRecord>>;

    /// Server-side lookup that collapses duplicates with [`select_authoritative`]
    async fn fetch_safe(&self, id: &str, owner_id: &str) -> StoreResult<Option<ConversationRecord>>;

    /// Conditional write, atomic per key
    ///
    /// `record.version` is the version the writer wants to persist. The
    /// stored live row is replaced only when `force_overwrite` is set or
    /// its version is strictly lower; otherwise the outcome is a conflict
    /// carrying the stored row. `expected_version` is `None` when the
    /// writer believes the conversation does not exist yet.
    async fn upsert(
        &self,
        record: &ConversationRecord,
        expected_version: Option<u64>,
        force_overwrite: bool,
    ) -> StoreResult<UpsertOutcome>;

    /// Live conversations of an owner, pinned first then most recently modified
    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<ConversationRecord>>;
}

/// Precedence between two rows for the same key: later `last_modified`
/// wins, then higher `version`
fn recency(a: &ConversationRecord, b: &ConversationRecord) -> Ordering {
    a.last_modified
        .cmp(&b.last_modified)
        .then(a.version.cmp(&b.version))
}

/// Pick the most recently modified non-tombstoned row
///
/// This is the single selection rule every read path converges on.
pub fn select_authoritative<'a, I>(rows: I) -> Option<&'a ConversationRecord>
where
    I: IntoIterator<Item = &'a ConversationRecord>,
{
    rows.into_iter()
        .filter(|r| !r.is_deleted())
        .max_by(|a, b| recency(a, b))
}

/// Ordering for list views: pinned first, then newest first
pub fn list_order(a: &ConversationRecord, b: &ConversationRecord) -> Ordering {
    b.is_pinned
        .cmp(&a.is_pinned)
        .then(b.last_modified.cmp(&a.last_modified))
        .then(a.id.cmp(&b.id))
}

/// Collapse rows to one live record per id and sort for list views
pub fn collapse_for_listing(rows: Vec<ConversationRecord>) -> Vec<ConversationRecord> {
    let mut by_id: BTreeMap<String, ConversationRecord> = BTreeMap::new();
    for row in rows.into_iter().filter(|r| !r.is_deleted()) {
        match by_id.get(&row.id) {
            Some(existing) if recency(existing, &row) != Ordering::Less => {}
            _ => {
                by_id.insert(row.id.clone(), row);
            }
        }
    }
    let mut records: Vec<ConversationRecord> = by_id.into_values().collect();
    records.sort_by(list_order);
    records
}

/// What a backend should do to apply a conditional upsert
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertPlan<K> {
    /// Reject; the contained row is authoritative
    Conflict(ConversationRecord),
    /// Overwrite the row at `target` and tombstone the stale duplicates in `retire`
    Replace {
        /// Row to overwrite
        target: K,
        /// Record to store there
        record: ConversationRecord,
        /// Other live rows for the key to tombstone
        retire: Vec<K>,
    },
    /// No live row exists; insert a new one
    Insert(ConversationRecord),
}

/// Decide how to apply a conditional upsert given every row for the key
///
/// `rows` holds all rows for `(id, owner_id)`, tombstoned ones included,
/// each tagged with a backend-specific row handle.
///
/// - A live row with version `>= record.version` wins unless forced.
/// - A forced write over a newer row is stored as `stored + 1` so the
///   version keeps increasing.
/// - With no live row, a writer that expected an existing record
///   conflicts with the latest tombstone instead of resurrecting it.
///
/// Fails with [`StoreError::Corrupt`] when a forced write would have to
/// bump a stored version that is already at `u64::MAX`.
pub fn plan_upsert<K: Copy + PartialEq>(
    rows: &[(K, ConversationRecord)],
    record: &ConversationRecord,
    expected_version: Option<u64>,
    force_overwrite: bool,
) -> StoreResult<UpsertPlan<K>> {
    let head = rows
        .iter()
        .filter(|(_, r)| !r.is_deleted())
        .max_by(|(_, a), (_, b)| recency(a, b));

    if let Some((target, current)) = head {
        if !force_overwrite && current.version >= record.version {
            return Ok(UpsertPlan::Conflict(current.clone()));
        }
        let mut next = record.clone();
        if current.version >= next.version {
            next.version = current.version.checked_add(1).ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "stored version {} of {} cannot be incremented",
                    current.version, record.id
                ))
            })?;
        }
        next.created_at = current.created_at;
        let retire = rows
            .iter()
            .filter(|(k, r)| !r.is_deleted() && k != target)
            .map(|(k, _)| *k)
            .collect();
        return Ok(UpsertPlan::Replace {
            target: *target,
            record: next,
            retire,
        });
    }

    let tombstone = rows.iter().map(|(_, r)| r).max_by(|a, b| recency(a, b));
    Ok(match (expected_version, tombstone) {
        (Some(_), Some(tombstone)) if !force_overwrite => UpsertPlan::Conflict(tombstone.clone()),
        _ => UpsertPlan::Insert(record.clone()),
    })
}
