//! In-process conversation store
//!
//! [`MemoryStore`] keeps rows in a plain vector so that, like the remote
//! store it stands in for, a key can hold several live rows. Tests use the
//! fault-injection hooks to queue transient failures, add latency, or plant
//! duplicate rows directly.

use super::{
    collapse_for_listing, plan_upsert, select_authoritative, ConversationRecord,
    ConversationStore, UpsertOutcome, UpsertPlan,
};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<ConversationRecord>,
    failures: VecDeque<StoreError>,
    write_failures: VecDeque<StoreError>,
    latency: Option<Duration>,
}

/// Vector-backed [`ConversationStore`] with fault injection
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row verbatim, bypassing the conditional write path
    ///
    /// Used to reproduce duplicate or tombstoned rows.
    pub async fn insert_raw(&self, record: ConversationRecord) {
        self.state.lock().await.rows.push(record);
    }

    /// Make the next call fail with `error`; failures queue in order
    pub async fn fail_next(&self, error: StoreError) {
        self.state.lock().await.failures.push_back(error);
    }

    /// Make the next upsert fail with `error`, leaving reads untouched
    pub async fn fail_next_write(&self, error: StoreError) {
        self.state.lock().await.write_failures.push_back(error);
    }

    /// Delay every call by `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    /// Snapshot of every row, tombstones included
    pub async fn rows(&self) -> Vec<ConversationRecord> {
        self.state.lock().await.rows.clone()
    }

    /// Number of read calls served so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of upsert calls served so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn admit(&self) -> StoreResult<()> {
        let latency = {
            let mut state = self.state.lock().await;
            if let Some(err) = state.failures.pop_front() {
                return Err(err);
            }
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }

    async fn live_rows(&self, id: &str, owner_id: &str) -> StoreResult<Vec<ConversationRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter(|r| r.id == id && r.owner_id == owner_id && !r.is_deleted())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn fetch_one(&self, id: &str, owner_id: &str) -> StoreResult<Option<ConversationRecord>> {
        let mut rows = self.live_rows(id, owner_id).await?;
        if rows.len() > 1 {
            return Err(StoreError::NotSingleRow { rows: rows.len() });
        }
        Ok(rows.pop())
    }

    async fn fetch_by_key(&self, id: &str, owner_id: &str) -> StoreResult<Vec<ConversationRecord>> {
        self.live_rows(id, owner_id).await
    }

    async fn fetch_safe(&self, id: &str, owner_id: &str) -> StoreResult<Option<ConversationRecord>> {
        let rows = self.live_rows(id, owner_id).await?;
        Ok(select_authoritative(&rows).cloned())
    }

    async fn upsert(
        &self,
        record: &ConversationRecord,
        expected_version: Option<u64>,
        force_overwrite: bool,
    ) -> StoreResult<UpsertOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.lock().await.write_failures.pop_front() {
            return Err(err);
        }
        self.admit().await?;

        let mut state = self.state.lock().await;
        let keyed: Vec<(usize, ConversationRecord)> = state
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.id == record.id && r.owner_id == record.owner_id)
            .map(|(i, r)| (i, r.clone()))
            .collect();

        match plan_upsert(&keyed, record, expected_version, force_overwrite)? {
            UpsertPlan::Conflict(stored) => Ok(UpsertOutcome {
                stored,
                conflict: true,
            }),
            UpsertPlan::Replace {
                target,
                record,
                retire,
            } => {
                let now = Utc::now();
                for index in retire {
                    state.rows[index].deleted_at = Some(now);
                }
                state.rows[target] = record.clone();
                Ok(UpsertOutcome {
                    stored: record,
                    conflict: false,
                })
            }
            UpsertPlan::Insert(record) => {
                state.rows.push(record.clone());
                Ok(UpsertOutcome {
                    stored: record,
                    conflict: false,
                })
            }
        }
    }

    async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<ConversationRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.admit().await?;
        let state = self.state.lock().await;
        let rows = state
            .rows
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        Ok(collapse_for_listing(rows))
    }
}
