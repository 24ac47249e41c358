//! Version-checked writes
//!
//! A candidate record carries the version its author last observed. The
//! writer reads the current remote record, stamps the candidate with
//! `observed + 1` and a fresh checksum, and hands it to the store's
//! conditional upsert. A write whose observed version is behind the store
//! is rejected with [`SyncError::Conflict`] carrying the winning record;
//! the losing content is never cached.

use super::cache::ConversationCache;
use super::checksum::record_checksum;
use super::context::CallerContext;
use super::metrics::OperationMetrics;
use super::reader::ResilientReader;
use super::retry::with_deadline;
use super::validate::validate_candidate;
use crate::config::LimitsConfig;
use crate::error::{SyncError, SyncResult};
use crate::storage::{ConversationRecord, ConversationStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Per-write options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Replace the stored record even when its version is newer
    pub force_overwrite: bool,
}

impl WriteOptions {
    /// Options for a forced overwrite
    pub fn forced() -> Self {
        Self {
            force_overwrite: true,
        }
    }
}

/// Result of a successful write
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReceipt {
    /// Version now stored
    pub version: u64,
    /// True when a forced write replaced a newer stored version
    pub conflict_resolved: bool,
    /// The record as stored
    pub record: ConversationRecord,
}

/// Writes candidates through a conditional upsert and keeps the cache coherent
pub struct ConflictAwareWriter {
    store: Arc<dyn ConversationStore>,
    cache: Arc<ConversationCache>,
    reader: Arc<ResilientReader>,
    limits: LimitsConfig,
    call_timeout: Duration,
}

impl ConflictAwareWriter {
    /// Create a writer sharing `cache` and `reader` with the read path
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<ConversationCache>,
        reader: Arc<ResilientReader>,
        limits: LimitsConfig,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            reader,
            limits,
            call_timeout,
        }
    }

    /// Persist `candidate` if its observed version is still current
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidInput`] / [`SyncError::OwnerMismatch`] before any I/O
    /// - [`SyncError::Conflict`] when the stored version moved past the observed one
    /// - [`SyncError::StoreUnavailable`] when the store could not be reached
    pub async fn write(
        &self,
        ctx: &CallerContext,
        candidate: ConversationRecord,
        options: WriteOptions,
    ) -> SyncResult<WriteReceipt> {
        validate_candidate(ctx, &candidate, options.force_overwrite, &self.limits)?;

        let metrics = OperationMetrics::new("write");
        let ticket = self.cache.issue_ticket();
        let owner_id = ctx.owner_id().to_string();
        let id = candidate.id.clone();

        let result = self.apply(ctx, candidate, options).await;
        match &result {
            Ok(receipt) if !receipt.record.is_deleted() => {
                self.cache
                    .put_with_ticket(&owner_id, &id, receipt.record.clone(), ticket);
                metrics.record_outcome(if receipt.conflict_resolved {
                    "conflict_resolved"
                } else {
                    "ok"
                });
            }
            Ok(_) => {
                self.cache.invalidate_with_ticket(&owner_id, &id, ticket);
                metrics.record_outcome("ok");
            }
            Err(err) => {
                self.cache.invalidate_with_ticket(&owner_id, &id, ticket);
                metrics.record_outcome(err.kind());
            }
        }
        result
    }

    async fn apply(
        &self,
        ctx: &CallerContext,
        candidate: ConversationRecord,
        options: WriteOptions,
    ) -> SyncResult<WriteReceipt> {
        let observed = candidate.version;
        let current = self.reader.fetch_current(ctx, &candidate.id).await?;

        let overrides_newer = match &current {
            Some(stored) if stored.version > observed => {
                if !options.force_overwrite {
                    tracing::warn!(
                        id = %candidate.id,
                        owner = %ctx.owner_id(),
                        observed,
                        stored = stored.version,
                        "Rejecting stale write"
                    );
                    return Err(SyncError::Conflict {
                        current: Box::new(stored.clone()),
                    });
                }
                true
            }
            _ => false,
        };

        let now = Utc::now();
        let mut next = candidate;
        next.version = observed.checked_add(1).ok_or_else(|| {
            SyncError::InvalidInput(format!("version {} cannot be incremented", observed))
        })?;
        next.checksum = record_checksum(&next);
        next.last_modified = now;
        if observed == 0 {
            next.created_at = now;
        }

        let expected_version = (observed != 0).then_some(observed);
        let outcome = with_deadline(
            self.call_timeout,
            self.store
                .upsert(&next, expected_version, options.force_overwrite),
        )
        .await
        .map_err(|err| {
            tracing::warn!(id = %next.id, owner = %ctx.owner_id(), error = %err, "Upsert failed");
            SyncError::from(err)
        })?;

        if outcome.conflict {
            tracing::warn!(
                id = %next.id,
                owner = %ctx.owner_id(),
                observed,
                stored = outcome.stored.version,
                "Store rejected conditional write"
            );
            return Err(SyncError::Conflict {
                current: Box::new(outcome.stored),
            });
        }

        let stored = outcome.stored;
        let conflict_resolved =
            options.force_overwrite && (overrides_newer || stored.version > next.version);
        if conflict_resolved {
            tracing::info!(
                id = %stored.id,
                owner = %ctx.owner_id(),
                version = stored.version,
                "Forced write replaced a newer stored version"
            );
        } else {
            tracing::debug!(id = %stored.id, version = stored.version, "Write stored");
        }

        Ok(WriteReceipt {
            version: stored.version,
            conflict_resolved,
            record: stored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::storage::{MemoryStore, Message};
    use crate::sync::checksum::verify_checksum;
    use crate::sync::RetryPolicy;
    use crate::test_utils::{caller, sample_record};

    struct Harness {
        store: Arc<MemoryStore>,
        cache: Arc<ConversationCache>,
        reader: Arc<ResilientReader>,
        writer: ConflictAwareWriter,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ConversationCache::new(Duration::from_secs(60), 16));
        let reader = Arc::new(ResilientReader::new(
            store.clone(),
            cache.clone(),
            RetryPolicy::none(),
            Duration::from_secs(1),
        ));
        let writer = ConflictAwareWriter::new(
            store.clone(),
            cache.clone(),
            reader.clone(),
            LimitsConfig::default(),
            Duration::from_secs(1),
        );
        Harness {
            store,
            cache,
            reader,
            writer,
        }
    }

    fn observed_at(record: &ConversationRecord, version: u64) -> ConversationRecord {
        let mut candidate = record.clone();
        candidate.version = version;
        candidate
    }

    #[tokio::test]
    async fn test_create_then_update_increments_version() {
        let h = harness();
        let ctx = caller("u1");

        let first = h
            .writer
            .write(&ctx, sample_record("c1", "u1"), WriteOptions::default())
            .await
            .expect("create");
        assert_eq!(first.version, 1);
        assert!(!first.conflict_resolved);
        assert!(verify_checksum(&first.record));

        let mut update = first.record.clone();
        update.messages.push(Message::assistant("Dodge left."));
        let second = h
            .writer
            .write(&ctx, update, WriteOptions::default())
            .await
            .expect("update");
        assert_eq!(second.version, 2);
        assert_eq!(second.record.created_at, first.record.created_at);

        let remote = h.reader.read_remote(&ctx, "c1").await.expect("read");
        assert_eq!(remote.version, 2);
    }

    #[tokio::test]
    async fn test_resubmitting_same_candidate_conflicts() {
        let h = harness();
        let ctx = caller("u1");
        let created = h
            .writer
            .write(&ctx, sample_record("c1", "u1"), WriteOptions::default())
            .await
            .expect("create");

        let candidate = created.record.clone();
        h.writer
            .write(&ctx, candidate.clone(), WriteOptions::default())
            .await
            .expect("first resubmission");
        let err = h
            .writer
            .write(&ctx, candidate, WriteOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.conflict_record().map(|r| r.version), Some(2));
        assert!(h.cache.get("u1", "c1").is_none());
    }

    #[tokio::test]
    async fn test_create_over_existing_conversation_conflicts() {
        let h = harness();
        let ctx = caller("u1");
        h.writer
            .write(&ctx, sample_record("c1", "u1"), WriteOptions::default())
            .await
            .expect("create");

        let err = h
            .writer
            .write(&ctx, sample_record("c1", "u1"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_forced_write_bumps_past_stored_version() {
        let h = harness();
        let ctx = caller("u1");
        let v1 = h
            .writer
            .write(&ctx, sample_record("c1", "u1"), WriteOptions::default())
            .await
            .expect("create");
        h.writer
            .write(&ctx, v1.record.clone(), WriteOptions::default())
            .await
            .expect("v2");
        let v3 = h
            .writer
            .write(&ctx, observed_at(&v1.record, 2), WriteOptions::default())
            .await
            .expect("v3");
        assert_eq!(v3.version, 3);

        let forced = h
            .writer
            .write(&ctx, v1.record.clone(), WriteOptions::forced())
            .await
            .expect("forced");
        assert!(forced.conflict_resolved);
        assert_eq!(forced.version, 4);
        assert_eq!(h.cache.get("u1", "c1").map(|r| r.version), Some(4));
    }

    #[tokio::test]
    async fn test_tombstone_write_is_not_cached_and_blocks_stale_updates() {
        let h = harness();
        let ctx = caller("u1");
        let created = h
            .writer
            .write(&ctx, sample_record("c1", "u1"), WriteOptions::default())
            .await
            .expect("create");

        let mut tombstone = created.record.clone();
        tombstone.deleted_at = Some(Utc::now());
        let deleted = h
            .writer
            .write(&ctx, tombstone, WriteOptions::default())
            .await
            .expect("delete");
        assert!(deleted.record.is_deleted());
        assert!(h.cache.get("u1", "c1").is_none());

        let err = h
            .writer
            .write(&ctx, created.record.clone(), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(err.conflict_record().map(|r| r.is_deleted()).unwrap_or(false));

        let reborn = h
            .writer
            .write(&ctx, sample_record("c1", "u1"), WriteOptions::default())
            .await
            .expect("new lineage");
        assert_eq!(reborn.version, 1);
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_unavailable_and_invalidates() {
        let h = harness();
        let ctx = caller("u1");
        let created = h
            .writer
            .write(&ctx, sample_record("c1", "u1"), WriteOptions::default())
            .await
            .expect("create");
        assert!(h.cache.get("u1", "c1").is_some());

        h.store
            .fail_next_write(StoreError::Unavailable("connection reset".into()))
            .await;
        let err = h
            .writer
            .write(&ctx, created.record, WriteOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(h.cache.get("u1", "c1").is_none());
    }

    #[tokio::test]
    async fn test_invalid_input_performs_no_io() {
        let h = harness();
        let err = h
            .writer
            .write(&caller("u1"), sample_record("bad id", "u1"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert_eq!(h.store.read_count(), 0);
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_maximum_version_candidate_is_rejected_before_io() {
        let h = harness();
        let mut candidate = sample_record("c1", "u1");
        candidate.version = u64::MAX;
        let err = h
            .writer
            .write(&caller("u1"), candidate, WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
        assert_eq!(h.store.read_count(), 0);
        assert_eq!(h.store.write_count(), 0);
        assert!(h.store.rows().await.is_empty());
    }
}
