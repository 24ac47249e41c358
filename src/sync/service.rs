//! Conversation service facade
//!
//! [`ConversationService`] wires one cache, one [`ResilientReader`] and one
//! [`ConflictAwareWriter`] over a store and exposes the operations an
//! application performs on conversations. Every edit is a read of the
//! current record followed by a version-checked write, so edits racing
//! another device surface as [`SyncError::Conflict`] rather than silently
//! dropping content.

use super::cache::ConversationCache;
use super::context::CallerContext;
use super::metrics::OperationMetrics;
use super::reader::ResilientReader;
use super::retry::{retry_transient, RetryPolicy};
use super::writer::{ConflictAwareWriter, WriteOptions, WriteReceipt};
use crate::config::Config;
use crate::error::{SyncError, SyncResult};
use crate::storage::{
    collapse_for_listing, ConversationContext, ConversationRecord, ConversationStore, Insight,
    Message,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Application-facing entry point for conversation persistence
pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    cache: Arc<ConversationCache>,
    reader: Arc<ResilientReader>,
    writer: ConflictAwareWriter,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ConversationService {
    /// Build a service over `store` using the cache, remote and limit settings in `config`
    pub fn new(store: Arc<dyn ConversationStore>, config: &Config) -> Self {
        let cache = Arc::new(ConversationCache::new(
            config.cache.freshness(),
            config.cache.max_entries,
        ));
        let retry = RetryPolicy::from_config(&config.remote);
        let call_timeout = config.remote.timeout();
        let reader = Arc::new(ResilientReader::new(
            store.clone(),
            cache.clone(),
            retry.clone(),
            call_timeout,
        ));
        let writer = ConflictAwareWriter::new(
            store.clone(),
            cache.clone(),
            reader.clone(),
            config.limits.clone(),
            call_timeout,
        );

        Self {
            store,
            cache,
            reader,
            writer,
            retry,
            call_timeout,
        }
    }

    /// Shared cache
    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    /// Load a conversation, serving from cache while fresh
    pub async fn load(&self, ctx: &CallerContext, id: &str) -> SyncResult<ConversationRecord> {
        self.reader.read(ctx, id).await
    }

    /// Load a conversation from the store, refreshing the cache
    pub async fn load_fresh(
        &self,
        ctx: &CallerContext,
        id: &str,
    ) -> SyncResult<ConversationRecord> {
        self.reader.read_remote(ctx, id).await
    }

    /// Persist a caller-built record whose `version` is the observed version
    pub async fn save(
        &self,
        ctx: &CallerContext,
        record: ConversationRecord,
        options: WriteOptions,
    ) -> SyncResult<WriteReceipt> {
        self.writer.write(ctx, record, options).await
    }

    /// Create a conversation, optionally seeded with a first message
    pub async fn create(
        &self,
        ctx: &CallerContext,
        id: &str,
        title: &str,
        first_message: Option<Message>,
    ) -> SyncResult<WriteReceipt> {
        let mut record = ConversationRecord::new(id, ctx.owner_id(), title);
        record.messages.extend(first_message);
        self.writer.write(ctx, record, WriteOptions::default()).await
    }

    /// Append a message to the end of a conversation
    pub async fn append_message(
        &self,
        ctx: &CallerContext,
        id: &str,
        message: Message,
    ) -> SyncResult<WriteReceipt> {
        self.modify(ctx, id, |record| record.messages.push(message))
            .await
    }

    /// Attach an insight to a conversation
    pub async fn add_insight(
        &self,
        ctx: &CallerContext,
        id: &str,
        insight: Insight,
    ) -> SyncResult<WriteReceipt> {
        self.modify(ctx, id, |record| record.insights.push(insight))
            .await
    }

    /// Merge `patch` into the conversation context; `null` values remove keys
    pub async fn update_context(
        &self,
        ctx: &CallerContext,
        id: &str,
        patch: ConversationContext,
    ) -> SyncResult<WriteReceipt> {
        self.modify(ctx, id, |record| {
            for (key, value) in patch {
                if value.is_null() {
                    record.context.remove(&key);
                } else {
                    record.context.insert(key, value);
                }
            }
        })
        .await
    }

    /// Set or clear the pinned flag
    pub async fn set_pinned(
        &self,
        ctx: &CallerContext,
        id: &str,
        pinned: bool,
    ) -> SyncResult<WriteReceipt> {
        self.modify(ctx, id, |record| record.is_pinned = pinned).await
    }

    /// Change the title
    pub async fn rename(
        &self,
        ctx: &CallerContext,
        id: &str,
        title: &str,
    ) -> SyncResult<WriteReceipt> {
        let title = title.to_string();
        self.modify(ctx, id, |record| record.title = title).await
    }

    /// Soft-delete a conversation by writing a tombstone
    pub async fn delete(&self, ctx: &CallerContext, id: &str) -> SyncResult<WriteReceipt> {
        self.modify(ctx, id, |record| record.deleted_at = Some(Utc::now()))
            .await
    }

    /// Live conversations of the caller, pinned first; primes the cache
    pub async fn list(&self, ctx: &CallerContext) -> SyncResult<Vec<ConversationRecord>> {
        ctx.ensure_owner()?;
        let metrics = OperationMetrics::new("list");
        let ticket = self.cache.issue_ticket();
        let owner_id = ctx.owner_id();

        let rows = match retry_transient(&self.retry, self.call_timeout, || {
            self.store.list_by_owner(owner_id)
        })
        .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(owner = %owner_id, error = %err, "Listing conversations failed");
                let err = SyncError::from(err);
                metrics.record_outcome(err.kind());
                return Err(err);
            }
        };

        let (ours, foreign): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|r| r.owner_id == owner_id);
        if !foreign.is_empty() {
            tracing::error!(
                owner = %owner_id,
                rows = foreign.len(),
                "Store returned rows owned by another principal; ignoring them"
            );
        }

        let records = collapse_for_listing(ours);
        let primed = self.cache.prime(&records, ticket);
        tracing::debug!(owner = %owner_id, listed = records.len(), primed, "Listed conversations");
        metrics.record_outcome("ok");
        Ok(records)
    }

    /// Drop a cached entry so the next load goes to the store
    pub fn invalidate(&self, ctx: &CallerContext, id: &str) {
        self.cache.invalidate(ctx.owner_id(), id);
    }

    async fn modify<F>(&self, ctx: &CallerContext, id: &str, edit: F) -> SyncResult<WriteReceipt>
    where
        F: FnOnce(&mut ConversationRecord),
    {
        let mut record = self.reader.read_remote(ctx, id).await?;
        edit(&mut record);
        self.writer.write(ctx, record, WriteOptions::default()).await
    }
}
