//! Resilient single-conversation reads
//!
//! The store may hold zero, one or several live rows for a key. The reader
//! tries an ordered list of [`ReadStrategy`]s; each yields a tagged
//! [`StrategyOutcome`] and every successful path is normalised through the
//! same selection rule ([`crate::storage::select_authoritative`]), so the
//! result does not depend on which strategy answered.

use super::cache::{ConversationCache, RequestTicket};
use super::checksum::verify_checksum;
use super::context::CallerContext;
use super::metrics::{record_read_fallback, OperationMetrics};
use super::retry::{with_deadline, RetryPolicy};
use crate::error::{StoreError, SyncError, SyncResult};
use crate::storage::{select_authoritative, ConversationRecord, ConversationStore};
use std::sync::Arc;
use std::time::Duration;

/// One way of asking the store for a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// Direct lookup that expects at most one live row
    PointLookup,
    /// Every live row for the key, newest selected client-side
    OrderedScan,
    /// Server-side duplicate-collapsing lookup
    SafeLookup,
}

impl ReadStrategy {
    /// Strategies in the order they are attempted
    pub const ORDER: [ReadStrategy; 3] = [
        ReadStrategy::PointLookup,
        ReadStrategy::OrderedScan,
        ReadStrategy::SafeLookup,
    ];

    /// Label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            ReadStrategy::PointLookup => "point_lookup",
            ReadStrategy::OrderedScan => "ordered_scan",
            ReadStrategy::SafeLookup => "safe_lookup",
        }
    }
}

/// Tagged result of a single strategy
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    /// The store answered with a live record
    Found(ConversationRecord),
    /// The store answered that no live record exists
    Missing,
    /// The strategy failed in a way that may clear on retry
    Retryable(StoreError),
    /// The strategy failed in a way retrying will not fix
    Fatal(StoreError),
}

impl From<StoreError> for StrategyOutcome {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            StrategyOutcome::Retryable(err)
        } else {
            StrategyOutcome::Fatal(err)
        }
    }
}

#[derive(Debug)]
struct PipelineFailure {
    error: StoreError,
    retryable: bool,
}

/// Reads one authoritative record per `(id, owner)` through the cache
pub struct ResilientReader {
    store: Arc<dyn ConversationStore>,
    cache: Arc<ConversationCache>,
    retry: RetryPolicy,
    call_timeout: Duration,
}

impl ResilientReader {
    /// Create a reader over `store`, writing results through to `cache`
    pub fn new(
        store: Arc<dyn ConversationStore>,
        cache: Arc<ConversationCache>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            retry,
            call_timeout,
        }
    }

    /// Read a conversation, serving a fresh cache entry when available
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidInput`] for an empty id or owner
    /// - [`SyncError::NotFound`] when no live record exists
    /// - [`SyncError::StoreUnavailable`] when every strategy failed on every attempt
    pub async fn read(&self, ctx: &CallerContext, id: &str) -> SyncResult<ConversationRecord> {
        validate_read(ctx, id)?;
        let metrics = OperationMetrics::new("read");
        if let Some(hit) = self.cache.get(ctx.owner_id(), id) {
            metrics.record_outcome("cache_hit");
            return Ok(hit);
        }
        self.read_through(ctx, id, &metrics).await
    }

    /// Read a conversation from the store, bypassing but refreshing the cache
    pub async fn read_remote(
        &self,
        ctx: &CallerContext,
        id: &str,
    ) -> SyncResult<ConversationRecord> {
        validate_read(ctx, id)?;
        let metrics = OperationMetrics::new("read");
        self.read_through(ctx, id, &metrics).await
    }

    /// Current remote record, if any, without touching the cache
    ///
    /// Used by the writer to learn the stored version before a write.
    pub async fn fetch_current(
        &self,
        ctx: &CallerContext,
        id: &str,
    ) -> SyncResult<Option<ConversationRecord>> {
        validate_read(ctx, id)?;
        match self.resolve(ctx.owner_id(), id).await {
            Ok(record) => Ok(Some(record)),
            Err(SyncError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn read_through(
        &self,
        ctx: &CallerContext,
        id: &str,
        metrics: &OperationMetrics,
    ) -> SyncResult<ConversationRecord> {
        let ticket: RequestTicket = self.cache.issue_ticket();
        match self.resolve(ctx.owner_id(), id).await {
            Ok(record) => {
                self.cache
                    .put_with_ticket(ctx.owner_id(), id, record.clone(), ticket);
                metrics.record_outcome("ok");
                Ok(record)
            }
            Err(err) => {
                self.cache.invalidate_with_ticket(ctx.owner_id(), id, ticket);
                metrics.record_outcome(err.kind());
                Err(err)
            }
        }
    }

    /// Run the strategy pipeline, retrying transient failures with backoff
    async fn resolve(&self, owner_id: &str, id: &str) -> SyncResult<ConversationRecord> {
        let mut attempt = 1;
        loop {
            match self.run_pipeline(owner_id, id).await {
                Ok(Some(record)) => return Ok(record),
                Ok(None) => {
                    return Err(SyncError::NotFound { id: id.to_string() });
                }
                Err(failure) if failure.retryable && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        id = %id,
                        owner = %owner_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.error,
                        "Read failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(failure) => {
                    tracing::warn!(
                        id = %id,
                        owner = %owner_id,
                        attempt,
                        error = %failure.error,
                        "Read failed on every strategy"
                    );
                    return Err(SyncError::StoreUnavailable(failure.error.to_string()));
                }
            }
        }
    }

    async fn run_pipeline(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Option<ConversationRecord>, PipelineFailure> {
        let mut last_error = None;
        let mut retryable = false;

        for strategy in ReadStrategy::ORDER {
            match self.try_strategy(strategy, owner_id, id).await {
                StrategyOutcome::Found(record) => return Ok(Some(record)),
                StrategyOutcome::Missing => return Ok(None),
                StrategyOutcome::Retryable(err) => {
                    tracing::debug!(strategy = strategy.label(), error = %err, "Strategy failed, falling back");
                    record_read_fallback(strategy.label());
                    retryable = true;
                    last_error = Some(err);
                }
                StrategyOutcome::Fatal(err) => {
                    tracing::debug!(strategy = strategy.label(), error = %err, "Strategy failed, falling back");
                    record_read_fallback(strategy.label());
                    last_error = Some(err);
                }
            }
        }

        Err(PipelineFailure {
            error: last_error
                .unwrap_or_else(|| StoreError::Unavailable("no read strategy ran".to_string())),
            retryable,
        })
    }

    /// Run one strategy and normalise its answer
    pub async fn try_strategy(
        &self,
        strategy: ReadStrategy,
        owner_id: &str,
        id: &str,
    ) -> StrategyOutcome {
        let deadline = self.call_timeout;
        let rows = match strategy {
            ReadStrategy::PointLookup => {
                with_deadline(deadline, self.store.fetch_one(id, owner_id))
                    .await
                    .map(|row| row.into_iter().collect::<Vec<_>>())
            }
            ReadStrategy::OrderedScan => {
                with_deadline(deadline, self.store.fetch_by_key(id, owner_id)).await
            }
            ReadStrategy::SafeLookup => {
                with_deadline(deadline, self.store.fetch_safe(id, owner_id))
                    .await
                    .map(|row| row.into_iter().collect::<Vec<_>>())
            }
        };

        match rows {
            Ok(rows) => match normalize(owner_id, id, rows) {
                Some(record) => StrategyOutcome::Found(record),
                None => StrategyOutcome::Missing,
            },
            Err(err) => err.into(),
        }
    }
}

fn validate_read(ctx: &CallerContext, id: &str) -> SyncResult<()> {
    ctx.ensure_owner()?;
    if id.trim().is_empty() {
        return Err(SyncError::InvalidInput(
            "conversation id must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Apply the shared selection rule to whatever rows a strategy returned
fn normalize(owner_id: &str, id: &str, rows: Vec<ConversationRecord>) -> Option<ConversationRecord> {
    let scoped: Vec<ConversationRecord> = rows
        .into_iter()
        .filter(|row| {
            let ours = row.owner_id == owner_id && row.id == id;
            if !ours {
                tracing::error!(
                    id = %id,
                    owner = %owner_id,
                    row_owner = %row.owner_id,
                    row_id = %row.id,
                    "Store returned a row outside the requested key; ignoring it"
                );
            }
            ours
        })
        .collect();

    if scoped.len() > 1 {
        tracing::debug!(id = %id, rows = scoped.len(), "Collapsing duplicate rows");
    }

    let selected = select_authoritative(&scoped).cloned()?;
    if !verify_checksum(&selected) {
        tracing::warn!(
            id = %id,
            version = selected.version,
            "Stored checksum does not match conversation content"
        );
    }
    Some(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreResult;
    use crate::storage::{MemoryStore, UpsertOutcome};
    use crate::test_utils::{caller, sample_record};
    use async_trait::async_trait;
    use chrono::Utc;
    use mockall::mock;

    mock! {
        pub Store {}

        #[async_trait]
        impl ConversationStore for Store {
            async fn fetch_one(&self, id: &str, owner_id: &str) -> StoreResult<Option<ConversationRecord>>;
            async fn fetch_by_key(&self, id: &str, owner_id: &str) -> StoreResult<Vec<ConversationRecord>>;
            async fn fetch_safe(&self, id: &str, owner_id: &str) -> StoreResult<Option<ConversationRecord>>;
            async fn upsert(
                &self,
                record: &ConversationRecord,
                expected_version: Option<u64>,
                force_overwrite: bool,
            ) -> StoreResult<UpsertOutcome>;
            async fn list_by_owner(&self, owner_id: &str) -> StoreResult<Vec<ConversationRecord>>;
        }
    }

    fn versioned(version: u64, secs_ago: i64) -> ConversationRecord {
        let mut record = sample_record("c1", "u1");
        record.version = version;
        record.last_modified = Utc::now() - chrono::Duration::seconds(secs_ago);
        record
    }

    fn reader_over(store: Arc<dyn ConversationStore>) -> (ResilientReader, Arc<ConversationCache>) {
        let cache = Arc::new(ConversationCache::new(Duration::from_secs(60), 16));
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        let reader = ResilientReader::new(store, cache.clone(), retry, Duration::from_secs(1));
        (reader, cache)
    }

    #[tokio::test]
    async fn test_point_lookup_answers_directly() {
        let mut store = MockStore::new();
        store
            .expect_fetch_one()
            .times(1)
            .returning(|_, _| Ok(Some(versioned(1, 0))));
        store.expect_fetch_by_key().times(0);
        store.expect_fetch_safe().times(0);

        let (reader, cache) = reader_over(Arc::new(store));
        let record = reader.read(&caller("u1"), "c1").await.expect("read");
        assert_eq!(record.version, 1);
        assert!(cache.get("u1", "c1").is_some());
    }

    #[tokio::test]
    async fn test_ambiguous_point_lookup_falls_back_to_newest_row() {
        let mut store = MockStore::new();
        store
            .expect_fetch_one()
            .times(1)
            .returning(|_, _| Err(StoreError::NotSingleRow { rows: 2 }));
        store
            .expect_fetch_by_key()
            .times(1)
            .returning(|_, _| Ok(vec![versioned(4, 120), versioned(3, 5)]));
        store.expect_fetch_safe().times(0);

        let (reader, _cache) = reader_over(Arc::new(store));
        let record = reader.read(&caller("u1"), "c1").await.expect("read");
        assert_eq!(record.version, 3);
    }

    #[tokio::test]
    async fn test_safe_lookup_is_final_fallback() {
        let mut store = MockStore::new();
        store
            .expect_fetch_one()
            .returning(|_, _| Err(StoreError::NotSingleRow { rows: 3 }));
        store
            .expect_fetch_by_key()
            .returning(|_, _| Err(StoreError::Corrupt("bad messages column".into())));
        store
            .expect_fetch_safe()
            .times(1)
            .returning(|_, _| Ok(Some(versioned(7, 0))));

        let (reader, _cache) = reader_over(Arc::new(store));
        let record = reader.read(&caller("u1"), "c1").await.expect("read");
        assert_eq!(record.version, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_then_surface() {
        let mut store = MockStore::new();
        store
            .expect_fetch_one()
            .times(3)
            .returning(|_, _| Err(StoreError::Unavailable("503".into())));
        store
            .expect_fetch_by_key()
            .times(3)
            .returning(|_, _| Err(StoreError::Unavailable("503".into())));
        store
            .expect_fetch_safe()
            .times(3)
            .returning(|_, _| Err(StoreError::Unavailable("503".into())));

        let (reader, _cache) = reader_over(Arc::new(store));
        let err = reader.read(&caller("u1"), "c1").await.unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_outage_recovers_on_next_attempt() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw(versioned(1, 0)).await;
        for _ in 0..3 {
            store
                .fail_next(StoreError::Unavailable("connection reset".into()))
                .await;
        }

        let (reader, cache) = reader_over(store.clone());
        let record = reader.read(&caller("u1"), "c1").await.expect("read");
        assert_eq!(record.version, 1);
        assert_eq!(store.read_count(), 4);
        assert_eq!(cache.get("u1", "c1").map(|r| r.version), Some(1));
    }

    #[tokio::test]
    async fn test_fatal_failures_are_not_retried() {
        let mut store = MockStore::new();
        store
            .expect_fetch_one()
            .times(1)
            .returning(|_, _| Err(StoreError::Corrupt("x".into())));
        store
            .expect_fetch_by_key()
            .times(1)
            .returning(|_, _| Err(StoreError::Corrupt("x".into())));
        store
            .expect_fetch_safe()
            .times(1)
            .returning(|_, _| Err(StoreError::Corrupt("x".into())));

        let (reader, _cache) = reader_over(Arc::new(store));
        let err = reader.read(&caller("u1"), "c1").await.unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found_and_clears_cache() {
        let store = Arc::new(MemoryStore::new());
        let (reader, cache) = reader_over(store.clone());
        cache.put("u1", "c1", versioned(1, 0));

        let err = reader.read_remote(&caller("u1"), "c1").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert!(cache.get("u1", "c1").is_none());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw(versioned(1, 0)).await;
        let (reader, _cache) = reader_over(store.clone());

        reader.read(&caller("u1"), "c1").await.expect("first read");
        reader.read(&caller("u1"), "c1").await.expect("second read");
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn test_rows_owned_by_someone_else_are_ignored() {
        let mut store = MockStore::new();
        store.expect_fetch_one().returning(|_, _| {
            let mut foreign = sample_record("c1", "intruder");
            foreign.version = 9;
            Ok(Some(foreign))
        });

        let (reader, _cache) = reader_over(Arc::new(store));
        let err = reader.read(&caller("u1"), "c1").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out_as_unavailable() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw(versioned(1, 0)).await;
        store.set_latency(Some(Duration::from_secs(10))).await;
        let (reader, _cache) = reader_over(store);

        let err = reader.read(&caller("u1"), "c1").await.unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable(_)));
        assert!(err.to_string().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_empty_id_is_invalid_input() {
        let (reader, _cache) = reader_over(Arc::new(MemoryStore::new()));
        let err = reader.read(&caller("u1"), " ").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_fetch_current_maps_absence_to_none() {
        let (reader, _cache) = reader_over(Arc::new(MemoryStore::new()));
        let current = reader.fetch_current(&caller("u1"), "c1").await.expect("fetch");
        assert!(current.is_none());
    }
}
