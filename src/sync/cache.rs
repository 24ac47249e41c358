//! Time-bounded read-through cache of conversation records
//!
//! Entries are keyed by `(owner_id, id)` and served only while younger than
//! the freshness window. Every mutation can carry a [`RequestTicket`]
//! issued when the originating request started; a mutation holding an older
//! ticket than the last one applied to the key is discarded, so a slow,
//! abandoned request cannot overwrite what a newer request already stored.

use super::metrics::record_cache_lookup;
use crate::storage::ConversationRecord;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic request-order stamp for cache mutations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestTicket(u64);

#[derive(Debug, Clone)]
struct CacheEntry {
    record: ConversationRecord,
    stored_at: Instant,
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<CacheEntry>,
    watermark: u64,
}

type CacheKey = (String, String);

fn key(owner_id: &str, id: &str) -> CacheKey {
    (owner_id.to_string(), id.to_string())
}

/// Slots plus the highest watermark of any slot pruned while idle
///
/// A key without a slot behaves as if its watermark were `floor`.
#[derive(Debug, Default)]
struct CacheState {
    slots: HashMap<CacheKey, Slot>,
    floor: u64,
}

impl CacheState {
    /// Claim the slot for `key` under `ticket`, or `None` if a newer request won
    fn claim(&mut self, key: CacheKey, ticket: RequestTicket) -> Option<&mut Slot> {
        let floor = self.floor;
        let slot = self.slots.entry(key).or_insert_with(|| Slot {
            entry: None,
            watermark: floor,
        });
        if ticket.0 < slot.watermark {
            return None;
        }
        slot.watermark = ticket.0;
        Some(slot)
    }

    /// Drop slots holding no record once the map outgrows `max_slots`
    fn prune_idle(&mut self, max_slots: usize) {
        if self.slots.len() <= max_slots {
            return;
        }
        let mut floor = self.floor;
        self.slots.retain(|_, slot| {
            if slot.entry.is_some() {
                return true;
            }
            floor = floor.max(slot.watermark);
            false
        });
        self.floor = floor;
    }
}

/// In-memory conversation cache with freshness expiry
#[derive(Debug)]
pub struct ConversationCache {
    state: Mutex<CacheState>,
    next_ticket: AtomicU64,
    freshness: Duration,
    max_entries: usize,
}

impl ConversationCache {
    /// Create a cache serving entries for at most `freshness`
    ///
    /// At most `max_entries` records are held; the oldest is evicted first.
    pub fn new(freshness: Duration, max_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            next_ticket: AtomicU64::new(0),
            freshness,
            max_entries: max_entries.max(1),
        }
    }

    /// Length of the freshness window
    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    /// Stamp a new request; later calls always receive larger tickets
    pub fn issue_ticket(&self) -> RequestTicket {
        RequestTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached record if it is still fresh
    pub fn get(&self, owner_id: &str, id: &str) -> Option<ConversationRecord> {
        let mut state = self.lock();
        let hit = match state.slots.get_mut(&key(owner_id, id)) {
            Some(slot) => {
                let fresh = slot
                    .entry
                    .as_ref()
                    .map(|e| e.stored_at.elapsed() < self.freshness);
                match fresh {
                    Some(true) => slot.entry.as_ref().map(|e| e.record.clone()),
                    Some(false) => {
                        slot.entry = None;
                        None
                    }
                    None => None,
                }
            }
            None => None,
        };
        state.prune_idle(self.max_entries);
        record_cache_lookup(hit.is_some());
        hit
    }

    /// Store a record unconditionally (a fresh ticket is issued)
    pub fn put(&self, owner_id: &str, id: &str, record: ConversationRecord) {
        let ticket = self.issue_ticket();
        self.put_with_ticket(owner_id, id, record, ticket);
    }

    /// Store a record unless a newer request already touched the key
    ///
    /// Returns `false` when the mutation was discarded as stale.
    pub fn put_with_ticket(
        &self,
        owner_id: &str,
        id: &str,
        record: ConversationRecord,
        ticket: RequestTicket,
    ) -> bool {
        let mut state = self.lock();
        let accepted = match state.claim(key(owner_id, id), ticket) {
            Some(slot) => {
                slot.entry = Some(CacheEntry {
                    record,
                    stored_at: Instant::now(),
                });
                true
            }
            None => {
                tracing::debug!(owner = %owner_id, id = %id, "Discarding stale cache write");
                false
            }
        };
        if accepted {
            self.evict_overflow(&mut state.slots);
        }
        state.prune_idle(self.max_entries);
        accepted
    }

    /// Drop a record unconditionally
    pub fn invalidate(&self, owner_id: &str, id: &str) {
        let ticket = self.issue_ticket();
        self.invalidate_with_ticket(owner_id, id, ticket);
    }

    /// Drop a record unless a newer request already touched the key
    pub fn invalidate_with_ticket(&self, owner_id: &str, id: &str, ticket: RequestTicket) -> bool {
        let mut state = self.lock();
        let accepted = match state.claim(key(owner_id, id), ticket) {
            Some(slot) => {
                slot.entry = None;
                true
            }
            None => false,
        };
        state.prune_idle(self.max_entries);
        accepted
    }

    /// Seed the cache from a list response issued under `ticket`
    pub fn prime(&self, records: &[ConversationRecord], ticket: RequestTicket) -> usize {
        let mut primed = 0;
        for record in records.iter().filter(|r| !r.is_deleted()) {
            if self.put_with_ticket(&record.owner_id, &record.id, record.clone(), ticket) {
                primed += 1;
            }
        }
        primed
    }

    /// Number of records currently held (fresh or not yet pruned)
    pub fn len(&self) -> usize {
        self.lock()
            .slots
            .values()
            .filter(|s| s.entry.is_some())
            .count()
    }

    /// Whether no records are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record, keeping request watermarks
    pub fn clear(&self) {
        let mut state = self.lock();
        for slot in state.slots.values_mut() {
            slot.entry = None;
        }
        state.prune_idle(self.max_entries);
    }

    fn evict_overflow(&self, slots: &mut HashMap<CacheKey, Slot>) {
        loop {
            let held = slots.values().filter(|s| s.entry.is_some()).count();
            if held <= self.max_entries {
                return;
            }
            let oldest = slots
                .iter()
                .filter_map(|(k, s)| s.entry.as_ref().map(|e| (k.clone(), e.stored_at)))
                .min_by_key(|(_, stored_at)| *stored_at)
                .map(|(k, _)| k);
            let oldest = match oldest {
                Some(k) => k,
                None => return,
            };
            match slots.get_mut(&oldest) {
                Some(slot) => slot.entry = None,
                None => return,
            }
        }
    }
}
