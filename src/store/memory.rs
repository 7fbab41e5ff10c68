//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{ceil_secs_until, parse_count, secs_to_millis, window_end, Cache, CounterStore};
use crate::clock::{Clock, SystemClock};

/// A stored value and its absolute deadline.
#[derive(Debug, Clone)]
struct Slot {
    value: String,
    /// Epoch milliseconds after which the slot is dead; `None` never expires.
    expires_at: Option<u64>,
}

impl Slot {
    fn is_expired(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now_ms)
    }
}

/// Counter store backed by a sharded concurrent map.
///
/// `increment` holds the shard write lock for the whole read-modify-write, so
/// concurrent increments of one key are serialized. Expired slots are dropped
/// lazily on access or in bulk by [`InMemoryStore::purge_expired`].
///
/// Safe for any number of threads in one process; not shared across processes.
#[derive(Debug)]
pub struct InMemoryStore {
    entries: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    /// Create a store driven by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// Create a store driven by the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of slots held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no slots.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every slot.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every expired slot, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Cache for InMemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_millis();
        if let Some(slot) = self.entries.get(key) {
            if !slot.is_expired(now) {
                return Some(slot.value.clone());
            }
        }
        self.entries.remove_if(key, |_, slot| slot.is_expired(now));
        None
    }

    fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) {
        if ttl_secs == Some(0) {
            self.entries.remove(key);
            return;
        }
        let now = self.clock.now_millis();
        self.entries.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at: ttl_secs.map(|ttl| now.saturating_add(secs_to_millis(ttl))),
            },
        );
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

impl CounterStore for InMemoryStore {
    fn increment(&self, key: &str, period_secs: u64) -> u64 {
        let now = self.clock.now_millis();
        let deadline = secs_to_millis(window_end(now / 1000, period_secs));

        let mut slot = self.entries.entry(key.to_string()).or_insert_with(|| Slot {
            value: "0".to_string(),
            expires_at: Some(deadline),
        });

        if slot.is_expired(now) {
            slot.value = "0".to_string();
            slot.expires_at = Some(deadline);
        } else if slot.expires_at.map_or(true, |current| current > deadline) {
            slot.expires_at = Some(deadline);
        }

        let count = parse_count(&slot.value) + 1;
        slot.value = count.to_string();

        trace!(key = %key, count = count, deadline_ms = deadline, "Incremented counter");
        count
    }

    fn ttl_remaining(&self, key: &str) -> u64 {
        let now = self.clock.now_millis();
        match self.entries.get(key) {
            Some(slot) => match slot.expires_at {
                Some(deadline) if deadline > now => ceil_secs_until(deadline, now),
                _ => 0,
            },
            None => 0,
        }
    }
}

/// Periodically purge expired slots from a shared in-memory store.
///
/// The task runs until the returned handle is aborted or the runtime shuts down.
pub fn spawn_janitor(store: Arc<InMemoryStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = store.purge_expired();
            if removed > 0 {
                debug!(removed = removed, remaining = store.len(), "Purged expired entries");
            }
        }
    })
}
