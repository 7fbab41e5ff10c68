//! Non-atomic counter store over generic cache primitives.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ceil_secs_until, secs_to_millis, window_end, Cache, CounterStore};
use crate::clock::{Clock, SystemClock};

/// Counter record as persisted in the underlying cache.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct CounterRecord {
    value: u64,
    /// Epoch second at which the window closes.
    window_end: u64,
}

/// Counter store for backends that only offer get/set/has/delete.
///
/// Each increment reads the record, adds one and writes it back. Two callers
/// racing on the same key can both read the same value and one update is lost,
/// so counts may under-report under concurrency. Prefer a backend with a native
/// atomic increment.
pub struct CacheCounterStore<C: Cache> {
    cache: C,
    clock: Arc<dyn Clock>,
}

impl<C: Cache> CacheCounterStore<C> {
    /// Wrap a cache, driven by the system clock.
    pub fn new(cache: C) -> Self {
        Self::with_clock(cache, Arc::new(SystemClock::new()))
    }

    /// Wrap a cache, driven by the given clock.
    pub fn with_clock(cache: C, clock: Arc<dyn Clock>) -> Self {
        warn!("Using non-atomic counter fallback; concurrent increments may be lost");
        Self { cache, clock }
    }

    /// Access the wrapped cache.
    pub fn inner(&self) -> &C {
        &self.cache
    }

    fn load(&self, key: &str) -> Option<CounterRecord> {
        let raw = self.cache.get(key)?;
        // Unreadable records count as zero.
        Some(serde_json::from_str(&raw).unwrap_or_default())
    }
}

impl<C: Cache> Cache for CacheCounterStore<C> {
    fn get(&self, key: &str) -> Option<String> {
        self.cache.get(key)
    }

    fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) {
        self.cache.set(key, value, ttl_secs)
    }

    fn has(&self, key: &str) -> bool {
        self.cache.has(key)
    }

    fn delete(&self, key: &str) {
        self.cache.delete(key)
    }
}

impl<C: Cache> CounterStore for CacheCounterStore<C> {
    fn increment(&self, key: &str, period_secs: u64) -> u64 {
        let now = self.clock.now_millis();
        let current_end = window_end(now / 1000, period_secs);

        let mut record = match self.load(key) {
            Some(record) if secs_to_millis(record.window_end) > now => CounterRecord {
                value: record.value,
                window_end: record.window_end.min(current_end),
            },
            _ => CounterRecord {
                value: 0,
                window_end: current_end,
            },
        };
        record.value += 1;

        let ttl = ceil_secs_until(secs_to_millis(record.window_end), now).max(1);
        match serde_json::to_string(&record) {
            Ok(encoded) => self.cache.set(key, &encoded, Some(ttl)),
            Err(e) => warn!(key = %key, error = %e, "Failed to encode counter record"),
        }
        record.value
    }

    fn ttl_remaining(&self, key: &str) -> u64 {
        let now = self.clock.now_millis();
        self.load(key)
            .map(|record| ceil_secs_until(secs_to_millis(record.window_end), now))
            .unwrap_or(0)
    }
}
