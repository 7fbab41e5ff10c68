//! Fail-open adapter for fallible backends.

use std::fmt::Display;

use tracing::warn;

use super::{Cache, CounterStore};

/// Counter store operations that can fail, e.g. a remote cache round-trip.
///
/// Implementations are responsible for bounding how long each call may block.
pub trait TryCounterStore: Send + Sync {
    /// Backend error type.
    type Error: Display;

    fn try_increment(&self, key: &str, period_secs: u64) -> Result<u64, Self::Error>;
    fn try_ttl_remaining(&self, key: &str) -> Result<u64, Self::Error>;
    fn try_get(&self, key: &str) -> Result<Option<String>, Self::Error>;
    fn try_set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), Self::Error>;
    fn try_delete(&self, key: &str) -> Result<(), Self::Error>;
}

/// Presents a [`TryCounterStore`] as an infallible [`CounterStore`].
///
/// Failed counter calls read as `0` and failed lookups as absent, so a backend
/// outage lets traffic through instead of blocking it. Failed writes are logged
/// and dropped.
pub struct FailOpenStore<S> {
    inner: S,
}

impl<S: TryCounterStore> FailOpenStore<S> {
    /// Wrap a fallible backend.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Access the wrapped backend.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: TryCounterStore> Cache for FailOpenStore<S> {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.try_get(key).unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Counter store get failed; treating as absent");
            None
        })
    }

    fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>) {
        if let Err(e) = self.inner.try_set(key, value, ttl_secs) {
            warn!(key = %key, error = %e, "Counter store set failed");
        }
    }

    fn delete(&self, key: &str) {
        if let Err(e) = self.inner.try_delete(key) {
            warn!(key = %key, error = %e, "Counter store delete failed");
        }
    }
}

impl<S: TryCounterStore> CounterStore for FailOpenStore<S> {
    fn increment(&self, key: &str, period_secs: u64) -> u64 {
        self.inner.try_increment(key, period_secs).unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Counter store increment failed; failing open");
            0
        })
    }

    fn ttl_remaining(&self, key: &str) -> u64 {
        self.inner.try_ttl_remaining(key).unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Counter store ttl lookup failed; failing open");
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory backend that can be switched into an outage.
    struct Flaky {
        store: InMemoryStore,
        down: AtomicBool,
    }

    impl Flaky {
        fn check(&self) -> Result<(), String> {
            if self.down.load(Ordering::SeqCst) {
                Err("connection refused".to_string())
            } else {
                Ok(())
            }
        }
    }

    impl TryCounterStore for Flaky {
        type Error = String;

        fn try_increment(&self, key: &str, period_secs: u64) -> Result<u64, String> {
            self.check()?;
            Ok(self.store.increment(key, period_secs))
        }

        fn try_ttl_remaining(&self, key: &str) -> Result<u64, String> {
            self.check()?;
            Ok(self.store.ttl_remaining(key))
        }

        fn try_get(&self, key: &str) -> Result<Option<String>, String> {
            self.check()?;
            Ok(self.store.get(key))
        }

        fn try_set(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<(), String> {
            self.check()?;
            self.store.set(key, value, ttl_secs);
            Ok(())
        }

        fn try_delete(&self, key: &str) -> Result<(), String> {
            self.check()?;
            self.store.delete(key);
            Ok(())
        }
    }

    #[test]
    fn test_healthy_backend_passes_through() {
        let store = FailOpenStore::new(Flaky {
            store: InMemoryStore::new(),
            down: AtomicBool::new(false),
        });

        assert_eq!(store.increment("k", 60), 1);
        assert_eq!(store.increment("k", 60), 2);
        assert!(store.ttl_remaining("k") >= 1);
        store.set("ban", "1", Some(60));
        assert!(store.has("ban"));
    }

    #[test]
    fn test_outage_fails_open() {
        let store = FailOpenStore::new(Flaky {
            store: InMemoryStore::new(),
            down: AtomicBool::new(false),
        });
        store.set("ban", "1", Some(60));
        store.increment("k", 60);

        store.inner().down.store(true, Ordering::SeqCst);

        assert_eq!(store.increment("k", 60), 0);
        assert_eq!(store.ttl_remaining("k"), 0);
        assert!(!store.has("ban"));
        store.delete("ban");

        store.inner().down.store(false, Ordering::SeqCst);
        assert!(store.has("ban"));
    }
}
