//! Counter store contract and implementations.
//!
//! Every store must agree on window edges: a counter incremented with period
//! `P` at epoch second `t` belongs to the window ending at
//! `floor(t / P) * P + P`. Because the edges depend only on the clock, separate
//! processes sharing a backend agree on them without coordination.
//!
//! - [`InMemoryStore`] is the reference implementation. Its `increment` is
//!   atomic per key within one process, but it cannot be shared between
//!   independent OS processes.
//! - [`CacheCounterStore`] adapts any generic [`Cache`] into a counter store
//!   with a plain read-add-write. It re-introduces a lost-update race under
//!   concurrent writers and should only be used as a last resort.
//! - [`FailOpenStore`] wraps a fallible backend and reports outages as zero
//!   counts so that the backend failing does not itself deny traffic.

mod cache;
mod fail_open;
mod memory;

pub use cache::CacheCounterStore;
pub use fail_open::{FailOpenStore, TryCounterStore};
pub use memory::{spawn_janitor, InMemoryStore};

/// Generic key/value cache primitives.
///
/// Ban flags live here as presence-only keys, and the degraded counter path
/// is built entirely on these four operations.
pub trait Cache: Send + Sync {
    /// Fetch a live value.
    fn get(&self, key: &str) -> Option<String>;

    /// Store a value. `None` keeps it until deleted; `Some(0)` expires it at once.
    fn set(&self, key: &str, value: &str, ttl_secs: Option<u64>);

    /// Whether a live value exists for the key.
    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove the key.
    fn delete(&self, key: &str);
}

/// Fixed-window counter primitives used by throttle, fail2ban and track rules.
///
/// `increment` must be linearizable per key: no two concurrent callers may
/// observe the same pre-increment value.
pub trait CounterStore: Cache {
    /// Increment the counter for the current fixed window of `period_secs`
    /// and return the new count.
    ///
    /// An absent or expired entry restarts at zero. A live entry whose stored
    /// deadline lies beyond the window computed from the current time has its
    /// deadline clamped down to that window end.
    fn increment(&self, key: &str, period_secs: u64) -> u64;

    /// Seconds until the counter's window ends, rounded up; `0` when the key
    /// is absent or expired.
    fn ttl_remaining(&self, key: &str) -> u64;
}

/// End of the fixed window containing `now_secs`, in epoch seconds.
pub fn window_end(now_secs: u64, period_secs: u64) -> u64 {
    let period = period_secs.max(1);
    ((now_secs / period) * period).saturating_add(period)
}

/// Whole seconds as milliseconds, saturating at `u64::MAX`.
pub(crate) fn secs_to_millis(secs: u64) -> u64 {
    secs.saturating_mul(1000)
}

/// Interpret a stored counter value, treating anything unparseable as zero.
pub(crate) fn parse_count(raw: &str) -> u64 {
    raw.trim().parse::<u64>().unwrap_or(0)
}

/// Remaining whole seconds from `now_ms` until `deadline_ms`, rounded up.
pub(crate) fn ceil_secs_until(deadline_ms: u64, now_ms: u64) -> u64 {
    let remaining = deadline_ms.saturating_sub(now_ms);
    remaining.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_end_aligned_to_epoch() {
        assert_eq!(window_end(0, 10), 10);
        assert_eq!(window_end(9, 10), 10);
        assert_eq!(window_end(10, 10), 20);
        assert_eq!(window_end(1_700_000_003, 60), 1_700_000_040);
    }

    #[test]
    fn test_window_end_zero_period_treated_as_one() {
        assert_eq!(window_end(41, 0), 42);
    }

    #[test]
    fn test_window_end_saturates_for_huge_periods() {
        assert_eq!(window_end(u64::MAX, u64::MAX / 2), u64::MAX);
        assert_eq!(window_end(1_700_000_000, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_secs_to_millis_saturates() {
        assert_eq!(secs_to_millis(7), 7_000);
        assert_eq!(secs_to_millis(u64::MAX / 10), u64::MAX);
    }

    #[test]
    fn test_parse_count_coerces_garbage() {
        assert_eq!(parse_count("7"), 7);
        assert_eq!(parse_count(" 12 "), 12);
        assert_eq!(parse_count("banned"), 0);
        assert_eq!(parse_count("-3"), 0);
        assert_eq!(parse_count(""), 0);
    }

    #[test]
    fn test_ceil_secs_until() {
        assert_eq!(ceil_secs_until(10_000, 9_001), 1);
        assert_eq!(ceil_secs_until(10_000, 9_000), 1);
        assert_eq!(ceil_secs_until(10_000, 8_999), 2);
        assert_eq!(ceil_secs_until(10_000, 10_000), 0);
        assert_eq!(ceil_secs_until(10_000, 12_000), 0);
    }
}
