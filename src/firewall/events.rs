//! Notifications emitted by the pipeline.
//!
//! Sinks observe decisions; they never influence them. Delivery is best-effort.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// A pipeline outcome worth reporting.
///
/// Rule names and keys are reported as configured and extracted, before
/// normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FirewallEvent {
    SafelistMatched {
        rule: String,
        source: String,
        at: DateTime<Utc>,
    },
    BlocklistMatched {
        rule: String,
        source: String,
        metadata: Option<String>,
        at: DateTime<Utc>,
    },
    ThrottleExceeded {
        rule: String,
        key: String,
        count: u64,
        limit: u64,
        period: u64,
        retry_after: u64,
        at: DateTime<Utc>,
    },
    Fail2BanBanned {
        rule: String,
        key: String,
        count: u64,
        threshold: u64,
        period: u64,
        ban_seconds: u64,
        at: DateTime<Utc>,
    },
    TrackHit {
        rule: String,
        key: String,
        count: u64,
        period: u64,
        at: DateTime<Utc>,
    },
}

impl FirewallEvent {
    pub fn rule(&self) -> &str {
        match self {
            FirewallEvent::SafelistMatched { rule, .. }
            | FirewallEvent::BlocklistMatched { rule, .. }
            | FirewallEvent::ThrottleExceeded { rule, .. }
            | FirewallEvent::Fail2BanBanned { rule, .. }
            | FirewallEvent::TrackHit { rule, .. } => rule,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FirewallEvent::SafelistMatched { .. } => "safelist_matched",
            FirewallEvent::BlocklistMatched { .. } => "blocklist_matched",
            FirewallEvent::ThrottleExceeded { .. } => "throttle_exceeded",
            FirewallEvent::Fail2BanBanned { .. } => "fail2ban_banned",
            FirewallEvent::TrackHit { .. } => "track_hit",
        }
    }
}

/// Receiver of firewall events.
pub trait EventSink: Send + Sync {
    fn notify(&self, event: &FirewallEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn notify(&self, _event: &FirewallEvent) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn notify(&self, event: &FirewallEvent) {
        match event {
            FirewallEvent::TrackHit {
                rule, key, count, ..
            } => {
                trace!(rule = %rule, key = %key, count = count, "Track hit");
            }
            FirewallEvent::SafelistMatched { rule, source, .. } => {
                debug!(rule = %rule, source = %source, "Safelist matched");
            }
            FirewallEvent::BlocklistMatched { rule, source, .. } => {
                info!(rule = %rule, source = %source, "Blocklist matched");
            }
            FirewallEvent::ThrottleExceeded {
                rule,
                key,
                count,
                limit,
                retry_after,
                ..
            } => {
                info!(
                    rule = %rule,
                    key = %key,
                    count = count,
                    limit = limit,
                    retry_after = retry_after,
                    "Throttle exceeded"
                );
            }
            FirewallEvent::Fail2BanBanned {
                rule,
                key,
                count,
                ban_seconds,
                ..
            } => {
                info!(
                    rule = %rule,
                    key = %key,
                    count = count,
                    ban_seconds = ban_seconds,
                    "Key banned"
                );
            }
        }
    }
}

/// Forwards events to a closure.
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(&FirewallEvent) + Send + Sync,
{
    fn notify(&self, event: &FirewallEvent) {
        (self.0)(event)
    }
}

/// Forwards events into a bounded channel without blocking.
///
/// Events are dropped when the channel is full or closed.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<FirewallEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FirewallEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn notify(&self, event: &FirewallEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            trace!(kind = event.kind(), error = %e, "Dropped firewall event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn track_event(rule: &str) -> FirewallEvent {
        FirewallEvent::TrackHit {
            rule: rule.to_string(),
            key: "10.0.0.1".to_string(),
            count: 3,
            period: 60,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_event_accessors() {
        let event = track_event("logins");
        assert_eq!(event.rule(), "logins");
        assert_eq!(event.kind(), "track_hit");
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(track_event("logins")).unwrap();
        assert_eq!(json["type"], "track_hit");
        assert_eq!(json["count"], 3);
    }

    #[test]
    fn test_fn_sink_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            FnSink(move |e: &FirewallEvent| seen.lock().push(e.rule().to_string()))
        };

        sink.notify(&track_event("a"));
        sink.notify(&track_event("b"));
        assert_eq!(*seen.lock(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::channel(1);

        sink.notify(&track_event("first"));
        sink.notify(&track_event("second"));

        let received = tokio_test::block_on(rx.recv()).unwrap();
        assert_eq!(received.rule(), "first");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_channel_sink_tolerates_closed_receiver() {
        let (sink, rx) = ChannelSink::channel(4);
        drop(rx);
        sink.notify(&track_event("orphan"));
    }
}
