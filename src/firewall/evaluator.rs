//! The request evaluation pipeline.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::decision::{BlockType, Decision, RateLimitInfo};
use super::diagnostics::{Category, DiagnosticsCounters};
use super::events::{EventSink, FirewallEvent, NoopSink};
use super::keys::{KeyKind, StoreKey};
use super::request::Request;
use super::rules::RuleSet;
use crate::config::FirewallOptions;
use crate::store::CounterStore;

/// Evaluates requests against a rule set.
///
/// `decide` runs, in order: track rules (side effects only), safelists,
/// blocklists, fail2ban rules, throttles. The first terminal stage wins.
///
/// The firewall keeps no per-request state of its own; all counters and bans
/// live in the injected [`CounterStore`], which carries the concurrency
/// guarantees. One instance can be shared across threads.
pub struct Firewall {
    rules: RwLock<Arc<RuleSet>>,
    store: Arc<dyn CounterStore>,
    sink: Arc<dyn EventSink>,
    diagnostics: Arc<DiagnosticsCounters>,
    options: FirewallOptions,
}

impl Firewall {
    /// Create a firewall with default options and no event sink.
    pub fn new(rules: RuleSet, store: Arc<dyn CounterStore>) -> Self {
        Self {
            rules: RwLock::new(Arc::new(rules)),
            store,
            sink: Arc::new(NoopSink),
            diagnostics: Arc::new(DiagnosticsCounters::new()),
            options: FirewallOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FirewallOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Share diagnostics counters with other components.
    pub fn with_diagnostics(mut self, diagnostics: Arc<DiagnosticsCounters>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Replace the rule set. Calls already in progress finish on the old one.
    pub fn set_rules(&self, rules: RuleSet) {
        *self.rules.write() = Arc::new(rules);
    }

    /// Current rule set snapshot.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.read().clone()
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticsCounters> {
        &self.diagnostics
    }

    pub fn options(&self) -> &FirewallOptions {
        &self.options
    }

    /// Evaluate a request.
    ///
    /// Panics raised by matchers or key extractors propagate to the caller.
    pub fn decide(&self, request: &Request) -> Decision {
        let rules = self.rules();

        self.run_tracks(&rules, request);

        if let Some(decision) = self.check_safelists(&rules, request) {
            return decision;
        }
        if let Some(decision) = self.check_blocklists(&rules, request) {
            return decision;
        }
        if let Some(decision) = self.check_fail2bans(&rules, request) {
            return decision;
        }

        let mut rate_limit = None;
        if let Some(decision) = self.check_throttles(&rules, request, &mut rate_limit) {
            return decision;
        }

        self.diagnostics.increment(Category::Passed, None);
        trace!(path = %request.path(), "Request passed");
        Decision::pass(rate_limit)
    }

    fn store_key(&self, kind: KeyKind, rule: &str, key: &str) -> String {
        StoreKey::new(&self.options.key_prefix, kind, rule, key).to_store_key()
    }

    fn run_tracks(&self, rules: &RuleSet, request: &Request) {
        for rule in rules.tracks() {
            if !rule.filter.matches(request) {
                continue;
            }
            let Some(key) = rule.key.extract(request) else {
                continue;
            };

            let counter_key = self.store_key(KeyKind::Track, &rule.name, &key);
            let count = self.store.increment(&counter_key, rule.period);
            self.diagnostics
                .increment(Category::TrackHit, Some(&rule.name));
            trace!(rule = %rule.name, key = %counter_key, count = count, "Track rule hit");

            self.sink.notify(&FirewallEvent::TrackHit {
                rule: rule.name.clone(),
                key,
                count,
                period: rule.period,
                at: Utc::now(),
            });
        }
    }

    fn check_safelists(&self, rules: &RuleSet, request: &Request) -> Option<Decision> {
        let rule = rules
            .safelists()
            .iter()
            .find(|rule| rule.matcher.matches(request))?;

        self.diagnostics
            .increment(Category::Safelisted, Some(&rule.name));
        debug!(rule = %rule.name, "Request safelisted");

        self.sink.notify(&FirewallEvent::SafelistMatched {
            rule: rule.name.clone(),
            source: rule.matcher.describe(),
            at: Utc::now(),
        });
        Some(Decision::safelisted(&rule.name))
    }

    fn check_blocklists(&self, rules: &RuleSet, request: &Request) -> Option<Decision> {
        for rule in rules.blocklists() {
            let result = rule.matcher.evaluate(request);
            if !result.is_match {
                continue;
            }

            self.diagnostics
                .increment(Category::Blocklisted, Some(&rule.name));
            debug!(rule = %rule.name, source = %result.source, "Request blocklisted");

            self.sink.notify(&FirewallEvent::BlocklistMatched {
                rule: rule.name.clone(),
                source: result.source,
                metadata: result.metadata,
                at: Utc::now(),
            });
            return Some(Decision::blocked(&rule.name, BlockType::Blocklist));
        }
        None
    }

    fn check_fail2bans(&self, rules: &RuleSet, request: &Request) -> Option<Decision> {
        for rule in rules.fail2bans() {
            let Some(key) = rule.key.extract(request) else {
                continue;
            };

            let ban_key = self.store_key(KeyKind::Fail2BanBan, &rule.name, &key);
            if self.store.has(&ban_key) {
                self.diagnostics
                    .increment(Category::Fail2BanBlocked, Some(&rule.name));
                debug!(rule = %rule.name, key = %ban_key, "Request from banned key");
                return Some(Decision::blocked(&rule.name, BlockType::Fail2Ban));
            }

            if !rule.filter.matches(request) {
                continue;
            }

            let fail_key = self.store_key(KeyKind::Fail2BanFail, &rule.name, &key);
            let failures = self.store.increment(&fail_key, rule.period);
            self.diagnostics
                .increment(Category::Fail2BanFailHit, Some(&rule.name));
            trace!(rule = %rule.name, key = %fail_key, failures = failures, "Fail2ban failure counted");

            // The request that crosses the threshold is not blocked itself.
            if failures >= rule.threshold {
                self.store.set(&ban_key, "1", Some(rule.ban_seconds));
                self.diagnostics
                    .increment(Category::Fail2BanBanned, Some(&rule.name));
                debug!(
                    rule = %rule.name,
                    key = %ban_key,
                    failures = failures,
                    ban_seconds = rule.ban_seconds,
                    "Key banned"
                );

                self.sink.notify(&FirewallEvent::Fail2BanBanned {
                    rule: rule.name.clone(),
                    key,
                    count: failures,
                    threshold: rule.threshold,
                    period: rule.period,
                    ban_seconds: rule.ban_seconds,
                    at: Utc::now(),
                });
            }
        }
        None
    }

    fn check_throttles(
        &self,
        rules: &RuleSet,
        request: &Request,
        rate_limit: &mut Option<RateLimitInfo>,
    ) -> Option<Decision> {
        for rule in rules.throttles() {
            let Some(key) = rule.key.extract(request) else {
                continue;
            };

            let counter_key = self.store_key(KeyKind::Throttle, &rule.name, &key);
            let count = self.store.increment(&counter_key, rule.period);
            let retry_after = self.store.ttl_remaining(&counter_key);
            let remaining = rule.limit.saturating_sub(count);

            trace!(
                rule = %rule.name,
                key = %counter_key,
                count = count,
                limit = rule.limit,
                "Throttle counted"
            );

            if count > rule.limit {
                self.diagnostics
                    .increment(Category::ThrottleExceeded, Some(&rule.name));
                debug!(
                    rule = %rule.name,
                    key = %counter_key,
                    count = count,
                    limit = rule.limit,
                    retry_after = retry_after,
                    "Throttle exceeded"
                );

                self.sink.notify(&FirewallEvent::ThrottleExceeded {
                    rule: rule.name.clone(),
                    key,
                    count,
                    limit: rule.limit,
                    period: rule.period,
                    retry_after,
                    at: Utc::now(),
                });

                let info = self.options.rate_limit_headers.then(|| RateLimitInfo {
                    limit: rule.limit,
                    remaining,
                    reset: retry_after.max(1),
                });
                return Some(Decision::throttled(&rule.name, retry_after, info));
            }

            if self.options.rate_limit_headers && rate_limit.is_none() {
                *rate_limit = Some(RateLimitInfo {
                    limit: rule.limit,
                    remaining,
                    reset: retry_after.max(1),
                });
            }
        }
        None
    }

    /// Whether `key` is currently banned by the named fail2ban rule.
    pub fn is_banned(&self, rule: &str, key: &str) -> bool {
        self.store
            .has(&self.store_key(KeyKind::Fail2BanBan, rule, key))
    }

    /// Lift a ban early.
    pub fn unban(&self, rule: &str, key: &str) {
        debug!(rule = %rule, key = %key, "Lifting ban");
        self.store
            .delete(&self.store_key(KeyKind::Fail2BanBan, rule, key));
    }

    /// Clear the failure counter of a fail2ban rule for `key`.
    pub fn reset_fail2ban(&self, rule: &str, key: &str) {
        self.store
            .delete(&self.store_key(KeyKind::Fail2BanFail, rule, key));
    }

    /// Clear the throttle counter of a rule for `key`.
    pub fn reset_throttle(&self, rule: &str, key: &str) {
        self.store
            .delete(&self.store_key(KeyKind::Throttle, rule, key));
    }
}
