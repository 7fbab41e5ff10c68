//! Request firewall: rules, decisions and the evaluation pipeline.

mod decision;
mod diagnostics;
mod evaluator;
mod events;
mod keys;
mod loader;
pub mod matcher;
mod request;
mod rules;

pub use decision::{
    BlockType, Decision, Outcome, RateLimitInfo, HEADER_BLOCK_MARKER, HEADER_MATCHED_RULE,
    HEADER_RATELIMIT_LIMIT, HEADER_RATELIMIT_REMAINING, HEADER_RATELIMIT_RESET,
    HEADER_RETRY_AFTER, HEADER_SAFELIST,
};
pub use diagnostics::{Category, CategoryCounts, DiagnosticsCounters, MAX_RULES_PER_CATEGORY};
pub use evaluator::Firewall;
pub use events::{ChannelSink, EventSink, FirewallEvent, FnSink, NoopSink, TracingSink};
pub use keys::{normalize_key, KeyKind, StoreKey, MAX_KEY_LENGTH};
pub use loader::{
    Fail2BanConfig, HeaderMatchConfig, KeySource, MatchConfig, MatchRuleConfig, RulesConfig,
    ThrottleConfig, TrackConfig,
};
pub use matcher::{KeyExtractor, MatchResult, RequestMatcher};
pub use request::Request;
pub use rules::{
    BlocklistRule, Fail2BanRule, RuleSet, RuleSetBuilder, SafelistRule, ThrottleRule, TrackRule,
};
