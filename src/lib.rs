//! Rampart - In-Process Request Firewall
//!
//! This crate decides, per incoming request, whether to pass it, bypass
//! further checks, block it or throttle it. Decisions are driven by an ordered
//! set of safelist, blocklist, fail2ban, throttle and track rules, with all
//! counters and bans kept in a pluggable atomic counter store.

pub mod clock;
pub mod config;
pub mod error;
pub mod firewall;
pub mod store;

pub use firewall::{Decision, Firewall, Outcome, Request, RuleSet};
pub use store::{CounterStore, InMemoryStore};
