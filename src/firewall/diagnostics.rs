//! In-memory hit counters for observability.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;

/// Distinct rule names tracked per category.
pub const MAX_RULES_PER_CATEGORY: usize = 100;

/// Pipeline outcomes counted by [`DiagnosticsCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    TrackHit,
    Safelisted,
    Blocklisted,
    Fail2BanBlocked,
    Fail2BanFailHit,
    Fail2BanBanned,
    ThrottleExceeded,
    Passed,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::TrackHit => "track_hit",
            Category::Safelisted => "safelisted",
            Category::Blocklisted => "blocklisted",
            Category::Fail2BanBlocked => "fail2ban_blocked",
            Category::Fail2BanFailHit => "fail2ban_fail_hit",
            Category::Fail2BanBanned => "fail2ban_banned",
            Category::ThrottleExceeded => "throttle_exceeded",
            Category::Passed => "passed",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub total: u64,
    pub by_rule: HashMap<String, u64>,
}

/// Per-category, per-rule hit counters.
///
/// `total` always increments. Once a category tracks
/// [`MAX_RULES_PER_CATEGORY`] rule names, hits for new names only count toward
/// the total.
#[derive(Debug, Default)]
pub struct DiagnosticsCounters {
    categories: Mutex<HashMap<Category, CategoryCounts>>,
}

impl DiagnosticsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit, optionally attributed to a rule.
    pub fn increment(&self, category: Category, rule: Option<&str>) {
        let mut categories = self.categories.lock();
        let counts = categories.entry(category).or_default();
        counts.total += 1;

        if let Some(rule) = rule {
            if let Some(hits) = counts.by_rule.get_mut(rule) {
                *hits += 1;
            } else if counts.by_rule.len() < MAX_RULES_PER_CATEGORY {
                counts.by_rule.insert(rule.to_string(), 1);
            }
        }
    }

    /// Counts for one category, if it has been hit.
    pub fn get(&self, category: Category) -> Option<CategoryCounts> {
        self.categories.lock().get(&category).cloned()
    }

    /// Total hits recorded for a category.
    pub fn total(&self, category: Category) -> u64 {
        self.categories
            .lock()
            .get(&category)
            .map(|c| c.total)
            .unwrap_or(0)
    }

    /// Hits recorded for one rule within a category.
    pub fn rule_hits(&self, category: Category, rule: &str) -> u64 {
        self.categories
            .lock()
            .get(&category)
            .and_then(|c| c.by_rule.get(rule).copied())
            .unwrap_or(0)
    }

    /// Copy of every category, keyed by its snake_case name.
    pub fn snapshot(&self) -> HashMap<&'static str, CategoryCounts> {
        self.categories
            .lock()
            .iter()
            .map(|(category, counts)| (category.as_str(), counts.clone()))
            .collect()
    }

    /// Forget every count.
    pub fn reset(&self) {
        self.categories.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_counts_total_and_rule() {
        let diag = DiagnosticsCounters::new();

        diag.increment(Category::Blocklisted, Some("bots"));
        diag.increment(Category::Blocklisted, Some("bots"));
        diag.increment(Category::Blocklisted, Some("scanners"));
        diag.increment(Category::Passed, None);

        assert_eq!(diag.total(Category::Blocklisted), 3);
        assert_eq!(diag.rule_hits(Category::Blocklisted, "bots"), 2);
        assert_eq!(diag.rule_hits(Category::Blocklisted, "scanners"), 1);
        assert_eq!(diag.total(Category::Passed), 1);
        assert!(diag.get(Category::Passed).unwrap().by_rule.is_empty());
        assert_eq!(diag.total(Category::Safelisted), 0);
    }

    #[test]
    fn test_rule_cap_bounds_memory_but_not_total() {
        let diag = DiagnosticsCounters::new();

        for i in 0..150 {
            diag.increment(Category::TrackHit, Some(&format!("rule-{}", i)));
        }

        let counts = diag.get(Category::TrackHit).unwrap();
        assert_eq!(counts.total, 150);
        assert!(counts.by_rule.len() <= MAX_RULES_PER_CATEGORY);

        // Already tracked names keep counting after the cap is reached.
        diag.increment(Category::TrackHit, Some("rule-0"));
        assert_eq!(diag.rule_hits(Category::TrackHit, "rule-0"), 2);
        assert_eq!(diag.rule_hits(Category::TrackHit, "rule-149"), 0);
        assert_eq!(diag.total(Category::TrackHit), 151);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let diag = DiagnosticsCounters::new();
        diag.increment(Category::Fail2BanBanned, Some("login"));

        let snapshot = diag.snapshot();
        assert_eq!(snapshot["fail2ban_banned"].total, 1);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["fail2ban_banned"]["by_rule"]["login"], 1);

        diag.reset();
        assert!(diag.snapshot().is_empty());
    }
}
