//! Rule definitions and the rule set builder.

use std::sync::Arc;

use super::matcher::{KeyExtractor, RequestMatcher};
use crate::error::{RampartError, Result};

/// Requests matching the matcher bypass every later stage.
#[derive(Clone)]
pub struct SafelistRule {
    pub name: String,
    pub matcher: Arc<dyn RequestMatcher>,
}

/// Requests matching the matcher are blocked.
#[derive(Clone)]
pub struct BlocklistRule {
    pub name: String,
    pub matcher: Arc<dyn RequestMatcher>,
}

/// At most `limit` requests per key in each fixed window of `period` seconds.
#[derive(Clone)]
pub struct ThrottleRule {
    pub name: String,
    pub limit: u64,
    pub period: u64,
    pub key: Arc<dyn KeyExtractor>,
}

/// Ban a key for `ban_seconds` once `threshold` filter matches accumulate
/// within one window of `period` seconds.
#[derive(Clone)]
pub struct Fail2BanRule {
    pub name: String,
    pub threshold: u64,
    pub period: u64,
    pub ban_seconds: u64,
    pub filter: Arc<dyn RequestMatcher>,
    pub key: Arc<dyn KeyExtractor>,
}

/// Count filter matches per key without affecting the decision.
#[derive(Clone)]
pub struct TrackRule {
    pub name: String,
    pub period: u64,
    pub filter: Arc<dyn RequestMatcher>,
    pub key: Arc<dyn KeyExtractor>,
}

trait Named {
    fn name(&self) -> &str;
}

macro_rules! impl_named {
    ($($rule:ty),*) => {
        $(impl Named for $rule {
            fn name(&self) -> &str {
                &self.name
            }
        })*
    };
}

impl_named!(SafelistRule, BlocklistRule, ThrottleRule, Fail2BanRule, TrackRule);

/// Insert a rule, replacing one with the same name in place.
fn upsert<R: Named>(rules: &mut Vec<R>, rule: R) {
    match rules.iter().position(|r| r.name() == rule.name()) {
        Some(idx) => rules[idx] = rule,
        None => rules.push(rule),
    }
}

/// An immutable, validated snapshot of all rules, in registration order.
#[derive(Clone, Default)]
pub struct RuleSet {
    safelists: Vec<SafelistRule>,
    blocklists: Vec<BlocklistRule>,
    throttles: Vec<ThrottleRule>,
    fail2bans: Vec<Fail2BanRule>,
    tracks: Vec<TrackRule>,
}

impl RuleSet {
    /// Start building a rule set.
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    /// A rule set that passes every request.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn safelists(&self) -> &[SafelistRule] {
        &self.safelists
    }

    pub fn blocklists(&self) -> &[BlocklistRule] {
        &self.blocklists
    }

    pub fn throttles(&self) -> &[ThrottleRule] {
        &self.throttles
    }

    pub fn fail2bans(&self) -> &[Fail2BanRule] {
        &self.fail2bans
    }

    pub fn tracks(&self) -> &[TrackRule] {
        &self.tracks
    }

    pub fn throttle(&self, name: &str) -> Option<&ThrottleRule> {
        self.throttles.iter().find(|r| r.name == name)
    }

    pub fn fail2ban(&self, name: &str) -> Option<&Fail2BanRule> {
        self.fail2bans.iter().find(|r| r.name == name)
    }

    /// Total number of rules across all kinds.
    pub fn len(&self) -> usize {
        self.safelists.len()
            + self.blocklists.len()
            + self.throttles.len()
            + self.fail2bans.len()
            + self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn names<R: Named>(rules: &[R]) -> Vec<&str> {
            rules.iter().map(Named::name).collect()
        }
        f.debug_struct("RuleSet")
            .field("safelists", &names(&self.safelists))
            .field("blocklists", &names(&self.blocklists))
            .field("throttles", &names(&self.throttles))
            .field("fail2bans", &names(&self.fail2bans))
            .field("tracks", &names(&self.tracks))
            .finish()
    }
}

/// Fluent builder for [`RuleSet`].
///
/// Registering a name that already exists within the same kind replaces the
/// earlier rule and keeps its position.
#[derive(Default)]
pub struct RuleSetBuilder {
    rules: RuleSet,
}

impl RuleSetBuilder {
    pub fn safelist(mut self, name: &str, matcher: impl RequestMatcher + 'static) -> Self {
        upsert(
            &mut self.rules.safelists,
            SafelistRule {
                name: name.to_string(),
                matcher: Arc::new(matcher),
            },
        );
        self
    }

    pub fn blocklist(mut self, name: &str, matcher: impl RequestMatcher + 'static) -> Self {
        upsert(
            &mut self.rules.blocklists,
            BlocklistRule {
                name: name.to_string(),
                matcher: Arc::new(matcher),
            },
        );
        self
    }

    pub fn throttle(
        mut self,
        name: &str,
        limit: u64,
        period: u64,
        key: impl KeyExtractor + 'static,
    ) -> Self {
        upsert(
            &mut self.rules.throttles,
            ThrottleRule {
                name: name.to_string(),
                limit,
                period,
                key: Arc::new(key),
            },
        );
        self
    }

    pub fn fail2ban(
        mut self,
        name: &str,
        threshold: u64,
        period: u64,
        ban_seconds: u64,
        filter: impl RequestMatcher + 'static,
        key: impl KeyExtractor + 'static,
    ) -> Self {
        upsert(
            &mut self.rules.fail2bans,
            Fail2BanRule {
                name: name.to_string(),
                threshold,
                period,
                ban_seconds,
                filter: Arc::new(filter),
                key: Arc::new(key),
            },
        );
        self
    }

    pub fn track(
        mut self,
        name: &str,
        period: u64,
        filter: impl RequestMatcher + 'static,
        key: impl KeyExtractor + 'static,
    ) -> Self {
        upsert(
            &mut self.rules.tracks,
            TrackRule {
                name: name.to_string(),
                period,
                filter: Arc::new(filter),
                key: Arc::new(key),
            },
        );
        self
    }

    /// Validate every rule and freeze the set.
    pub fn build(self) -> Result<RuleSet> {
        let rules = self.rules;

        let all_names = rules
            .safelists
            .iter()
            .map(Named::name)
            .chain(rules.blocklists.iter().map(Named::name))
            .chain(rules.throttles.iter().map(Named::name))
            .chain(rules.fail2bans.iter().map(Named::name))
            .chain(rules.tracks.iter().map(Named::name));
        for name in all_names {
            if name.trim().is_empty() {
                return Err(RampartError::invalid_rule(name, "name must not be empty"));
            }
        }

        for rule in &rules.throttles {
            require_positive(&rule.name, "period", rule.period)?;
        }
        for rule in &rules.fail2bans {
            require_positive(&rule.name, "period", rule.period)?;
            require_positive(&rule.name, "ban_seconds", rule.ban_seconds)?;
        }
        for rule in &rules.tracks {
            require_positive(&rule.name, "period", rule.period)?;
        }

        Ok(rules)
    }
}

fn require_positive(rule: &str, field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(RampartError::invalid_rule(
            rule,
            format!("{} must be greater than zero", field),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::matcher::{Always, ClientIp, PathPrefix};

    #[test]
    fn test_builder_keeps_registration_order() {
        let rules = RuleSet::builder()
            .safelist("health", PathPrefix("/health".into()))
            .safelist("internal", PathPrefix("/internal".into()))
            .throttle("per-ip", 10, 60, ClientIp)
            .build()
            .unwrap();

        let names: Vec<_> = rules.safelists().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["health", "internal"]);
        assert_eq!(rules.len(), 3);
    }

    #[test]
    fn test_duplicate_name_overwrites_in_place() {
        let rules = RuleSet::builder()
            .throttle("a", 1, 10, ClientIp)
            .throttle("b", 2, 10, ClientIp)
            .throttle("a", 5, 30, ClientIp)
            .build()
            .unwrap();

        assert_eq!(rules.throttles().len(), 2);
        assert_eq!(rules.throttles()[0].name, "a");
        assert_eq!(rules.throttles()[0].limit, 5);
        assert_eq!(rules.throttles()[0].period, 30);
        assert_eq!(rules.throttle("b").map(|r| r.limit), Some(2));
    }

    #[test]
    fn test_same_name_in_different_kinds_coexists() {
        let rules = RuleSet::builder()
            .blocklist("login", Always)
            .throttle("login", 1, 10, ClientIp)
            .build()
            .unwrap();

        assert_eq!(rules.blocklists().len(), 1);
        assert_eq!(rules.throttles().len(), 1);
    }

    #[test]
    fn test_zero_period_rejected() {
        let err = RuleSet::builder()
            .throttle("broken", 10, 0, ClientIp)
            .build()
            .unwrap_err();
        assert!(matches!(err, RampartError::InvalidRule { ref rule, .. } if rule == "broken"));

        assert!(RuleSet::builder()
            .track("t", 0, Always, ClientIp)
            .build()
            .is_err());
    }

    #[test]
    fn test_zero_ban_seconds_rejected() {
        let result = RuleSet::builder()
            .fail2ban("login", 3, 60, 0, Always, ClientIp)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(RuleSet::builder().blocklist("  ", Always).build().is_err());
    }

    #[test]
    fn test_debug_lists_rule_names() {
        let rules = RuleSet::builder()
            .blocklist("bad-bots", Always)
            .build()
            .unwrap();
        let debug = format!("{:?}", rules);
        assert!(debug.contains("bad-bots"));
    }
}
