//! Declarative rule configuration.
//!
//! Rules can be written in YAML and compiled into a [`RuleSet`]:
//!
//! ```yaml
//! safelist:
//!   - name: healthcheck
//!     match:
//!       path_prefix: /health
//! blocklist:
//!   - name: scanners
//!     match:
//!       any:
//!         - path_prefix: /wp-admin
//!         - header: { name: user-agent, value: sqlmap }
//! throttle:
//!   - name: per-ip
//!     limit: 100
//!     period: 60
//!     key: ip
//! fail2ban:
//!   - name: login
//!     threshold: 5
//!     period: 300
//!     ban_seconds: 3600
//!     filter:
//!       header: { name: x-login-failed, value: "1" }
//!     key: ip
//! track:
//!   - name: api-keys
//!     period: 60
//!     key: "header:x-api-key"
//! ```

use std::net::IpAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::matcher::{
    AllOf, Always, AnyOf, ClientIp, HeaderEquals, HeaderPresent, HeaderValue, IpList,
    KeyExtractor, MethodIs, Not, PathEquals, PathPrefix, RequestMatcher, RequestMethod,
    RequestPath,
};
use super::rules::RuleSet;
use crate::error::{RampartError, Result};

/// A complete rules file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub safelist: Vec<MatchRuleConfig>,
    #[serde(default)]
    pub blocklist: Vec<MatchRuleConfig>,
    #[serde(default)]
    pub throttle: Vec<ThrottleConfig>,
    #[serde(default)]
    pub fail2ban: Vec<Fail2BanConfig>,
    #[serde(default)]
    pub track: Vec<TrackConfig>,
}

/// A safelist or blocklist entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRuleConfig {
    pub name: String,
    #[serde(rename = "match")]
    pub matcher: MatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub name: String,
    pub limit: u64,
    /// Window length in seconds
    pub period: u64,
    pub key: KeySource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fail2BanConfig {
    pub name: String,
    pub threshold: u64,
    /// Window length in seconds
    pub period: u64,
    pub ban_seconds: u64,
    pub filter: MatchConfig,
    pub key: KeySource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    pub name: String,
    pub period: u64,
    /// Defaults to matching every request
    #[serde(default)]
    pub filter: MatchConfig,
    pub key: KeySource,
}

/// Request conditions. Every condition present must hold; an empty
/// block matches every request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<HeaderMatchConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header_present: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<Vec<IpAddr>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub any: Option<Vec<MatchConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<MatchConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<MatchConfig>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatchConfig {
    pub name: String,
    pub value: String,
}

impl MatchConfig {
    fn build(&self) -> Box<dyn RequestMatcher> {
        let mut conditions: Vec<Box<dyn RequestMatcher>> = Vec::new();

        if let Some(prefix) = &self.path_prefix {
            conditions.push(Box::new(PathPrefix(prefix.clone())));
        }
        if let Some(path) = &self.path {
            conditions.push(Box::new(PathEquals(path.clone())));
        }
        if let Some(method) = &self.method {
            conditions.push(Box::new(MethodIs(method.clone())));
        }
        if let Some(header) = &self.header {
            conditions.push(Box::new(HeaderEquals::new(&header.name, &header.value)));
        }
        if let Some(name) = &self.header_present {
            conditions.push(Box::new(HeaderPresent(name.clone())));
        }
        if let Some(addrs) = &self.ip {
            conditions.push(Box::new(IpList::new(addrs.iter().copied())));
        }
        if let Some(inner) = &self.any {
            conditions.push(Box::new(AnyOf(inner.iter().map(Self::build).collect())));
        }
        if let Some(inner) = &self.all {
            conditions.push(Box::new(AllOf(inner.iter().map(Self::build).collect())));
        }
        if let Some(inner) = &self.not {
            conditions.push(Box::new(Not(inner.build())));
        }

        match conditions.len() {
            0 => Box::new(Always),
            1 => conditions.remove(0),
            _ => Box::new(AllOf(conditions)),
        }
    }
}

/// Where a rule takes its counter key from.
///
/// Written as `ip`, `path`, `method` or `header:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum KeySource {
    Ip,
    Path,
    Method,
    Header(String),
}

impl TryFrom<String> for KeySource {
    type Error = String;

    fn try_from(raw: String) -> std::result::Result<Self, Self::Error> {
        match raw.trim() {
            "ip" => Ok(KeySource::Ip),
            "path" => Ok(KeySource::Path),
            "method" => Ok(KeySource::Method),
            other => match other.strip_prefix("header:") {
                Some(name) if !name.trim().is_empty() => {
                    Ok(KeySource::Header(name.trim().to_string()))
                }
                _ => Err(format!(
                    "unknown key source '{}' (expected ip, path, method or header:<name>)",
                    other
                )),
            },
        }
    }
}

impl From<KeySource> for String {
    fn from(source: KeySource) -> Self {
        match source {
            KeySource::Ip => "ip".to_string(),
            KeySource::Path => "path".to_string(),
            KeySource::Method => "method".to_string(),
            KeySource::Header(name) => format!("header:{}", name),
        }
    }
}

impl KeySource {
    fn build(&self) -> Box<dyn KeyExtractor> {
        match self {
            KeySource::Ip => Box::new(ClientIp),
            KeySource::Path => Box::new(RequestPath),
            KeySource::Method => Box::new(RequestMethod),
            KeySource::Header(name) => Box::new(HeaderValue(name.clone())),
        }
    }
}

impl RulesConfig {
    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading firewall rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RampartError::Config(format!("Failed to parse rules: {}", e)))
    }

    /// Compile into a validated rule set.
    pub fn build_rule_set(&self) -> Result<RuleSet> {
        let mut builder = RuleSet::builder();

        for rule in &self.safelist {
            builder = builder.safelist(&rule.name, rule.matcher.build());
        }
        for rule in &self.blocklist {
            builder = builder.blocklist(&rule.name, rule.matcher.build());
        }
        for rule in &self.fail2ban {
            builder = builder.fail2ban(
                &rule.name,
                rule.threshold,
                rule.period,
                rule.ban_seconds,
                rule.filter.build(),
                rule.key.build(),
            );
        }
        for rule in &self.throttle {
            builder = builder.throttle(
                &rule.name,
                rule.limit,
                rule.period,
                rule.key.build(),
            );
        }
        for rule in &self.track {
            builder = builder.track(
                &rule.name,
                rule.period,
                rule.filter.build(),
                rule.key.build(),
            );
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firewall::request::Request;

    const FULL: &str = r#"
safelist:
  - name: healthcheck
    match:
      path_prefix: /health
blocklist:
  - name: scanners
    match:
      any:
        - path_prefix: /wp-admin
        - header: { name: user-agent, value: sqlmap }
  - name: bad-ips
    match:
      ip: ["203.0.113.7", "2001:db8::7"]
throttle:
  - name: per-ip
    limit: 100
    period: 60
    key: ip
fail2ban:
  - name: login
    threshold: 5
    period: 300
    ban_seconds: 3600
    filter:
      all:
        - method: post
        - path: /login
        - header: { name: x-login-failed, value: "1" }
    key: ip
track:
  - name: api-keys
    period: 60
    key: "header:X-Api-Key"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = RulesConfig::from_yaml(FULL).unwrap();

        assert_eq!(config.safelist.len(), 1);
        assert_eq!(config.blocklist.len(), 2);
        assert_eq!(config.throttle[0].limit, 100);
        assert_eq!(config.fail2ban[0].ban_seconds, 3600);
        assert_eq!(config.track[0].key, KeySource::Header("X-Api-Key".to_string()));
        assert_eq!(config.track[0].filter, MatchConfig::default());
        assert_eq!(
            config.safelist[0].matcher.path_prefix.as_deref(),
            Some("/health")
        );
    }

    #[test]
    fn test_compiled_matchers_behave() {
        let rules = RulesConfig::from_yaml(FULL).unwrap().build_rule_set().unwrap();
        assert_eq!(rules.len(), 6);

        let scanners = &rules.blocklists()[0].matcher;
        assert!(scanners.matches(&Request::get("/wp-admin/setup.php")));
        assert!(scanners.matches(&Request::get("/").with_header("User-Agent", "sqlmap")));
        assert!(!scanners.matches(&Request::get("/")));

        let bad_ips = &rules.blocklists()[1].matcher;
        assert!(bad_ips.matches(&Request::get("/").with_client_ip("2001:db8::7".parse().unwrap())));

        let login = &rules.fail2bans()[0].filter;
        let failed_login = Request::new("POST", "/login").with_header("X-Login-Failed", "1");
        assert!(login.matches(&failed_login));
        assert!(!login.matches(&Request::new("GET", "/login").with_header("X-Login-Failed", "1")));

        let api_keys = &rules.tracks()[0].key;
        assert_eq!(
            api_keys.extract(&Request::get("/").with_header("x-api-key", "k-1")),
            Some("k-1".to_string())
        );
    }

    #[test]
    fn test_not_and_empty_matchers() {
        let yaml = r#"
blocklist:
  - name: non-get
    match:
      not:
        method: GET
  - name: everything
    match: {}
"#;
        let rules = RulesConfig::from_yaml(yaml).unwrap().build_rule_set().unwrap();
        assert!(rules.blocklists()[0].matcher.matches(&Request::new("PUT", "/")));
        assert!(!rules.blocklists()[0].matcher.matches(&Request::get("/")));
        assert!(rules.blocklists()[1].matcher.matches(&Request::get("/")));
    }

    #[test]
    fn test_sibling_conditions_combine() {
        let yaml = r#"
blocklist:
  - name: admin-writes
    match:
      path_prefix: /admin
      method: POST
"#;
        let rules = RulesConfig::from_yaml(yaml).unwrap().build_rule_set().unwrap();
        let matcher = &rules.blocklists()[0].matcher;
        assert!(matcher.matches(&Request::new("POST", "/admin/users")));
        assert!(!matcher.matches(&Request::new("GET", "/admin/users")));
        assert!(!matcher.matches(&Request::new("POST", "/login")));
    }

    #[test]
    fn test_unknown_condition_rejected() {
        let yaml = r#"
blocklist:
  - name: typo
    match:
      path_prefx: /admin
"#;
        assert!(RulesConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_unknown_key_source_rejected() {
        let yaml = r#"
throttle:
  - name: t
    limit: 1
    period: 1
    key: cookie
"#;
        let err = RulesConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RampartError::Config(_)));
        assert!(err.to_string().contains("unknown key source"));
    }

    #[test]
    fn test_invalid_period_rejected_at_build() {
        let yaml = r#"
throttle:
  - name: zero
    limit: 1
    period: 0
    key: ip
"#;
        let config = RulesConfig::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.build_rule_set(),
            Err(RampartError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_empty_config() {
        let config = RulesConfig::from_yaml("{}").unwrap();
        assert!(config.build_rule_set().unwrap().is_empty());
    }

    #[test]
    fn test_key_source_round_trip_through_string() {
        for raw in ["ip", "path", "method", "header:x-user"] {
            let source = KeySource::try_from(raw.to_string()).unwrap();
            assert_eq!(String::from(source), raw);
        }
        assert!(KeySource::try_from("header:".to_string()).is_err());
    }
}
