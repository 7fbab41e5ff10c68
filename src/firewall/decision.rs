//! Firewall decisions and the headers they carry.

use std::fmt;

use serde::Serialize;

/// Header naming the block type (`blocklist`, `fail2ban` or `throttle`).
pub const HEADER_BLOCK_MARKER: &str = "X-Rampart";
/// Header naming the rule that terminated evaluation.
pub const HEADER_MATCHED_RULE: &str = "X-Rampart-Matched";
/// Header naming the safelist rule on bypass.
pub const HEADER_SAFELIST: &str = "X-Rampart-Safelist";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";
pub const HEADER_RATELIMIT_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_RATELIMIT_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RATELIMIT_RESET: &str = "X-RateLimit-Reset";

/// What the caller should do with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Continue to the application.
    Pass,
    /// Continue to the application; later checks were bypassed.
    Safelisted,
    /// Reject the request.
    Blocked,
    /// Reject the request until the window resets.
    Throttled,
}

/// Which stage produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Blocklist,
    Fail2Ban,
    Throttle,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Blocklist => "blocklist",
            BlockType::Fail2Ban => "fail2ban",
            BlockType::Throttle => "throttle",
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate limit quota snapshot exposed through `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    /// Seconds until the window resets, at least 1.
    pub reset: u64,
}

impl RateLimitInfo {
    fn push_headers(&self, headers: &mut Vec<(String, String)>) {
        headers.push((HEADER_RATELIMIT_LIMIT.to_string(), self.limit.to_string()));
        headers.push((
            HEADER_RATELIMIT_REMAINING.to_string(),
            self.remaining.to_string(),
        ));
        headers.push((HEADER_RATELIMIT_RESET.to_string(), self.reset.to_string()));
    }
}

/// The result of evaluating one request.
///
/// Headers keep insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    outcome: Outcome,
    rule: Option<String>,
    block_type: Option<BlockType>,
    retry_after_seconds: Option<u64>,
    headers: Vec<(String, String)>,
}

impl Decision {
    /// A pass, optionally carrying rate limit headers.
    pub fn pass(rate_limit: Option<RateLimitInfo>) -> Self {
        let mut headers = Vec::new();
        if let Some(info) = rate_limit {
            info.push_headers(&mut headers);
        }
        Self {
            outcome: Outcome::Pass,
            rule: None,
            block_type: None,
            retry_after_seconds: None,
            headers,
        }
    }

    pub fn safelisted(rule: &str) -> Self {
        Self {
            outcome: Outcome::Safelisted,
            rule: Some(rule.to_string()),
            block_type: None,
            retry_after_seconds: None,
            headers: vec![(HEADER_SAFELIST.to_string(), rule.to_string())],
        }
    }

    /// A block by a blocklist or an active fail2ban ban.
    pub fn blocked(rule: &str, block_type: BlockType) -> Self {
        Self {
            outcome: Outcome::Blocked,
            rule: Some(rule.to_string()),
            block_type: Some(block_type),
            retry_after_seconds: None,
            headers: vec![
                (HEADER_BLOCK_MARKER.to_string(), block_type.to_string()),
                (HEADER_MATCHED_RULE.to_string(), rule.to_string()),
            ],
        }
    }

    /// A throttle; `retry_after` is raised to at least one second.
    pub fn throttled(rule: &str, retry_after: u64, rate_limit: Option<RateLimitInfo>) -> Self {
        let retry_after = retry_after.max(1);
        let mut headers = vec![
            (
                HEADER_BLOCK_MARKER.to_string(),
                BlockType::Throttle.to_string(),
            ),
            (HEADER_MATCHED_RULE.to_string(), rule.to_string()),
            (HEADER_RETRY_AFTER.to_string(), retry_after.to_string()),
        ];
        if let Some(info) = rate_limit {
            info.push_headers(&mut headers);
        }
        Self {
            outcome: Outcome::Throttled,
            rule: Some(rule.to_string()),
            block_type: Some(BlockType::Throttle),
            retry_after_seconds: Some(retry_after),
            headers,
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn rule(&self) -> Option<&str> {
        self.rule.as_deref()
    }

    pub fn block_type(&self) -> Option<BlockType> {
        self.block_type
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.retry_after_seconds
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the request may proceed to the application.
    pub fn is_allowed(&self) -> bool {
        matches!(self.outcome, Outcome::Pass | Outcome::Safelisted)
    }
}
