//! Cache key normalization and store key layout.
//!
//! Rule names and extracted keys can be attacker controlled (header values,
//! paths), so they are reduced to a bounded, safe alphabet before being used
//! in store keys. The normalization is stable across processes and stores.

use std::fmt;

use sha1::{Digest, Sha1};

/// Normalized keys longer than this are truncated and suffixed with a hash.
pub const MAX_KEY_LENGTH: usize = 120;
/// Length kept from the normalized key before the hash suffix.
const TRUNCATED_LENGTH: usize = 107;
/// Hex characters of the SHA-1 digest appended to truncated keys.
const HASH_SUFFIX_LENGTH: usize = 12;

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')
}

/// Map an arbitrary string onto `[A-Za-z0-9._:-]`, at most 120 characters.
///
/// Whitespace is trimmed, an empty result becomes `"empty"`, runs of
/// disallowed characters collapse into a single `_`, and long results are
/// cut to 107 characters plus `-` and the first 12 hex digits of the SHA-1
/// of the original input.
pub fn normalize_key(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "empty".to_string();
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut prev_underscore = false;
    for c in trimmed.chars() {
        let c = if is_allowed(c) { c } else { '_' };
        if c == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        out.push(c);
    }

    // Every character left is ASCII, so byte length equals character count.
    if out.len() > MAX_KEY_LENGTH {
        let digest = Sha1::digest(raw.as_bytes());
        let hex = format!("{:x}", digest);
        out.truncate(TRUNCATED_LENGTH);
        out.push('-');
        out.push_str(&hex[..HASH_SUFFIX_LENGTH]);
    }

    out
}

/// Namespaces of keys written by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Throttle,
    Track,
    Fail2BanFail,
    Fail2BanBan,
}

impl KeyKind {
    fn segment(&self) -> &'static str {
        match self {
            KeyKind::Throttle => "throttle",
            KeyKind::Track => "track",
            KeyKind::Fail2BanFail => "fail2ban:fail",
            KeyKind::Fail2BanBan => "fail2ban:ban",
        }
    }
}

/// A fully qualified store key: `prefix:kind:rule:key`.
///
/// The rule name and key are normalized on construction; the prefix is taken
/// as configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    prefix: String,
    kind: KeyKind,
    rule: String,
    key: String,
}

impl StoreKey {
    pub fn new(prefix: &str, kind: KeyKind, rule: &str, key: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            kind,
            rule: normalize_key(rule),
            key: normalize_key(key),
        }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// Render the key as stored.
    pub fn to_store_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.prefix,
            self.kind.segment(),
            self.rule,
            self.key
        )
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_store_key())
    }
}
