//! Error types for Rampart.

use thiserror::Error;

/// Main error type for Rampart operations.
#[derive(Error, Debug)]
pub enum RampartError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rule failed validation while building a rule set
    #[error("Invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RampartError {
    pub(crate) fn invalid_rule(rule: &str, reason: impl Into<String>) -> Self {
        RampartError::InvalidRule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for Rampart operations.
pub type Result<T> = std::result::Result<T, RampartError>;
