//! Configuration management for Rampart.

use serde::{Deserialize, Serialize};

use crate::error::{RampartError, Result};

/// Prefix of environment variables overriding configuration values, e.g.
/// `RAMPART__FIREWALL__KEY_PREFIX=edge`.
pub const ENV_PREFIX: &str = "RAMPART";

/// Main configuration for Rampart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RampartConfig {
    /// Firewall evaluation options
    #[serde(default)]
    pub firewall: FirewallOptions,

    /// Path to the rules file
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Options applied by the firewall to every decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallOptions {
    /// Namespace prepended to every store key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Attach `X-RateLimit-*` headers to pass and throttle decisions
    #[serde(default)]
    pub rate_limit_headers: bool,
}

impl Default for FirewallOptions {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            rate_limit_headers: false,
        }
    }
}

fn default_key_prefix() -> String {
    "rampart".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How often expired in-memory entries are purged, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

impl RampartConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RampartConfig = serde_yaml::from_str(&contents)
            .map_err(|e| RampartError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Layer defaults, an optional YAML file and `RAMPART__*` environment
    /// variables, in that order of precedence.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::new(path, config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<RampartConfig>())
            .map_err(|e| RampartError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_temp(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rampart-{}-{}.yaml", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = RampartConfig::default();
        assert_eq!(config.firewall.key_prefix, "rampart");
        assert!(!config.firewall.rate_limit_headers);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.store.sweep_interval_secs, 60);
        assert!(config.rules_path.is_none());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let path = write_temp(
            "partial",
            "firewall:\n  rate_limit_headers: true\nrules_path: /etc/rampart/rules.yaml\n",
        );
        let config = RampartConfig::from_file(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(config.firewall.rate_limit_headers);
        assert_eq!(config.firewall.key_prefix, "rampart");
        assert_eq!(config.rules_path.as_deref(), Some("/etc/rampart/rules.yaml"));
    }

    #[test]
    fn test_from_file_rejects_bad_yaml() {
        let path = write_temp("broken", "firewall: [not, a, map]\n");
        let result = RampartConfig::from_file(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(RampartError::Config(_))));
    }

    #[test]
    fn test_load_layers_file_and_environment() {
        let path = write_temp(
            "layered",
            "firewall:\n  key_prefix: edge\nlogging:\n  json: true\n",
        );
        std::env::set_var("RAMPART__STORE__SWEEP_INTERVAL_SECS", "5");
        let config = RampartConfig::load(Some(path.to_str().unwrap())).unwrap();
        std::env::remove_var("RAMPART__STORE__SWEEP_INTERVAL_SECS");
        std::fs::remove_file(&path).ok();

        assert_eq!(config.firewall.key_prefix, "edge");
        assert!(config.logging.json);
        assert_eq!(config.store.sweep_interval_secs, 5);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = RampartConfig::load(Some("/nonexistent/rampart.yaml"));
        assert!(matches!(result, Err(RampartError::Config(_))));
    }
}
