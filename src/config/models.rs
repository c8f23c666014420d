//! Configuration data structures for Kiln.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! Every section has defaults, so an empty file is a valid configuration.
//! Durations are written as humantime strings ("100ms", "30s").
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::filter::BUILTIN_FILTERS;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Top-level configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct KilnConfig {
    pub registry: RegistryConfig,
    pub filters: FiltersConfig,
    pub logging: LoggingConfig,
}

/// Instance registry settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// How often `wait_for_active` re-checks for an active instance
    pub active_poll_interval: String,
    /// Upper bound on `wait_for_active`
    pub active_wait_timeout: String,
    /// Panic when administrative operations run off the administrative thread
    pub strict_admin_thread: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            active_poll_interval: "100ms".to_string(),
            active_wait_timeout: "30s".to_string(),
            strict_admin_thread: true,
        }
    }
}

impl RegistryConfig {
    /// Parsed poll interval, falling back to 100ms when unparseable or zero.
    pub fn active_poll_interval(&self) -> Duration {
        humantime::parse_duration(&self.active_poll_interval)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Parsed wait timeout, falling back to 30s when unparseable.
    pub fn active_wait_timeout(&self) -> Duration {
        humantime::parse_duration(&self.active_wait_timeout).unwrap_or(DEFAULT_WAIT_TIMEOUT)
    }
}

/// Filter catalog settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FiltersConfig {
    /// Built-in codecs registered in the global catalog at startup
    pub builtin: Vec<String>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            builtin: BUILTIN_FILTERS.iter().map(|name| name.to_string()).collect(),
        }
    }
}

/// Logging settings used by the binary
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. "info" or "kiln=debug"
    pub level: String,
    pub json: bool,
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            include_spans: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KilnConfig::default();
        assert_eq!(config.registry.active_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.registry.active_wait_timeout(), Duration::from_secs(30));
        assert!(config.registry.strict_admin_thread);
        assert_eq!(config.filters.builtin.len(), 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_bad_durations_fall_back() {
        let registry = RegistryConfig {
            active_poll_interval: "0s".to_string(),
            active_wait_timeout: "soon".to_string(),
            strict_admin_thread: false,
        };
        assert_eq!(registry.active_poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(registry.active_wait_timeout(), DEFAULT_WAIT_TIMEOUT);
    }
}
