//! Service settings loaded from `config.toml`.
//!
//! Every section and field has a default, so a missing or partial file still yields
//! a usable configuration.
//!
//! ```toml
//! [clock]
//! refresh_interval_secs = 300
//!
//! [queue]
//! capacity = 1000
//! concurrency = 4
//! max_attempts = 3
//! retry_base_ms = 1000
//!
//! [license]
//! premium = true
//! ```

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Entire `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Scheduler settings
    #[serde(default)]
    pub clock: ClockSettings,
    /// Task queue and worker settings
    #[serde(default)]
    pub queue: QueueSettings,
    /// Licensed entitlements
    #[serde(default)]
    pub license: LicenseSettings,
}

/// `[clock]` section
#[derive(Debug, Clone, Deserialize)]
pub struct ClockSettings {
    /// Seconds between two scheduler ticks
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl ClockSettings {
    /// Tick period as a [`Duration`].
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

/// `[queue]` section
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Bound of the task channel
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Tasks executed at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts per task before it is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First retry delay in milliseconds, doubled on each attempt
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

/// `[license]` section
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LicenseSettings {
    /// Unlocks recurring rules and the scheduled refresh
    #[serde(default)]
    pub premium: bool,
}

const fn default_refresh_interval_secs() -> u64 {
    300
}

const fn default_capacity() -> usize {
    1000
}

const fn default_concurrency() -> usize {
    4
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_retry_base_ms() -> u64 {
    1000
}

/// Loads settings from a TOML file
///
/// # Errors
/// Returns an error if the file cannot be read or the TOML is invalid.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file: {e}"),
    })?;

    parse_settings(&contents)
}

/// Parses settings from TOML text.
pub fn parse_settings(contents: &str) -> Result<Settings> {
    toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads `./config.toml`, or the defaults when the file does not exist.
pub fn load_default_settings() -> Result<Settings> {
    let path = Path::new("config.toml");
    if path.exists() {
        load_settings(path)
    } else {
        tracing::info!("config.toml not found, using default settings");
        Ok(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_parse_full_settings() {
        let toml_str = r"
            [clock]
            refresh_interval_secs = 60

            [queue]
            capacity = 10
            concurrency = 2
            max_attempts = 5
            retry_base_ms = 50

            [license]
            premium = true
        ";

        let settings = parse_settings(toml_str).unwrap();
        assert_eq!(settings.clock.refresh_interval(), Duration::from_secs(60));
        assert_eq!(settings.queue.capacity, 10);
        assert_eq!(settings.queue.concurrency, 2);
        assert_eq!(settings.queue.max_attempts, 5);
        assert_eq!(settings.queue.retry_base_ms, 50);
        assert!(settings.license.premium);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let settings = parse_settings("[queue]\nconcurrency = 8\n").unwrap();
        assert_eq!(settings.clock.refresh_interval_secs, 300);
        assert_eq!(settings.queue.concurrency, 8);
        assert_eq!(settings.queue.capacity, 1000);
        assert!(!settings.license.premium);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let result = parse_settings("[clock\nrefresh_interval_secs = ");
        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
