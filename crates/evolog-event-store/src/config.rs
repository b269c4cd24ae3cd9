//! Scanner configuration.

use std::num::ParseIntError;
use std::time::Duration;

use thiserror::Error;

/// Environment variable holding the minimum ticket age, in seconds.
pub const MINIMUM_PENDING_SECS_VAR: &str = "EVOLOG_MINIMUM_PENDING_SECS";

/// Environment variable holding the scan interval, in seconds.
pub const SCAN_INTERVAL_SECS_VAR: &str = "EVOLOG_SCAN_INTERVAL_SECS";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable was set but is not a whole number of seconds.
    #[error("{name} must be a whole number of seconds: {source}")]
    InvalidSeconds {
        /// The offending variable.
        name: &'static str,
        /// Parse failure.
        #[source]
        source: ParseIntError,
    },

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Timing of the pending-event scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannerConfig {
    /// Streams whose oldest ticket is younger than this are left alone, so
    /// a stream still being written is not flushed mid-append.
    pub minimum_pending_time: Duration,
    /// Pause between sweeps of the run loop.
    pub scan_interval: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            minimum_pending_time: Duration::from_secs(30),
            scan_interval: Duration::from_secs(60),
        }
    }
}

impl ScannerConfig {
    /// Reads the configuration from the process environment, falling back
    /// to the defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let seconds = |name: &'static str, default: Duration| match lookup(name) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|source| ConfigError::InvalidSeconds { name, source }),
            None => Ok(default),
        };

        let config = Self {
            minimum_pending_time: seconds(
                MINIMUM_PENDING_SECS_VAR,
                defaults.minimum_pending_time,
            )?,
            scan_interval: seconds(SCAN_INTERVAL_SECS_VAR, defaults.scan_interval)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks that the values are usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for a zero scan interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "scan interval must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}
