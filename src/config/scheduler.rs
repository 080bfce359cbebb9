//! Scheduler configuration file and validation.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest tick interval accepted, in milliseconds.
const MAX_TICK_INTERVAL_MS: u64 = 60_000;

/// Longest extra wait added to a rate limit, in seconds.
const MAX_RATE_LIMIT_MARGIN_SECS: u64 = 3600;

/// Longest random delay before a send, in milliseconds.
const MAX_SEND_JITTER_MS: u64 = 60_000;

/// Longest shutdown grace period, in seconds.
const MAX_SHUTDOWN_GRACE_SECS: u64 = 3600;

/// Errors that can occur while loading or validating the scheduler config.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("tick_interval_ms must be between 1 and {MAX_TICK_INTERVAL_MS}, got {0}")]
    InvalidTickInterval(u64),

    #[error("rate_limit_margin_secs must be at most {MAX_RATE_LIMIT_MARGIN_SECS}, got {0}")]
    InvalidRateLimitMargin(u64),

    #[error("send_jitter_ms must be at most {MAX_SEND_JITTER_MS}, got {0}")]
    InvalidSendJitter(u64),

    #[error("shutdown_grace_secs must be at most {MAX_SHUTDOWN_GRACE_SECS}, got {0}")]
    InvalidShutdownGrace(u64),

    #[error("unclassified_error_strikes must be at least 1")]
    InvalidStrikeLimit,

    #[error("resolver_cache_max_age_secs must be greater than 0 when set")]
    InvalidCacheMaxAge,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Runtime knobs of the broadcast scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the scheduler loop looks for due profiles.
    pub tick_interval_ms: u64,

    /// Extra seconds added to every provider-requested wait.
    pub rate_limit_margin_secs: u64,

    /// Upper bound of the random delay added before each send.
    pub send_jitter_ms: u64,

    /// Unclassified failures tolerated before a destination is dropped.
    pub unclassified_error_strikes: u32,

    /// Resolved handles older than this are looked up again. `null` keeps them forever.
    pub resolver_cache_max_age_secs: Option<u64>,

    /// How long shutdown waits for running cycles before aborting them.
    pub shutdown_grace_secs: u64,

    /// Add every joined channel and supergroup as a destination at startup.
    pub seed_memberships_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            rate_limit_margin_secs: 2,
            send_jitter_ms: 0,
            unclassified_error_strikes: 1,
            resolver_cache_max_age_secs: Some(3600),
            shutdown_grace_secs: 30,
            seed_memberships_on_startup: false,
        }
    }
}

impl SchedulerConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Loads the file if it exists, otherwise returns the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ValidationError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Saves configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ValidationError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_all().into_iter().next().map_or(Ok(()), Err)
    }

    /// Returns every validation problem.
    #[must_use]
    pub fn validate_all(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.tick_interval_ms == 0 || self.tick_interval_ms > MAX_TICK_INTERVAL_MS {
            errors.push(ValidationError::InvalidTickInterval(self.tick_interval_ms));
        }
        if self.rate_limit_margin_secs > MAX_RATE_LIMIT_MARGIN_SECS {
            errors.push(ValidationError::InvalidRateLimitMargin(
                self.rate_limit_margin_secs,
            ));
        }
        if self.send_jitter_ms > MAX_SEND_JITTER_MS {
            errors.push(ValidationError::InvalidSendJitter(self.send_jitter_ms));
        }
        if self.shutdown_grace_secs > MAX_SHUTDOWN_GRACE_SECS {
            errors.push(ValidationError::InvalidShutdownGrace(self.shutdown_grace_secs));
        }
        if self.unclassified_error_strikes == 0 {
            errors.push(ValidationError::InvalidStrikeLimit);
        }
        if self.resolver_cache_max_age_secs == Some(0) {
            errors.push(ValidationError::InvalidCacheMaxAge);
        }

        errors
    }

    /// Creates an example configuration.
    #[must_use]
    pub fn example() -> Self {
        Self {
            send_jitter_ms: 1500,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    #[must_use]
    pub const fn rate_limit_margin(&self) -> Duration {
        Duration::from_secs(self.rate_limit_margin_secs)
    }

    #[must_use]
    pub const fn send_jitter(&self) -> Duration {
        Duration::from_millis(self.send_jitter_ms)
    }

    #[must_use]
    pub fn resolver_cache_max_age(&self) -> Option<Duration> {
        self.resolver_cache_max_age_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
