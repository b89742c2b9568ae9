//! Allocator retry configuration

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for number allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Attempts before giving up with `AllocationError::Exhausted`.
    pub max_attempts: u32,
    /// Pause after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for the pause between attempts.
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
    /// Random extra pause in `[0, jitter]` so racing sessions drift apart.
    pub jitter: Duration,
}

impl AllocatorConfig {
    /// Smallest retry budget accepted by [`AllocatorConfig::validate`].
    pub const MIN_ATTEMPTS: u32 = 10;

    /// Create AllocatorConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RNC_ALLOC_MAX_ATTEMPTS` (default: 20)
    /// - `RNC_ALLOC_BACKOFF_MS` (default: 50)
    /// - `RNC_ALLOC_MAX_BACKOFF_MS` (default: 500)
    /// - `RNC_ALLOC_JITTER_MS` (default: 25)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            max_attempts: env_parse("RNC_ALLOC_MAX_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            initial_backoff: env_parse("RNC_ALLOC_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: env_parse("RNC_ALLOC_MAX_BACKOFF_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            backoff_multiplier: defaults.backoff_multiplier,
            jitter: env_parse("RNC_ALLOC_JITTER_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.jitter),
        };
        config.validate()?;
        Ok(config)
    }

    /// No pauses at all; for tests that drive many attempts.
    pub fn without_pauses(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: Duration::ZERO,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts < Self::MIN_ATTEMPTS {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts".to_string(),
                value: self.max_attempts.to_string(),
                reason: format!("must be at least {}", Self::MIN_ATTEMPTS),
            });
        }
        if self.max_backoff < self.initial_backoff {
            return Err(ConfigError::InvalidValue {
                field: "max_backoff".to_string(),
                value: format!("{:?}", self.max_backoff),
                reason: "must not be shorter than initial_backoff".to_string(),
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "backoff_multiplier".to_string(),
                value: self.backoff_multiplier.to_string(),
                reason: "must be a finite value >= 1.0".to_string(),
            });
        }
        Ok(())
    }

    /// Pause before attempt `attempt + 1`, jitter excluded. `attempt` is
    /// 1-based.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let scaled = self.initial_backoff.as_secs_f64()
            * f64::from(self.backoff_multiplier).powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_backoff.as_secs_f64()))
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 1.5,
            jitter: Duration::from_millis(25),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw,
                reason: "not a number".to_string(),
            }),
        Err(_) => Ok(None),
    }
}
