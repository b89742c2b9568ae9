//! Application Configuration
//!
//! Everything the `rnc` binary reads from its environment, gathered in one
//! place so startup fails early on a bad value.

use crate::auth::QualityPassword;
use rnc_core::{AllocatorConfig, ConfigError};
use rnc_db::DbConfig;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LOG FORMAT
// ============================================================================

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue {
                field: "RNC_LOG_FORMAT".to_string(),
                value: other.to_string(),
                reason: "expected pretty or json".to_string(),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

// ============================================================================
// APP CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub db: DbConfig,
    pub allocator: AllocatorConfig,
    /// `None` disables every quality-only operation.
    pub quality_password: Option<QualityPassword>,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Create AppConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RNC_QUALITY_PASSWORD`: shared password of the quality team (unset = disabled)
    /// - `RNC_LOG_FORMAT`: `pretty` or `json` (default: pretty)
    /// - the `RNC_DB_*` and `RNC_ALLOC_*` families, see [`DbConfig::from_env`]
    ///   and [`AllocatorConfig::from_env`]
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_format = match std::env::var("RNC_LOG_FORMAT") {
            Ok(value) => value.parse()?,
            Err(_) => LogFormat::default(),
        };
        let quality_password = std::env::var("RNC_QUALITY_PASSWORD")
            .ok()
            .and_then(QualityPassword::new);

        Ok(Self {
            db: DbConfig::from_env()?,
            allocator: AllocatorConfig::from_env()?,
            quality_password,
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" JSON ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn test_log_format_rejects_unknown() {
        let err = "xml".parse::<LogFormat>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "RNC_LOG_FORMAT"));
    }

    #[test]
    fn test_default_disables_quality_access() {
        let config = AppConfig::default();
        assert!(config.quality_password.is_none());
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.allocator.validate().is_ok());
    }
}
