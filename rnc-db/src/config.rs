//! Database configuration and backend selection.

use rnc_core::ConfigError;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which backend `connect` should open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendChoice {
    /// PostgreSQL when a host is configured and reachable, SQLite otherwise.
    #[default]
    Auto,
    Postgres,
    Sqlite,
}

impl BackendChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendChoice::Auto => "auto",
            BackendChoice::Postgres => "postgres",
            BackendChoice::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(BackendChoice::Auto),
            "postgres" | "postgresql" | "pg" => Ok(BackendChoice::Postgres),
            "sqlite" | "sqlite3" => Ok(BackendChoice::Sqlite),
            other => Err(ConfigError::InvalidValue {
                field: "RNC_DB_BACKEND".to_string(),
                value: other.to_string(),
                reason: "expected auto, postgres or sqlite".to_string(),
            }),
        }
    }
}

/// Database connection configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub backend: BackendChoice,
    /// PostgreSQL host. `Auto` only tries PostgreSQL when this is set.
    pub host: Option<String>,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: SecretString,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection and pool wait timeout
    pub timeout: Duration,
    /// SQLite database file
    pub sqlite_path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            host: None,
            port: 5432,
            dbname: "rnc".to_string(),
            user: "postgres".to_string(),
            password: SecretString::new("".into()),
            max_size: 8,
            timeout: Duration::from_secs(10),
            sqlite_path: PathBuf::from("rnc.db"),
        }
    }
}

impl DbConfig {
    /// Create a database configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RNC_DB_BACKEND`: `auto` (default), `postgres` or `sqlite`
    /// - `RNC_DB_HOST`, `RNC_DB_PORT` (default: 5432)
    /// - `RNC_DB_NAME` (default: rnc), `RNC_DB_USER` (default: postgres)
    /// - `RNC_DB_PASSWORD`
    /// - `RNC_DB_POOL_SIZE` (default: 8), `RNC_DB_TIMEOUT` in seconds (default: 10)
    /// - `RNC_SQLITE_PATH` (default: rnc.db)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            backend: match std::env::var("RNC_DB_BACKEND") {
                Ok(raw) => raw.parse()?,
                Err(_) => defaults.backend,
            },
            host: std::env::var("RNC_DB_HOST")
                .ok()
                .filter(|host| !host.trim().is_empty()),
            port: env_parse("RNC_DB_PORT")?.unwrap_or(defaults.port),
            dbname: std::env::var("RNC_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("RNC_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("RNC_DB_PASSWORD")
                .map(|p| SecretString::new(p.into()))
                .unwrap_or(defaults.password),
            max_size: env_parse("RNC_DB_POOL_SIZE")?.unwrap_or(defaults.max_size),
            timeout: env_parse("RNC_DB_TIMEOUT")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            sqlite_path: std::env::var("RNC_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.sqlite_path),
        })
    }

    /// SQLite-only configuration at `path`.
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendChoice::Sqlite,
            sqlite_path: path.into(),
            ..Default::default()
        }
    }

    /// Create a PostgreSQL connection pool from this configuration.
    pub(crate) fn create_pool(&self) -> Result<deadpool_postgres::Pool, ConfigError> {
        use deadpool_postgres::{
            Config, ManagerConfig, PoolConfig, RecyclingMethod, Runtime, Timeouts,
        };

        let host = self.host.clone().ok_or_else(|| ConfigError::MissingRequired {
            field: "RNC_DB_HOST".to_string(),
        })?;

        let mut cfg = Config::new();
        cfg.host = Some(host);
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.expose_secret().to_string());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size.max(1));
        pool_cfg.timeouts = Timeouts {
            wait: Some(self.timeout),
            create: Some(self.timeout),
            recycle: Some(self.timeout),
        };
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), tokio_postgres::NoTls)
            .map_err(|e| ConfigError::InvalidValue {
                field: "RNC_DB_HOST".to_string(),
                value: self.host.clone().unwrap_or_default(),
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
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
