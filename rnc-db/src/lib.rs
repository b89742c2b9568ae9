//! RNC DB - SQL Case Stores
//!
//! PostgreSQL and SQLite implementations of [`rnc_storage::CaseStore`], the
//! table definitions they share, driver error classification, and backend
//! selection at startup.

pub mod config;
pub mod error;
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use config::{BackendChoice, DbConfig};
pub use postgres::{PgStore, PgUnitOfWork};
pub use sqlite::{SqliteStore, SqliteUnitOfWork};

use rnc_core::RncResult;
use rnc_storage::CaseStore;
use std::sync::Arc;

/// Open the store described by `config` and make sure its schema exists.
///
/// `Auto` tries PostgreSQL when a host is configured and falls back to the
/// SQLite file with a warning when PostgreSQL cannot be reached.
pub async fn connect(config: &DbConfig) -> RncResult<Arc<dyn CaseStore>> {
    match config.backend {
        BackendChoice::Postgres => Ok(Arc::new(connect_postgres(config).await?)),
        BackendChoice::Sqlite => Ok(Arc::new(open_sqlite(config).await?)),
        BackendChoice::Auto => {
            if config.host.is_none() {
                return Ok(Arc::new(open_sqlite(config).await?));
            }
            match connect_postgres(config).await {
                Ok(store) => Ok(Arc::new(store)),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        sqlite_path = %config.sqlite_path.display(),
                        "PostgreSQL unavailable, falling back to SQLite"
                    );
                    Ok(Arc::new(open_sqlite(config).await?))
                }
            }
        }
    }
}

async fn connect_postgres(config: &DbConfig) -> RncResult<PgStore> {
    let store = PgStore::from_config(config)?;
    store.bootstrap().await?;
    tracing::info!(
        host = config.host.as_deref().unwrap_or_default(),
        dbname = %config.dbname,
        pool_size = config.max_size,
        "Connected to PostgreSQL"
    );
    Ok(store)
}

async fn open_sqlite(config: &DbConfig) -> RncResult<SqliteStore> {
    let store = SqliteStore::open_async(config.sqlite_path.clone()).await?;
    tracing::info!(path = %config.sqlite_path.display(), "Opened SQLite database");
    Ok(store)
}
