//! Driver error classification.
//!
//! Driver failures become [`StorageError`]s. Contention a fresh attempt may
//! not hit again is `Transient`; a closed pool or connection is
//! `Unavailable`; everything else is `Backend`.

use deadpool_postgres::PoolError;
use rnc_core::{RncResult, StorageError};
use rusqlite::ErrorCode;
use tokio_postgres::error::SqlState;

/// SQLSTATEs retried by the allocator.
const PG_TRANSIENT_STATES: [SqlState; 4] = [
    SqlState::T_R_SERIALIZATION_FAILURE,
    SqlState::T_R_DEADLOCK_DETECTED,
    SqlState::LOCK_NOT_AVAILABLE,
    SqlState::QUERY_CANCELED,
];

/// Convert driver results into [`RncResult`], tagging the operation.
pub(crate) trait StorageResultExt<T> {
    fn storage(self, operation: &'static str) -> RncResult<T>;
}

impl<T> StorageResultExt<T> for Result<T, tokio_postgres::Error> {
    fn storage(self, operation: &'static str) -> RncResult<T> {
        self.map_err(|err| classify_pg(operation, &err).into())
    }
}

impl<T> StorageResultExt<T> for Result<T, PoolError> {
    fn storage(self, operation: &'static str) -> RncResult<T> {
        self.map_err(|err| classify_pool(operation, err).into())
    }
}

impl<T> StorageResultExt<T> for Result<T, rusqlite::Error> {
    fn storage(self, operation: &'static str) -> RncResult<T> {
        self.map_err(|err| classify_sqlite(operation, &err).into())
    }
}

pub fn classify_pg(operation: &'static str, err: &tokio_postgres::Error) -> StorageError {
    if let Some(state) = err.code() {
        if PG_TRANSIENT_STATES.contains(state) {
            return StorageError::transient(operation, err.to_string());
        }
    }
    if err.is_closed() {
        return StorageError::Unavailable {
            reason: err.to_string(),
        };
    }
    tracing::error!(operation = operation, error = ?err, "Database error");
    StorageError::backend(operation, err.to_string())
}

pub fn classify_pool(operation: &'static str, err: PoolError) -> StorageError {
    match err {
        PoolError::Timeout(_) => {
            StorageError::transient(operation, "connection pool exhausted")
        }
        PoolError::Closed => StorageError::Unavailable {
            reason: "Database connection pool is closed".to_string(),
        },
        PoolError::Backend(err) => classify_pg(operation, &err),
        other => {
            tracing::error!(operation = operation, error = ?other, "Connection pool error");
            StorageError::Unavailable {
                reason: other.to_string(),
            }
        }
    }
}

pub fn classify_sqlite(operation: &'static str, err: &rusqlite::Error) -> StorageError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            StorageError::transient(operation, err.to_string())
        }
        Some(ErrorCode::CannotOpen) => StorageError::Unavailable {
            reason: err.to_string(),
        },
        _ => {
            tracing::error!(operation = operation, error = ?err, "SQLite error");
            StorageError::backend(operation, err.to_string())
        }
    }
}
