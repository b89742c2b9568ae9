//! PostgreSQL case store.
//!
//! Each unit of work pins one pooled connection and runs an explicit
//! `BEGIN`/`COMMIT`. The counter upsert takes the row lock on the year, so
//! concurrent allocators queue on it instead of reading stale values.

use crate::config::DbConfig;
use crate::error::StorageResultExt;
use crate::schema::{
    pg_placeholder, update_case_sql, RawCase, CASE_COLUMNS, NEW_CASE_COLUMNS, POSTGRES_SCHEMA,
};
use async_trait::async_trait;
use deadpool_postgres::{Object, Pool};
use rnc_core::{
    CaseId, CaseRecord, CaseStatus, CaseUpdate, EntityKind, NewCase, RncResult, StorageError,
    YearCounter,
};
use rnc_storage::{BackendKind, CaseStore, CaseUnitOfWork, InsertOutcome, StoreCapabilities};
use tokio_postgres::Row;

/// Case store backed by a deadpool-postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build the pool described by `config`. Connections are opened lazily.
    pub fn from_config(config: &DbConfig) -> RncResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Create the tables if they do not exist.
    pub async fn bootstrap(&self) -> RncResult<()> {
        let conn = self.get_conn().await?;
        conn.batch_execute(POSTGRES_SCHEMA)
            .await
            .map_err(|e| StorageError::Schema {
                reason: e.to_string(),
            })?;
        tracing::debug!("PostgreSQL schema ready");
        Ok(())
    }

    async fn get_conn(&self) -> RncResult<Object> {
        self.pool.get().await.storage("get_conn")
    }
}

fn raw_case(row: &Row) -> RawCase {
    RawCase {
        id: row.get(0),
        rnc_number: row.get(1),
        reported_at: row.get(2),
        issuer: row.get(3),
        area: row.get(4),
        pep: row.get(5),
        title: row.get(6),
        responsible: row.get(7),
        description: row.get(8),
        references: row.get(9),
        causer: row.get(10),
        process: row.get(11),
        origin: row.get(12),
        severity: row.get(13),
        category: row.get(14),
        actions: row.get(15),
        action_owner: row.get(16),
        status: row.get(17),
        closed_at: row.get(18),
        closed_by: row.get(19),
        closure_notes: row.get(20),
        closure_description: row.get(21),
        effectiveness: row.get(22),
        reopened_at: row.get(23),
        reopened_by: row.get(24),
        reopen_reason: row.get(25),
        reopen_description: row.get(26),
        cancelled_at: row.get(27),
        cancelled_by: row.get(28),
        cancel_reason: row.get(29),
    }
}

// ============================================================================
// UNIT OF WORK
// ============================================================================

/// One PostgreSQL transaction on a pinned pooled connection.
///
/// Dropped unfinished, the connection is detached from the pool and closed,
/// which makes the server abort the open transaction.
pub struct PgUnitOfWork {
    conn: Option<Object>,
}

impl PgUnitOfWork {
    fn conn(&self) -> RncResult<&Object> {
        self.conn
            .as_ref()
            .ok_or_else(|| StorageError::UnitOfWorkFinished.into())
    }

    async fn finish(&mut self, statement: &'static str, operation: &'static str) -> RncResult<()> {
        let conn = self
            .conn
            .take()
            .ok_or(StorageError::UnitOfWorkFinished)?;
        match conn.batch_execute(statement).await.storage(operation) {
            Ok(()) => Ok(()),
            Err(e) => {
                drop(Object::take(conn));
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CaseUnitOfWork for PgUnitOfWork {
    async fn advance_counter(&mut self, year: i32, floor: i64) -> RncResult<i64> {
        let row = self
            .conn()?
            .query_one(
                "INSERT INTO rnc_year_counters (year, last_seq) VALUES ($1, $2::BIGINT + 1) \
                 ON CONFLICT (year) DO UPDATE \
                 SET last_seq = GREATEST(rnc_year_counters.last_seq, $2::BIGINT) + 1 \
                 RETURNING last_seq",
                &[&year, &floor],
            )
            .await
            .storage("advance_counter")?;
        Ok(row.get(0))
    }

    async fn raise_counter(&mut self, year: i32, at_least: i64) -> RncResult<()> {
        self.conn()?
            .execute(
                "INSERT INTO rnc_year_counters (year, last_seq) VALUES ($1, $2::BIGINT) \
                 ON CONFLICT (year) DO UPDATE \
                 SET last_seq = GREATEST(rnc_year_counters.last_seq, EXCLUDED.last_seq)",
                &[&year, &at_least],
            )
            .await
            .storage("raise_counter")?;
        Ok(())
    }

    async fn insert_case_if_absent(
        &mut self,
        rnc_number: &str,
        case: &NewCase,
    ) -> RncResult<Option<CaseId>> {
        let sql = format!(
            "INSERT INTO rnc_cases (rnc_number, status, {}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (rnc_number) DO NOTHING RETURNING id",
            NEW_CASE_COLUMNS
        );
        let row = self
            .conn()?
            .query_opt(
                sql.as_str(),
                &[
                    &rnc_number,
                    &CaseStatus::Open.as_db_str(),
                    &case.reported_at,
                    &case.issuer,
                    &case.area,
                    &case.pep,
                    &case.title,
                    &case.description,
                    &case.references,
                    &case.causer,
                    &case.process,
                    &case.origin,
                    &case.severity,
                    &case.category,
                ],
            )
            .await
            .storage("insert_case")?;
        Ok(row.map(|row| CaseId::new(row.get(0))))
    }

    async fn commit(&mut self) -> RncResult<()> {
        self.finish("COMMIT", "commit").await
    }

    async fn rollback(&mut self) -> RncResult<()> {
        self.finish("ROLLBACK", "rollback").await
    }
}

impl Drop for PgUnitOfWork {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!("Unit of work dropped without commit, discarding its connection");
            drop(Object::take(conn));
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

#[async_trait]
impl CaseStore for PgStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            upsert_returning: true,
        }
    }

    async fn begin(&self) -> RncResult<Box<dyn CaseUnitOfWork>> {
        let conn = self.get_conn().await?;
        conn.batch_execute("BEGIN").await.storage("begin")?;
        Ok(Box::new(PgUnitOfWork { conn: Some(conn) }))
    }

    async fn rnc_numbers_with_prefix(&self, prefix: &str) -> RncResult<Vec<String>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                "SELECT rnc_number FROM rnc_cases WHERE TRIM(rnc_number) LIKE $1",
                &[&format!("{}%", prefix)],
            )
            .await
            .storage("rnc_numbers_with_prefix")?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn counter_get(&self, year: i32) -> RncResult<Option<YearCounter>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT last_seq FROM rnc_year_counters WHERE year = $1",
                &[&year],
            )
            .await
            .storage("counter_get")?;
        Ok(row.map(|row| YearCounter {
            year,
            last_seq: row.get(0),
        }))
    }

    async fn case_get(&self, id: CaseId) -> RncResult<Option<CaseRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM rnc_cases WHERE id = $1", CASE_COLUMNS);
        let row = conn
            .query_opt(sql.as_str(), &[&id.get()])
            .await
            .storage("case_get")?;
        row.map(|row| raw_case(&row).into_record()).transpose()
    }

    async fn case_list(&self) -> RncResult<Vec<CaseRecord>> {
        let conn = self.get_conn().await?;
        let sql = format!("SELECT {} FROM rnc_cases ORDER BY id DESC", CASE_COLUMNS);
        let rows = conn.query(sql.as_str(), &[]).await.storage("case_list")?;
        rows.iter().map(|row| raw_case(row).into_record()).collect()
    }

    async fn case_update(&self, id: CaseId, update: &CaseUpdate) -> RncResult<()> {
        let conn = self.get_conn().await?;
        let closure = update.closure.as_ref();
        let reopening = update.reopening.as_ref();
        let cancellation = update.cancellation.as_ref();

        let changed = conn
            .execute(
                update_case_sql(pg_placeholder).as_str(),
                &[
                    &update.status.as_db_str(),
                    &closure.map(|c| c.at),
                    &closure.map(|c| c.by.as_str()),
                    &closure.map(|c| c.notes.as_str()),
                    &closure.map(|c| c.description.as_str()),
                    &closure.map(|c| c.effectiveness.as_db_str()),
                    &reopening.map(|r| r.at),
                    &reopening.map(|r| r.by.as_str()),
                    &reopening.map(|r| r.reason.as_str()),
                    &reopening.map(|r| r.description.as_str()),
                    &cancellation.map(|c| c.at),
                    &cancellation.map(|c| c.by.as_str()),
                    &cancellation.map(|c| c.reason.as_str()),
                    &id.get(),
                ],
            )
            .await
            .storage("case_update")?;

        if changed == 0 {
            return Err(StorageError::not_found(EntityKind::Case, id).into());
        }
        Ok(())
    }

    async fn case_delete(&self, id: CaseId) -> RncResult<()> {
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM rnc_cases WHERE id = $1", &[&id.get()])
            .await
            .storage("case_delete")?;
        if deleted == 0 {
            return Err(StorageError::not_found(EntityKind::Case, id).into());
        }
        Ok(())
    }

    async fn pep_insert(&self, code: &str) -> RncResult<InsertOutcome> {
        let conn = self.get_conn().await?;
        let inserted = conn
            .execute(
                "INSERT INTO rnc_peps (code) VALUES ($1) ON CONFLICT (code) DO NOTHING",
                &[&code],
            )
            .await
            .storage("pep_insert")?;
        Ok(if inserted == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn pep_list(&self) -> RncResult<Vec<String>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query("SELECT code FROM rnc_peps ORDER BY code", &[])
            .await
            .storage("pep_list")?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }
}
