//! SQLite case store.
//!
//! One connection per store, shared behind an async mutex. A unit of work
//! holds the mutex for its whole lifetime and opens `BEGIN IMMEDIATE`, so it
//! owns the database write lock from its first statement. Other processes
//! wait on the busy timeout and surface `SQLITE_BUSY` as a transient error.
//!
//! rusqlite is synchronous and a statement may sit in the busy handler for
//! the whole timeout, so every statement runs on tokio's blocking pool with
//! the mutex guard moved into the task.

use crate::error::StorageResultExt;
use crate::schema::{
    sqlite_placeholder, update_case_sql, RawCase, CASE_COLUMNS, NEW_CASE_COLUMNS, SQLITE_SCHEMA,
};
use async_trait::async_trait;
use rnc_core::{
    CaseId, CaseRecord, CaseStatus, CaseUpdate, EntityKind, NewCase, RncResult, StorageError,
    YearCounter,
};
use rnc_storage::{BackendKind, CaseStore, CaseUnitOfWork, InsertOutcome, StoreCapabilities};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// First SQLite release with `RETURNING`.
const RETURNING_MIN_VERSION: i32 = 3_035_000;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Case store backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    returning: bool,
    path: Option<PathBuf>,
}

/// Run `f` on the blocking pool.
async fn run_blocking<T, F>(operation: &'static str, f: F) -> RncResult<T>
where
    F: FnOnce() -> RncResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::backend(operation, e.to_string()))?
}

impl SqliteStore {
    /// Open or create the database at `path` and make sure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> RncResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).storage("open")?;
        Self::initialize(conn, Some(path.to_path_buf()))
    }

    /// [`SqliteStore::open`] on the blocking pool.
    pub async fn open_async(path: PathBuf) -> RncResult<Self> {
        run_blocking("open", move || Self::open(path)).await
    }

    /// In-memory database, for tests.
    pub fn in_memory() -> RncResult<Self> {
        let conn = Connection::open_in_memory().storage("open")?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, path: Option<PathBuf>) -> RncResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT).storage("configure")?;
        let journal_mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .storage("configure")?;
        conn.execute_batch(SQLITE_SCHEMA)
            .map_err(|e| StorageError::Schema {
                reason: e.to_string(),
            })?;

        let returning = rusqlite::version_number() >= RETURNING_MIN_VERSION;
        tracing::debug!(
            sqlite_version = rusqlite::version(),
            journal_mode = %journal_mode,
            returning = returning,
            "SQLite store ready"
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            returning,
            path,
        })
    }

    /// Force the read-then-write path used with SQLite older than 3.35.
    pub fn without_returning(mut self) -> Self {
        self.returning = false;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Lock the connection and run `f` against it on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> RncResult<T>
    where
        F: FnOnce(&Connection) -> RncResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone().lock_owned().await;
        run_blocking(operation, move || f(&conn)).await
    }
}

fn raw_case(row: &Row<'_>) -> rusqlite::Result<RawCase> {
    Ok(RawCase {
        id: row.get(0)?,
        rnc_number: row.get(1)?,
        reported_at: row.get(2)?,
        issuer: row.get(3)?,
        area: row.get(4)?,
        pep: row.get(5)?,
        title: row.get(6)?,
        responsible: row.get(7)?,
        description: row.get(8)?,
        references: row.get(9)?,
        causer: row.get(10)?,
        process: row.get(11)?,
        origin: row.get(12)?,
        severity: row.get(13)?,
        category: row.get(14)?,
        actions: row.get(15)?,
        action_owner: row.get(16)?,
        status: row.get(17)?,
        closed_at: row.get(18)?,
        closed_by: row.get(19)?,
        closure_notes: row.get(20)?,
        closure_description: row.get(21)?,
        effectiveness: row.get(22)?,
        reopened_at: row.get(23)?,
        reopened_by: row.get(24)?,
        reopen_reason: row.get(25)?,
        reopen_description: row.get(26)?,
        cancelled_at: row.get(27)?,
        cancelled_by: row.get(28)?,
        cancel_reason: row.get(29)?,
    })
}

// ============================================================================
// SYNC STATEMENTS
// ============================================================================

fn advance_counter_returning(conn: &Connection, year: i32, floor: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "INSERT INTO rnc_year_counters (year, last_seq) VALUES (?1, ?2 + 1) \
         ON CONFLICT (year) DO UPDATE SET last_seq = MAX(last_seq, ?2) + 1 \
         RETURNING last_seq",
        params![year, floor],
        |row| row.get(0),
    )
}

fn advance_counter_read_write(conn: &Connection, year: i32, floor: i64) -> rusqlite::Result<i64> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT last_seq FROM rnc_year_counters WHERE year = ?1",
            params![year],
            |row| row.get(0),
        )
        .optional()?;
    let next = YearCounter::advance(current, floor);
    if current.is_some() {
        conn.execute(
            "UPDATE rnc_year_counters SET last_seq = ?2 WHERE year = ?1",
            params![year, next],
        )?;
    } else {
        conn.execute(
            "INSERT INTO rnc_year_counters (year, last_seq) VALUES (?1, ?2)",
            params![year, next],
        )?;
    }
    Ok(next)
}

fn raise_counter_upsert(conn: &Connection, year: i32, at_least: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO rnc_year_counters (year, last_seq) VALUES (?1, ?2) \
         ON CONFLICT (year) DO UPDATE SET last_seq = MAX(last_seq, excluded.last_seq)",
        params![year, at_least],
    )?;
    Ok(())
}

fn raise_counter_read_write(conn: &Connection, year: i32, at_least: i64) -> rusqlite::Result<()> {
    let current: Option<i64> = conn
        .query_row(
            "SELECT last_seq FROM rnc_year_counters WHERE year = ?1",
            params![year],
            |row| row.get(0),
        )
        .optional()?;
    match current {
        Some(last_seq) if last_seq >= at_least => {}
        Some(_) => {
            conn.execute(
                "UPDATE rnc_year_counters SET last_seq = ?2 WHERE year = ?1",
                params![year, at_least],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO rnc_year_counters (year, last_seq) VALUES (?1, ?2)",
                params![year, at_least],
            )?;
        }
    }
    Ok(())
}

/// Open the write transaction, clearing one a cancelled caller left behind.
fn begin_immediate(conn: &Connection) -> RncResult<()> {
    if !conn.is_autocommit() {
        tracing::warn!("Connection still inside a transaction, rolling it back");
        conn.execute_batch("ROLLBACK").storage("begin")?;
    }
    conn.execute_batch("BEGIN IMMEDIATE").storage("begin")
}

fn finish_transaction(conn: &Connection, statement: &str, operation: &'static str) -> RncResult<()> {
    let result = conn.execute_batch(statement).storage(operation);
    if result.is_err() && !conn.is_autocommit() {
        // COMMIT can fail with SQLITE_BUSY and leave the transaction open.
        if let Err(e) = conn.execute_batch("ROLLBACK") {
            tracing::warn!(error = %e, operation = operation, "Rollback after failed finish also failed");
        }
    }
    result
}

fn insert_case(
    conn: &Connection,
    returning: bool,
    rnc_number: &str,
    case: &NewCase,
) -> rusqlite::Result<Option<i64>> {
    let values = params![
        rnc_number,
        CaseStatus::Open.as_db_str(),
        case.reported_at,
        case.issuer,
        case.area,
        case.pep,
        case.title,
        case.description,
        case.references,
        case.causer,
        case.process,
        case.origin,
        case.severity,
        case.category,
    ];

    if returning {
        let sql = format!(
            "INSERT INTO rnc_cases (rnc_number, status, {}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
             ON CONFLICT (rnc_number) DO NOTHING RETURNING id",
            NEW_CASE_COLUMNS
        );
        conn.query_row(&sql, values, |row| row.get(0)).optional()
    } else {
        let sql = format!(
            "INSERT OR IGNORE INTO rnc_cases (rnc_number, status, {}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            NEW_CASE_COLUMNS
        );
        // last_insert_rowid() keeps the previous value when the insert is
        // ignored; only trust it when a row was written.
        let inserted = conn.execute(&sql, values)?;
        Ok((inserted == 1).then(|| conn.last_insert_rowid()))
    }
}

fn select_cases(conn: &Connection, filter: &str, id: Option<i64>) -> rusqlite::Result<Vec<RawCase>> {
    let sql = format!("SELECT {} FROM rnc_cases {}", CASE_COLUMNS, filter);
    let mut stmt = conn.prepare(&sql)?;
    let rows = match id {
        Some(id) => stmt.query_map(params![id], raw_case)?,
        None => stmt.query_map([], raw_case)?,
    };
    rows.collect()
}

fn first_column(row: &Row<'_>) -> rusqlite::Result<String> {
    row.get(0)
}

fn select_strings(conn: &Connection, sql: &str, param: Option<&str>) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = match param {
        Some(value) => stmt.query_map(params![value], first_column)?,
        None => stmt.query_map([], first_column)?,
    };
    rows.collect()
}

fn update_case(conn: &Connection, id: i64, update: &CaseUpdate) -> rusqlite::Result<usize> {
    let closure = update.closure.as_ref();
    let reopening = update.reopening.as_ref();
    let cancellation = update.cancellation.as_ref();
    conn.execute(
        &update_case_sql(sqlite_placeholder),
        params![
            update.status.as_db_str(),
            closure.map(|c| c.at),
            closure.map(|c| c.by.as_str()),
            closure.map(|c| c.notes.as_str()),
            closure.map(|c| c.description.as_str()),
            closure.map(|c| c.effectiveness.as_db_str()),
            reopening.map(|r| r.at),
            reopening.map(|r| r.by.as_str()),
            reopening.map(|r| r.reason.as_str()),
            reopening.map(|r| r.description.as_str()),
            cancellation.map(|c| c.at),
            cancellation.map(|c| c.by.as_str()),
            cancellation.map(|c| c.reason.as_str()),
            id,
        ],
    )
}

// ============================================================================
// UNIT OF WORK
// ============================================================================

/// One `BEGIN IMMEDIATE` transaction. Dropped unfinished, it rolls back.
pub struct SqliteUnitOfWork {
    /// Taken while a statement runs on the blocking pool.
    conn: Option<OwnedMutexGuard<Connection>>,
    returning: bool,
    finished: bool,
}

impl SqliteUnitOfWork {
    /// Move the connection into a blocking task, run `f`, and take it back.
    async fn run<T, F>(&mut self, operation: &'static str, f: F) -> RncResult<T>
    where
        F: FnOnce(&Connection) -> RncResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.finished {
            return Err(StorageError::UnitOfWorkFinished.into());
        }
        let conn = self.conn.take().ok_or(StorageError::UnitOfWorkFinished)?;
        let joined = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            (conn, result)
        })
        .await;
        match joined {
            Ok((conn, result)) => {
                self.conn = Some(conn);
                result
            }
            Err(e) => {
                self.finished = true;
                Err(StorageError::backend(operation, e.to_string()).into())
            }
        }
    }

    async fn finish(&mut self, statement: &'static str, operation: &'static str) -> RncResult<()> {
        let result = self
            .run(operation, move |conn| finish_transaction(conn, statement, operation))
            .await;
        self.finished = true;
        result
    }
}

#[async_trait]
impl CaseUnitOfWork for SqliteUnitOfWork {
    async fn advance_counter(&mut self, year: i32, floor: i64) -> RncResult<i64> {
        let returning = self.returning;
        self.run("advance_counter", move |conn| {
            if returning {
                advance_counter_returning(conn, year, floor).storage("advance_counter")
            } else {
                advance_counter_read_write(conn, year, floor).storage("advance_counter")
            }
        })
        .await
    }

    async fn raise_counter(&mut self, year: i32, at_least: i64) -> RncResult<()> {
        let returning = self.returning;
        self.run("raise_counter", move |conn| {
            if returning {
                raise_counter_upsert(conn, year, at_least).storage("raise_counter")
            } else {
                raise_counter_read_write(conn, year, at_least).storage("raise_counter")
            }
        })
        .await
    }

    async fn insert_case_if_absent(
        &mut self,
        rnc_number: &str,
        case: &NewCase,
    ) -> RncResult<Option<CaseId>> {
        let returning = self.returning;
        let rnc_number = rnc_number.to_string();
        let case = case.clone();
        let id = self
            .run("insert_case", move |conn| {
                insert_case(conn, returning, &rnc_number, &case).storage("insert_case")
            })
            .await?;
        Ok(id.map(CaseId::new))
    }

    async fn commit(&mut self) -> RncResult<()> {
        self.finish("COMMIT", "commit").await
    }

    async fn rollback(&mut self) -> RncResult<()> {
        self.finish("ROLLBACK", "rollback").await
    }
}

impl Drop for SqliteUnitOfWork {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(conn) = self.conn.as_ref() {
            if !conn.is_autocommit() {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    tracing::warn!(error = %e, "Rollback of abandoned unit of work failed");
                }
            }
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

#[async_trait]
impl CaseStore for SqliteStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            upsert_returning: self.returning,
        }
    }

    async fn begin(&self) -> RncResult<Box<dyn CaseUnitOfWork>> {
        let conn = self.conn.clone().lock_owned().await;
        let conn = run_blocking("begin", move || {
            begin_immediate(&conn)?;
            Ok(conn)
        })
        .await?;
        Ok(Box::new(SqliteUnitOfWork {
            conn: Some(conn),
            returning: self.returning,
            finished: false,
        }))
    }

    async fn rnc_numbers_with_prefix(&self, prefix: &str) -> RncResult<Vec<String>> {
        let pattern = format!("{}%", prefix);
        self.with_conn("rnc_numbers_with_prefix", move |conn| {
            select_strings(
                conn,
                "SELECT rnc_number FROM rnc_cases WHERE TRIM(rnc_number) LIKE ?1",
                Some(pattern.as_str()),
            )
            .storage("rnc_numbers_with_prefix")
        })
        .await
    }

    async fn counter_get(&self, year: i32) -> RncResult<Option<YearCounter>> {
        let last_seq: Option<i64> = self
            .with_conn("counter_get", move |conn| {
                conn.query_row(
                    "SELECT last_seq FROM rnc_year_counters WHERE year = ?1",
                    params![year],
                    |row| row.get(0),
                )
                .optional()
                .storage("counter_get")
            })
            .await?;
        Ok(last_seq.map(|last_seq| YearCounter { year, last_seq }))
    }

    async fn case_get(&self, id: CaseId) -> RncResult<Option<CaseRecord>> {
        let rows = self
            .with_conn("case_get", move |conn| {
                select_cases(conn, "WHERE id = ?1", Some(id.get())).storage("case_get")
            })
            .await?;
        rows.into_iter().next().map(RawCase::into_record).transpose()
    }

    async fn case_list(&self) -> RncResult<Vec<CaseRecord>> {
        self.with_conn("case_list", |conn| {
            select_cases(conn, "ORDER BY id DESC", None).storage("case_list")
        })
        .await?
        .into_iter()
        .map(RawCase::into_record)
        .collect()
    }

    async fn case_update(&self, id: CaseId, update: &CaseUpdate) -> RncResult<()> {
        let update = update.clone();
        let changed = self
            .with_conn("case_update", move |conn| {
                update_case(conn, id.get(), &update).storage("case_update")
            })
            .await?;
        if changed == 0 {
            return Err(StorageError::not_found(EntityKind::Case, id).into());
        }
        Ok(())
    }

    async fn case_delete(&self, id: CaseId) -> RncResult<()> {
        let deleted = self
            .with_conn("case_delete", move |conn| {
                conn.execute("DELETE FROM rnc_cases WHERE id = ?1", params![id.get()])
                    .storage("case_delete")
            })
            .await?;
        if deleted == 0 {
            return Err(StorageError::not_found(EntityKind::Case, id).into());
        }
        Ok(())
    }

    async fn pep_insert(&self, code: &str) -> RncResult<InsertOutcome> {
        let code = code.to_string();
        let inserted = self
            .with_conn("pep_insert", move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO rnc_peps (code) VALUES (?1)",
                    params![code],
                )
                .storage("pep_insert")
            })
            .await?;
        Ok(if inserted == 0 {
            InsertOutcome::AlreadyExists
        } else {
            InsertOutcome::Inserted
        })
    }

    async fn pep_list(&self) -> RncResult<Vec<String>> {
        self.with_conn("pep_list", |conn| {
            select_strings(conn, "SELECT code FROM rnc_peps ORDER BY code", None)
                .storage("pep_list")
        })
        .await
    }
}
