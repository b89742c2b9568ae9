//! RNC Storage - Store Capability Traits and In-Memory Backend
//!
//! Defines the contract the allocator and the case services need from a
//! store. The SQL implementations live in rnc-db; the in-memory one here
//! backs the test suites.

pub mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use rnc_core::{CaseId, CaseRecord, CaseUpdate, NewCase, RncResult, YearCounter};
use std::fmt;

// ============================================================================
// CAPABILITIES
// ============================================================================

/// Which backend a store talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Postgres,
    Sqlite,
    InMemory,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            BackendKind::Postgres => "postgres",
            BackendKind::Sqlite => "sqlite",
            BackendKind::InMemory => "in-memory",
        };
        write!(f, "{}", value)
    }
}

/// Features that change how a backend runs the allocation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// The counter upsert and the conditional insert can hand back the
    /// affected row in the same statement. Without it the backend falls
    /// back to read-then-write inside the unit of work.
    pub upsert_returning: bool,
}

/// Result of an insert that tolerates an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

// ============================================================================
// STORE TRAITS
// ============================================================================

/// One store transaction.
///
/// Everything done through a unit of work is committed or discarded
/// together. Dropping it without calling [`CaseUnitOfWork::commit`] discards
/// its writes.
#[async_trait]
pub trait CaseUnitOfWork: Send {
    /// Advance the year's counter and return the new `last_seq`.
    ///
    /// Absent row: created with `floor + 1`. Present row: set to
    /// `max(last_seq, floor) + 1`. Must be atomic with respect to other
    /// units of work advancing the same year.
    async fn advance_counter(&mut self, year: i32, floor: i64) -> RncResult<i64>;

    /// Make sure the year's counter is at least `at_least`, without issuing
    /// a number. Never lowers the counter.
    async fn raise_counter(&mut self, year: i32, at_least: i64) -> RncResult<()>;

    /// Insert a case carrying `rnc_number`, or do nothing if another case
    /// already carries it. `Ok(None)` means conflict, never an error.
    async fn insert_case_if_absent(
        &mut self,
        rnc_number: &str,
        case: &NewCase,
    ) -> RncResult<Option<CaseId>>;

    async fn commit(&mut self) -> RncResult<()>;

    async fn rollback(&mut self) -> RncResult<()>;
}

/// Inspection record store.
#[async_trait]
pub trait CaseStore: Send + Sync {
    fn backend(&self) -> BackendKind;

    fn capabilities(&self) -> StoreCapabilities;

    /// Open a unit of work.
    async fn begin(&self) -> RncResult<Box<dyn CaseUnitOfWork>>;

    /// Every stored `rnc_number` starting with `prefix`, in no particular
    /// order. Used for previews and for lifting the counter over imported
    /// numbers.
    async fn rnc_numbers_with_prefix(&self, prefix: &str) -> RncResult<Vec<String>>;

    async fn counter_get(&self, year: i32) -> RncResult<Option<YearCounter>>;

    // === Case Operations ===

    async fn case_get(&self, id: CaseId) -> RncResult<Option<CaseRecord>>;

    /// All cases, newest first.
    async fn case_list(&self) -> RncResult<Vec<CaseRecord>>;

    /// Persist a lifecycle change. `NotFound` if the case is gone.
    async fn case_update(&self, id: CaseId, update: &CaseUpdate) -> RncResult<()>;

    /// Hard delete. `NotFound` if the case is gone.
    async fn case_delete(&self, id: CaseId) -> RncResult<()>;

    // === PEP Catalogue ===

    async fn pep_insert(&self, code: &str) -> RncResult<InsertOutcome>;

    /// All PEP codes, sorted.
    async fn pep_list(&self) -> RncResult<Vec<String>>;
}
