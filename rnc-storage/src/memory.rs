//! In-memory store.
//!
//! A unit of work holds the store lock for its whole lifetime, so units of
//! work are serialized and the undo journal is exact. Fault injection lets
//! tests force the conflict and contention paths of the allocator without a
//! database.

use crate::{BackendKind, CaseStore, CaseUnitOfWork, InsertOutcome, StoreCapabilities};
use async_trait::async_trait;
use rnc_core::{
    CaseId, CaseRecord, CaseUpdate, EntityKind, NewCase, RncResult, StorageError, YearCounter,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    counters: HashMap<i32, i64>,
    cases: BTreeMap<i64, CaseRecord>,
    /// Unique index on `rnc_number`.
    numbers: HashSet<String>,
    peps: BTreeSet<String>,
    next_id: i64,
}

#[derive(Debug, Default)]
struct FaultPlan {
    conflicts: AtomicU32,
    transient: AtomicU32,
    units_begun: AtomicU32,
}

impl FaultPlan {
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok()
    }
}

/// In-memory case store for tests and local experiments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<FaultPlan>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` conditional inserts report a conflict without
    /// writing anything.
    pub fn force_conflicts(&self, n: u32) {
        self.faults.conflicts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` counter advances fail with a transient error.
    pub fn force_transient_failures(&self, n: u32) {
        self.faults.transient.store(n, Ordering::SeqCst);
    }

    /// Number of units of work opened so far.
    pub fn units_begun(&self) -> u32 {
        self.faults.units_begun.load(Ordering::SeqCst)
    }

    /// Insert a case with an exact number, bypassing the counter, the way
    /// legacy rows and imports arrive. Returns `None` if the number is taken.
    pub async fn seed_case(&self, rnc_number: &str, case: NewCase) -> Option<CaseId> {
        let mut state = self.state.lock().await;
        insert_into(&mut state, rnc_number, &case)
    }

    /// Get count of stored cases.
    pub async fn case_count(&self) -> usize {
        self.state.lock().await.cases.len()
    }
}

fn insert_into(state: &mut MemoryState, rnc_number: &str, case: &NewCase) -> Option<CaseId> {
    if state.numbers.contains(rnc_number) {
        return None;
    }
    state.next_id += 1;
    let id = CaseId::new(state.next_id);
    state.numbers.insert(rnc_number.to_string());
    state
        .cases
        .insert(id.get(), CaseRecord::opened(id, rnc_number, case.clone()));
    Some(id)
}

// ============================================================================
// UNIT OF WORK
// ============================================================================

#[derive(Debug)]
enum Undo {
    Counter { year: i32, previous: Option<i64> },
    Insert { id: CaseId, rnc_number: String },
}

struct MemoryUnitOfWork {
    state: OwnedMutexGuard<MemoryState>,
    faults: Arc<FaultPlan>,
    journal: Vec<Undo>,
    finished: bool,
}

impl MemoryUnitOfWork {
    fn ensure_open(&self) -> RncResult<()> {
        if self.finished {
            return Err(StorageError::UnitOfWorkFinished.into());
        }
        Ok(())
    }

    fn undo(&mut self) {
        while let Some(entry) = self.journal.pop() {
            match entry {
                Undo::Counter { year, previous } => match previous {
                    Some(value) => {
                        self.state.counters.insert(year, value);
                    }
                    None => {
                        self.state.counters.remove(&year);
                    }
                },
                Undo::Insert { id, rnc_number } => {
                    self.state.cases.remove(&id.get());
                    self.state.numbers.remove(&rnc_number);
                }
            }
        }
    }
}

#[async_trait]
impl CaseUnitOfWork for MemoryUnitOfWork {
    async fn advance_counter(&mut self, year: i32, floor: i64) -> RncResult<i64> {
        self.ensure_open()?;
        if FaultPlan::take(&self.faults.transient) {
            return Err(StorageError::transient("advance_counter", "injected contention").into());
        }
        let previous = self.state.counters.get(&year).copied();
        let next = YearCounter::advance(previous, floor);
        self.state.counters.insert(year, next);
        self.journal.push(Undo::Counter { year, previous });
        Ok(next)
    }

    async fn raise_counter(&mut self, year: i32, at_least: i64) -> RncResult<()> {
        self.ensure_open()?;
        let previous = self.state.counters.get(&year).copied();
        if previous.is_some_and(|last_seq| last_seq >= at_least) {
            return Ok(());
        }
        self.state.counters.insert(year, at_least);
        self.journal.push(Undo::Counter { year, previous });
        Ok(())
    }

    async fn insert_case_if_absent(
        &mut self,
        rnc_number: &str,
        case: &NewCase,
    ) -> RncResult<Option<CaseId>> {
        self.ensure_open()?;
        if FaultPlan::take(&self.faults.conflicts) {
            return Ok(None);
        }
        let inserted = insert_into(&mut self.state, rnc_number, case);
        if let Some(id) = inserted {
            self.journal.push(Undo::Insert {
                id,
                rnc_number: rnc_number.to_string(),
            });
        }
        Ok(inserted)
    }

    async fn commit(&mut self) -> RncResult<()> {
        self.ensure_open()?;
        self.journal.clear();
        self.finished = true;
        Ok(())
    }

    async fn rollback(&mut self) -> RncResult<()> {
        self.ensure_open()?;
        self.undo();
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(pending = self.journal.len(), "Discarding unfinished unit of work");
            self.undo();
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

#[async_trait]
impl CaseStore for InMemoryStore {
    fn backend(&self) -> BackendKind {
        BackendKind::InMemory
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            upsert_returning: true,
        }
    }

    async fn begin(&self) -> RncResult<Box<dyn CaseUnitOfWork>> {
        let state = self.state.clone().lock_owned().await;
        self.faults.units_begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryUnitOfWork {
            state,
            faults: self.faults.clone(),
            journal: Vec::new(),
            finished: false,
        }))
    }

    async fn rnc_numbers_with_prefix(&self, prefix: &str) -> RncResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .numbers
            .iter()
            .filter(|number| number.trim_start().starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn counter_get(&self, year: i32) -> RncResult<Option<YearCounter>> {
        let state = self.state.lock().await;
        Ok(state
            .counters
            .get(&year)
            .map(|&last_seq| YearCounter { year, last_seq }))
    }

    async fn case_get(&self, id: CaseId) -> RncResult<Option<CaseRecord>> {
        let state = self.state.lock().await;
        Ok(state.cases.get(&id.get()).cloned())
    }

    async fn case_list(&self) -> RncResult<Vec<CaseRecord>> {
        let state = self.state.lock().await;
        Ok(state.cases.values().rev().cloned().collect())
    }

    async fn case_update(&self, id: CaseId, update: &CaseUpdate) -> RncResult<()> {
        let mut state = self.state.lock().await;
        let case = state
            .cases
            .get_mut(&id.get())
            .ok_or_else(|| StorageError::not_found(EntityKind::Case, id))?;
        case.apply(update);
        Ok(())
    }

    async fn case_delete(&self, id: CaseId) -> RncResult<()> {
        let mut state = self.state.lock().await;
        let case = state
            .cases
            .remove(&id.get())
            .ok_or_else(|| StorageError::not_found(EntityKind::Case, id))?;
        state.numbers.remove(&case.rnc_number);
        Ok(())
    }

    async fn pep_insert(&self, code: &str) -> RncResult<InsertOutcome> {
        let mut state = self.state.lock().await;
        if state.peps.insert(code.to_string()) {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    async fn pep_list(&self) -> RncResult<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state.peps.iter().cloned().collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
