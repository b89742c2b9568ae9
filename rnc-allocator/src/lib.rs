//! RNC Allocator - Sequential Number Allocation
//!
//! Hands out `YYYY-NNN` numbers and attaches each one to exactly one case.
//!
//! Every attempt runs in a single store unit of work:
//!
//! 1. advance the year's counter (`max(last_seq, floor) + 1`)
//! 2. conditionally insert the case under the new number
//! 3. commit
//!
//! The first attempt already lifts the counter over the highest number stored
//! for the year, so imported or legacy rows never leave room below them. A
//! conflict on the number still commits the counter advance, so that number
//! is never offered again, and the floor is rescanned. Transient store
//! failures roll back and retry. Numbers may be skipped; they are never
//! issued twice.

use rand::Rng;
use rnc_core::{
    legacy_suffix, max_legacy_suffix, AllocationError, AllocatorConfig, CaseId, NewCase, RncNumber, RncResult,
    WallClock,
};
use rnc_storage::{CaseStore, CaseUnitOfWork};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A case created under a freshly allocated number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub case_id: CaseId,
    pub rnc_number: RncNumber,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// A case created from an import row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportedCase {
    pub case_id: CaseId,
    pub rnc_number: String,
    /// `true` when the row had no usable number and one was allocated.
    pub auto_numbered: bool,
}

enum Attempt {
    Inserted(CaseId, RncNumber),
    Conflict(RncNumber),
}

/// Allocates RNC numbers against a [`CaseStore`].
///
/// Cheap to share behind `Arc`; concurrent callers behave like independent
/// sessions and rely only on the store for correctness.
pub struct RncAllocator {
    store: Arc<dyn CaseStore>,
    clock: Arc<dyn WallClock>,
    config: AllocatorConfig,
}

impl RncAllocator {
    pub fn new(
        store: Arc<dyn CaseStore>,
        clock: Arc<dyn WallClock>,
        config: AllocatorConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn CaseStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn WallClock> {
        &self.clock
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Allocate the next number for the current year and insert `case`
    /// under it.
    ///
    /// The year is read from the clock once; a submission that straddles
    /// New Year's midnight keeps the year it started with.
    #[tracing::instrument(skip(self, case), fields(year = tracing::field::Empty))]
    pub async fn allocate_and_insert(&self, case: &NewCase) -> RncResult<Allocation> {
        let year = self.clock.current_year();
        tracing::Span::current().record("year", year);
        // Reject years that cannot render before touching the counter.
        RncNumber::new(year, 1)?;

        let max_attempts = self.config.max_attempts;
        let mut floor = self.stored_floor(year).await?;

        for attempt in 1..=max_attempts {
            match self.attempt_once(year, floor, case).await {
                Ok(Attempt::Inserted(case_id, rnc_number)) => {
                    tracing::info!(
                        case_id = %case_id,
                        rnc_number = %rnc_number,
                        attempt = attempt,
                        "RNC number allocated"
                    );
                    return Ok(Allocation {
                        case_id,
                        rnc_number,
                        attempts: attempt,
                    });
                }
                Ok(Attempt::Conflict(burned)) => {
                    tracing::warn!(
                        rnc_number = %burned,
                        attempt = attempt,
                        "RNC number already taken, skipping it"
                    );
                    match self.stored_floor(year).await {
                        Ok(stored) => floor = floor.max(stored),
                        Err(e) if e.is_transient() => {
                            tracing::warn!(error = %e, attempt = attempt, "Floor scan failed, keeping previous floor");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, attempt = attempt, "Allocation attempt hit contention");
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt = attempt, "Allocation attempt failed");
                    return Err(e);
                }
            }

            if attempt < max_attempts {
                let pause = self.pause_after(attempt);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }
        }

        tracing::error!(year = year, attempts = max_attempts, "RNC allocation exhausted its retry budget");
        Err(AllocationError::Exhausted {
            year,
            attempts: max_attempts,
        }
        .into())
    }

    /// The number the next allocation in `year` would most likely receive.
    ///
    /// Read-only: looks at stored numbers, never at or into the counter. Not
    /// a reservation; concurrent submissions may take it first.
    pub async fn preview_next(&self, year: i32) -> RncResult<RncNumber> {
        let max = self.stored_max_suffix(year).await?;
        Ok(RncNumber::new(year, saturating_i64(max).saturating_add(1))?)
    }

    /// [`RncAllocator::preview_next`] for the clock's current year.
    pub async fn preview_current(&self) -> RncResult<RncNumber> {
        self.preview_next(self.clock.current_year()).await
    }

    /// Insert `case` under the requested number if it is free, otherwise
    /// under a freshly allocated one.
    ///
    /// The requested value is trimmed and stored as given; imported data may
    /// carry numbers in any format. A blank request always allocates. A kept
    /// number of the current year raises that year's counter to its suffix in
    /// the same unit of work.
    #[tracing::instrument(skip(self, case))]
    pub async fn insert_with_requested_number(
        &self,
        requested: Option<&str>,
        case: &NewCase,
    ) -> RncResult<ImportedCase> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());

        if let Some(number) = requested {
            let mut uow = self.store.begin().await?;
            match insert_requested(uow.as_mut(), number, self.clock.current_year(), case).await {
                Ok(Some(case_id)) => {
                    uow.commit().await?;
                    tracing::debug!(case_id = %case_id, rnc_number = number, "Case inserted with requested number");
                    return Ok(ImportedCase {
                        case_id,
                        rnc_number: number.to_string(),
                        auto_numbered: false,
                    });
                }
                Ok(None) => {
                    uow.rollback().await?;
                    tracing::info!(rnc_number = number, "Requested number taken, allocating a new one");
                }
                Err(e) => {
                    rollback_quietly(uow.as_mut()).await;
                    return Err(e);
                }
            }
        }

        let allocation = self.allocate_and_insert(case).await?;
        Ok(ImportedCase {
            case_id: allocation.case_id,
            rnc_number: allocation.rnc_number.to_string(),
            auto_numbered: true,
        })
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    async fn attempt_once(&self, year: i32, floor: i64, case: &NewCase) -> RncResult<Attempt> {
        let mut uow = self.store.begin().await?;
        match run_attempt(uow.as_mut(), year, floor, case).await {
            Ok(attempt) => {
                uow.commit().await?;
                Ok(attempt)
            }
            Err(e) => {
                rollback_quietly(uow.as_mut()).await;
                Err(e)
            }
        }
    }

    async fn stored_max_suffix(&self, year: i32) -> RncResult<u64> {
        let numbers = self
            .store
            .rnc_numbers_with_prefix(&RncNumber::year_prefix(year))
            .await?;
        Ok(max_legacy_suffix(numbers.iter().map(String::as_str), year))
    }

    async fn stored_floor(&self, year: i32) -> RncResult<i64> {
        Ok(saturating_i64(self.stored_max_suffix(year).await?))
    }

    fn pause_after(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_for(attempt);
        let jitter_ms = u64::try_from(self.config.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

async fn run_attempt(
    uow: &mut dyn CaseUnitOfWork,
    year: i32,
    floor: i64,
    case: &NewCase,
) -> RncResult<Attempt> {
    let last_seq = uow.advance_counter(year, floor).await?;
    let candidate = RncNumber::new(year, last_seq)?;
    match uow
        .insert_case_if_absent(&candidate.to_string(), case)
        .await?
    {
        Some(case_id) => Ok(Attempt::Inserted(case_id, candidate)),
        None => Ok(Attempt::Conflict(candidate)),
    }
}

async fn insert_requested(
    uow: &mut dyn CaseUnitOfWork,
    number: &str,
    year: i32,
    case: &NewCase,
) -> RncResult<Option<CaseId>> {
    let inserted = uow.insert_case_if_absent(number, case).await?;
    if inserted.is_some() {
        if let Some(suffix) = legacy_suffix(number, year) {
            uow.raise_counter(year, saturating_i64(suffix)).await?;
        }
    }
    Ok(inserted)
}

async fn rollback_quietly(uow: &mut dyn CaseUnitOfWork) {
    if let Err(e) = uow.rollback().await {
        tracing::warn!(error = %e, "Rollback failed, discarding unit of work");
    }
}

/// Suffixes beyond `i64` cannot come out of the counter column; clamp them
/// so the counter can still be lifted.
fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX - 1).min(i64::MAX - 1)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rnc_core::{FixedClock, RncError, StorageError, ValidationError};
    use rnc_storage::InMemoryStore;
    use rnc_test_utils::fixtures;

    fn allocator_on(store: &InMemoryStore, clock: Arc<FixedClock>) -> RncAllocator {
        RncAllocator::new(
            Arc::new(store.clone()),
            clock,
            fixtures::fast_allocator_config(),
        )
    }

    #[tokio::test]
    async fn test_sequence_per_year() {
        let store = InMemoryStore::new();
        let clock = fixtures::clock_in(2025);
        let allocator = allocator_on(&store, clock.clone());
        let case = fixtures::sample_case("first");

        let first = allocator.allocate_and_insert(&case).await.unwrap();
        assert_eq!(first.rnc_number.to_string(), "2025-001");
        assert_eq!(first.attempts, 1);

        let second = allocator.allocate_and_insert(&case).await.unwrap();
        assert_eq!(second.rnc_number.to_string(), "2025-002");

        clock.set_year(2026);
        let third = allocator.allocate_and_insert(&case).await.unwrap();
        assert_eq!(third.rnc_number.to_string(), "2026-001");

        let stored = store.case_get(third.case_id).await.unwrap().unwrap();
        assert_eq!(stored.rnc_number, "2026-001");
        assert_eq!(stored.fields, case);
    }

    #[tokio::test]
    async fn test_reported_date_does_not_pick_the_year() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(2026));
        // Reported in 2025, submitted in 2026.
        let case = fixtures::sample_case("late report");
        let allocation = allocator.allocate_and_insert(&case).await.unwrap();
        assert_eq!(allocation.rnc_number.to_string(), "2026-001");
    }

    #[tokio::test]
    async fn test_conflict_burns_number_and_retries() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(2025));
        store.force_conflicts(2);

        let allocation = allocator
            .allocate_and_insert(&fixtures::sample_case("x"))
            .await
            .unwrap();
        assert_eq!(allocation.attempts, 3);
        assert_eq!(allocation.rnc_number.to_string(), "2025-003");
        assert_eq!(store.counter_get(2025).await.unwrap().unwrap().last_seq, 3);
        assert_eq!(store.case_count().await, 1);
    }

    #[tokio::test]
    async fn test_counter_lifts_over_imported_numbers() {
        let store = fixtures::store_with_legacy(&["2025-001", "2025-002", "2025-007"]).await;
        let allocator = allocator_on(&store, fixtures::clock_in(2025));

        // Counter starts empty; the floor scan still lifts it over 7.
        let allocation = allocator
            .allocate_and_insert(&fixtures::sample_case("x"))
            .await
            .unwrap();
        assert_eq!(allocation.rnc_number.to_string(), "2025-008");
        assert_eq!(allocation.attempts, 1);

        let next = allocator
            .allocate_and_insert(&fixtures::sample_case("y"))
            .await
            .unwrap();
        assert_eq!(next.rnc_number.to_string(), "2025-009");
        assert_eq!(next.attempts, 1);
    }

    #[tokio::test]
    async fn test_gapped_legacy_numbers_are_not_backfilled() {
        let store = fixtures::store_with_legacy(&["2025-003", "2025-007"]).await;
        let allocator = allocator_on(&store, fixtures::clock_in(2025));

        let preview = allocator.preview_current().await.unwrap();
        let allocation = allocator
            .allocate_and_insert(&fixtures::sample_case("x"))
            .await
            .unwrap();
        assert_eq!(preview.to_string(), "2025-008");
        assert_eq!(allocation.rnc_number, preview);
        assert_eq!(allocation.attempts, 1);
    }

    #[tokio::test]
    async fn test_malformed_legacy_values_are_skipped() {
        let store =
            fixtures::store_with_legacy(&["2025-001", "2025-abc", "2025-", "2025-12x"]).await;
        let allocator = allocator_on(&store, fixtures::clock_in(2025));
        let allocation = allocator
            .allocate_and_insert(&fixtures::sample_case("x"))
            .await
            .unwrap();
        assert_eq!(allocation.rnc_number.to_string(), "2025-002");
    }

    #[tokio::test]
    async fn test_exhaustion_leaves_no_record() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(2025));
        store.force_conflicts(u32::MAX);

        let err = allocator
            .allocate_and_insert(&fixtures::sample_case("x"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RncError::Allocation(AllocationError::Exhausted {
                year: 2025,
                attempts: AllocatorConfig::MIN_ATTEMPTS,
            })
        );
        assert_eq!(store.case_count().await, 0);
        // Every attempt burned its number.
        assert_eq!(
            store.counter_get(2025).await.unwrap().unwrap().last_seq,
            i64::from(AllocatorConfig::MIN_ATTEMPTS)
        );
    }

    #[tokio::test]
    async fn test_transient_failure_rolls_back_and_retries() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(2025));
        store.force_transient_failures(3);

        let allocation = allocator
            .allocate_and_insert(&fixtures::sample_case("x"))
            .await
            .unwrap();
        assert_eq!(allocation.attempts, 4);
        // Rolled-back attempts do not burn numbers.
        assert_eq!(allocation.rnc_number.to_string(), "2025-001");
        assert_eq!(store.units_begun(), 4);
    }

    #[tokio::test]
    async fn test_year_out_of_range_is_rejected() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(10_000));

        let err = allocator
            .allocate_and_insert(&NewCase::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RncError::Validation(ValidationError::InvalidRncNumber { .. })
        ));
        assert!(store.counter_get(10_000).await.unwrap().is_none());
        assert_eq!(store.units_begun(), 0);
    }

    #[tokio::test]
    async fn test_preview_does_not_touch_counter() {
        let store = fixtures::store_with_legacy(&["2025-004"]).await;
        let allocator = allocator_on(&store, fixtures::clock_in(2025));

        assert_eq!(allocator.preview_current().await.unwrap().to_string(), "2025-005");
        assert_eq!(allocator.preview_next(2025).await.unwrap().to_string(), "2025-005");
        assert_eq!(allocator.preview_next(2030).await.unwrap().to_string(), "2030-001");
        assert!(store.counter_get(2025).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_preview_matches_next_allocation() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(2025));
        for _ in 0..3 {
            let preview = allocator.preview_current().await.unwrap();
            let allocation = allocator
                .allocate_and_insert(&fixtures::sample_case("x"))
                .await
                .unwrap();
            assert_eq!(preview, allocation.rnc_number);
        }
    }

    #[tokio::test]
    async fn test_requested_number_honored_when_free() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(2025));

        let imported = allocator
            .insert_with_requested_number(Some(" 2024-123 "), &fixtures::sample_case("x"))
            .await
            .unwrap();
        assert_eq!(imported.rnc_number, "2024-123");
        assert!(!imported.auto_numbered);
        // Numbers of other years leave every counter alone.
        assert!(store.counter_get(2024).await.unwrap().is_none());
        assert!(store.counter_get(2025).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_requested_number_raises_current_counter() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(2025));

        let imported = allocator
            .insert_with_requested_number(Some("2025-040"), &fixtures::sample_case("x"))
            .await
            .unwrap();
        assert_eq!(imported.rnc_number, "2025-040");
        assert_eq!(store.counter_get(2025).await.unwrap().unwrap().last_seq, 40);

        let preview = allocator.preview_current().await.unwrap();
        let allocation = allocator
            .allocate_and_insert(&fixtures::sample_case("y"))
            .await
            .unwrap();
        assert_eq!(preview.to_string(), "2025-041");
        assert_eq!(allocation.rnc_number, preview);
        assert_eq!(allocation.attempts, 1);
    }

    #[tokio::test]
    async fn test_requested_number_below_counter_keeps_counter() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(2025));
        for _ in 0..3 {
            allocator
                .allocate_and_insert(&fixtures::sample_case("x"))
                .await
                .unwrap();
        }

        allocator
            .insert_with_requested_number(Some("2025-010"), &fixtures::sample_case("high"))
            .await
            .unwrap();
        allocator
            .insert_with_requested_number(Some("2025-005"), &fixtures::sample_case("low"))
            .await
            .unwrap();
        assert_eq!(store.counter_get(2025).await.unwrap().unwrap().last_seq, 10);
    }

    #[tokio::test]
    async fn test_requested_number_taken_falls_back() {
        let store = fixtures::store_with_legacy(&["2025-001"]).await;
        let allocator = allocator_on(&store, fixtures::clock_in(2025));

        let imported = allocator
            .insert_with_requested_number(Some("2025-001"), &fixtures::sample_case("x"))
            .await
            .unwrap();
        assert!(imported.auto_numbered);
        assert_eq!(imported.rnc_number, "2025-002");
        assert_eq!(store.case_count().await, 2);
    }

    #[tokio::test]
    async fn test_blank_requested_number_allocates() {
        let store = InMemoryStore::new();
        let allocator = allocator_on(&store, fixtures::clock_in(2025));

        for requested in [None, Some(""), Some("   ")] {
            let imported = allocator
                .insert_with_requested_number(requested, &fixtures::sample_case("x"))
                .await
                .unwrap();
            assert!(imported.auto_numbered);
        }
        assert_eq!(store.case_count().await, 3);
    }

    #[tokio::test]
    async fn test_unexpected_store_error_propagates_without_retry() {
        let inner = InMemoryStore::new();
        let store = Arc::new(BrokenCounterStore {
            inner: inner.clone(),
        });
        let allocator = RncAllocator::new(
            store,
            fixtures::clock_in(2025),
            fixtures::fast_allocator_config(),
        );

        let err = allocator
            .allocate_and_insert(&fixtures::sample_case("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, RncError::Storage(StorageError::Backend { .. })));
        assert_eq!(inner.units_begun(), 1);
        assert_eq!(inner.case_count().await, 0);
    }

    #[test]
    fn test_saturating_i64() {
        assert_eq!(saturating_i64(7), 7);
        assert_eq!(saturating_i64(u64::MAX), i64::MAX - 1);
    }

    #[test]
    fn test_pause_includes_jitter_bound() {
        let allocator = RncAllocator::new(
            Arc::new(InMemoryStore::new()),
            fixtures::clock_in(2025),
            AllocatorConfig::default(),
        );
        let config = AllocatorConfig::default();
        for attempt in 1..5 {
            let pause = allocator.pause_after(attempt);
            assert!(pause >= config.backoff_for(attempt));
            assert!(pause <= config.backoff_for(attempt) + config.jitter);
        }
    }

    #[test]
    fn test_jitter_beyond_u64_millis_saturates() {
        // 2^64 ms: an `as u64` cast would wrap this to zero.
        let config = AllocatorConfig {
            jitter: Duration::new(18_446_744_073_709_551, 616_000_000),
            ..AllocatorConfig::without_pauses(AllocatorConfig::MIN_ATTEMPTS)
        };
        let allocator = RncAllocator::new(
            Arc::new(InMemoryStore::new()),
            fixtures::clock_in(2025),
            config,
        );
        let pauses: Vec<Duration> = (1..4).map(|attempt| allocator.pause_after(attempt)).collect();
        assert!(pauses.iter().any(|pause| !pause.is_zero()));
        assert!(pauses.iter().all(|pause| *pause <= Duration::from_millis(u64::MAX)));
    }

    /// Store whose counter upsert always fails with a non-transient error.
    struct BrokenCounterStore {
        inner: InMemoryStore,
    }

    struct BrokenUnit(Box<dyn CaseUnitOfWork>);

    #[async_trait::async_trait]
    impl CaseUnitOfWork for BrokenUnit {
        async fn advance_counter(&mut self, _year: i32, _floor: i64) -> RncResult<i64> {
            Err(StorageError::backend("advance_counter", "relation does not exist").into())
        }

        async fn raise_counter(&mut self, year: i32, at_least: i64) -> RncResult<()> {
            self.0.raise_counter(year, at_least).await
        }

        async fn insert_case_if_absent(
            &mut self,
            rnc_number: &str,
            case: &NewCase,
        ) -> RncResult<Option<CaseId>> {
            self.0.insert_case_if_absent(rnc_number, case).await
        }

        async fn commit(&mut self) -> RncResult<()> {
            self.0.commit().await
        }

        async fn rollback(&mut self) -> RncResult<()> {
            self.0.rollback().await
        }
    }

    #[async_trait::async_trait]
    impl CaseStore for BrokenCounterStore {
        fn backend(&self) -> rnc_storage::BackendKind {
            self.inner.backend()
        }

        fn capabilities(&self) -> rnc_storage::StoreCapabilities {
            self.inner.capabilities()
        }

        async fn begin(&self) -> RncResult<Box<dyn CaseUnitOfWork>> {
            Ok(Box::new(BrokenUnit(self.inner.begin().await?)))
        }

        async fn rnc_numbers_with_prefix(&self, prefix: &str) -> RncResult<Vec<String>> {
            self.inner.rnc_numbers_with_prefix(prefix).await
        }

        async fn counter_get(&self, year: i32) -> RncResult<Option<rnc_core::YearCounter>> {
            self.inner.counter_get(year).await
        }

        async fn case_get(&self, id: CaseId) -> RncResult<Option<rnc_core::CaseRecord>> {
            self.inner.case_get(id).await
        }

        async fn case_list(&self) -> RncResult<Vec<rnc_core::CaseRecord>> {
            self.inner.case_list().await
        }

        async fn case_update(&self, id: CaseId, update: &rnc_core::CaseUpdate) -> RncResult<()> {
            self.inner.case_update(id, update).await
        }

        async fn case_delete(&self, id: CaseId) -> RncResult<()> {
            self.inner.case_delete(id).await
        }

        async fn pep_insert(&self, code: &str) -> RncResult<rnc_storage::InsertOutcome> {
            self.inner.pep_insert(code).await
        }

        async fn pep_list(&self) -> RncResult<Vec<String>> {
            self.inner.pep_list().await
        }
    }
}
