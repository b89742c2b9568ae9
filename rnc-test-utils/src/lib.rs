//! RNC Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Proptest generators for cases and identifiers
//! - Fixtures for common scenarios
//! - Assertions for RNC-specific checks

// Re-export the in-memory store from its source crate
pub use rnc_storage::InMemoryStore;

// Re-export core types for convenience
pub use rnc_core::{
    legacy_suffix, AllocatorConfig, CancelCase, CaseId, CaseRecord, CaseStatus, CaseUpdate, CloseCase,
    Effectiveness, EntityKind, FixedClock, NewCase, ReopenCase, RncError, RncNumber, RncResult,
    StorageError, Timestamp, ValidationError, WallClock,
};

use chrono::NaiveDate;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for RNC types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Timestamp between 2020 and 2030, whole seconds.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .unwrap_or_default()
        })
    }

    /// Generate a plausible RNC number for `year`.
    pub fn arb_rnc_number(year: i32) -> impl Strategy<Value = RncNumber> {
        (1i64..5000).prop_map(move |seq| {
            RncNumber::new(year, seq).unwrap_or_else(|_| panic!("invalid year {}", year))
        })
    }

    /// Values found in the `rnc_number` column of imported data: canonical
    /// numbers, extra zeros, other years, and free text.
    pub fn arb_legacy_rnc_value(year: i32) -> impl Strategy<Value = String> {
        prop_oneof![
            (1u64..2000).prop_map(move |n| format!("{:04}-{:03}", year, n)),
            (1u64..2000).prop_map(move |n| format!(" {:04}-{:06} ", year, n)),
            (1u64..2000).prop_map(move |n| format!("{:04}-{:03}", year - 1, n)),
            "[A-Za-z ]{1,12}",
            Just(format!("{:04}-", year)),
            "[0-9]{1,3}[a-z]".prop_map(move |s| format!("{:04}-{}", year, s)),
        ]
    }

    pub fn arb_case_status() -> impl Strategy<Value = CaseStatus> {
        prop_oneof![
            Just(CaseStatus::Open),
            Just(CaseStatus::Closed),
            Just(CaseStatus::Reopened),
            Just(CaseStatus::Cancelled),
        ]
    }

    fn arb_text() -> impl Strategy<Value = Option<String>> {
        prop::option::of("[A-Za-z0-9 ,.;-]{1,40}")
    }

    /// Generate a NewCase with a random mix of filled fields.
    pub fn arb_new_case() -> impl Strategy<Value = NewCase> {
        (
            prop::option::of(arb_timestamp()),
            arb_text(),
            arb_text(),
            prop::option::of("[A-Z]{1,3}-[0-9]{3}"),
            arb_text(),
            arb_text(),
            (arb_text(), arb_text(), arb_text(), arb_text()),
        )
            .prop_map(
                |(reported_at, issuer, area, pep, title, description, (causer, process, origin, severity))| {
                    NewCase {
                        reported_at,
                        issuer,
                        area,
                        pep,
                        title,
                        description,
                        references: None,
                        causer,
                        process,
                        origin,
                        severity,
                        category: None,
                    }
                },
            )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;
    use std::sync::Arc;

    /// Password configured on test quality gates.
    pub const QUALITY_PASSWORD: &str = "qualidade-teste";

    /// A fixed local time inside `year`.
    pub fn timestamp_in(year: i32) -> Timestamp {
        NaiveDate::from_ymd_opt(year, 3, 14)
            .and_then(|date| date.and_hms_opt(9, 30, 0))
            .unwrap_or_default()
    }

    /// Clock pinned to `year`, shared the way the allocator takes it.
    pub fn clock_in(year: i32) -> Arc<FixedClock> {
        Arc::new(FixedClock::at_year(year))
    }

    /// Allocator policy without pauses, for tests that drive many attempts.
    pub fn fast_allocator_config() -> AllocatorConfig {
        AllocatorConfig::without_pauses(AllocatorConfig::MIN_ATTEMPTS)
    }

    /// A small filled-in case.
    pub fn sample_case(title: &str) -> NewCase {
        NewCase {
            reported_at: Some(timestamp_in(2025)),
            issuer: Some("inspector".to_string()),
            area: Some("Assembly".to_string()),
            pep: Some("P-100".to_string()),
            title: Some(title.to_string()),
            description: Some("Weld bead out of tolerance".to_string()),
            severity: Some("Major".to_string()),
            ..Default::default()
        }
    }

    pub fn close_request() -> CloseCase {
        CloseCase {
            by: "qa.lead".to_string(),
            notes: "Rework done".to_string(),
            description: "Part reworked and re-inspected".to_string(),
            effectiveness: Effectiveness::Effective,
        }
    }

    pub fn reopen_request() -> ReopenCase {
        ReopenCase {
            by: "qa.lead".to_string(),
            reason: "Defect recurred".to_string(),
            description: "Found again at final inspection".to_string(),
        }
    }

    pub fn cancel_request() -> CancelCase {
        CancelCase {
            by: "qa.lead".to_string(),
            reason: "Opened by mistake".to_string(),
        }
    }

    /// Store pre-loaded with `rnc_number` values that bypassed the counter.
    pub async fn store_with_legacy(numbers: &[&str]) -> InMemoryStore {
        let store = InMemoryStore::new();
        for number in numbers {
            store
                .seed_case(number, sample_case("legacy"))
                .await
                .unwrap_or_else(|| panic!("duplicate legacy number {}", number));
        }
        store
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for RNC-specific validation.

    use super::*;
    use std::collections::HashSet;

    /// Assert that an RncResult is a NotFound storage error for `entity`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &RncResult<T>, entity: EntityKind) {
        match result {
            Err(RncError::Storage(StorageError::NotFound { entity: e, .. })) => {
                assert_eq!(*e, entity, "Wrong entity in NotFound error");
            }
            other => panic!("Expected NotFound error for {}, got: {:?}", entity, other),
        }
    }

    /// Assert that an RncResult is an InvalidTransition validation error.
    #[track_caller]
    pub fn assert_invalid_transition<T: std::fmt::Debug>(result: &RncResult<T>) {
        match result {
            Err(RncError::Validation(ValidationError::InvalidTransition { .. })) => {}
            other => panic!("Expected InvalidTransition error, got: {:?}", other),
        }
    }

    /// Assert that every number is distinct.
    #[track_caller]
    pub fn assert_all_distinct(numbers: &[RncNumber]) {
        let unique: HashSet<&RncNumber> = numbers.iter().collect();
        assert_eq!(
            unique.len(),
            numbers.len(),
            "Duplicate RNC numbers in {:?}",
            numbers
        );
    }

    /// Assert that every number belongs to `year`.
    #[track_caller]
    pub fn assert_all_in_year(numbers: &[RncNumber], year: i32) {
        for number in numbers {
            assert_eq!(number.year(), year, "{} is not in year {}", number, year);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
