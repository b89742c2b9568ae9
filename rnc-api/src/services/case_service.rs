//! Case Service
//!
//! Opening, reading and walking cases through their lifecycle. Transition
//! rules live on [`CaseRecord`]; this module loads the case, asks it for the
//! update, and persists the result. None of these functions touch the RNC
//! number of an existing case.

use rnc_allocator::{Allocation, RncAllocator};
use rnc_core::{
    CancelCase, CaseId, CaseRecord, CloseCase, EntityKind, NewCase, ReopenCase, RncResult,
    StorageError, ValidationError, WallClock,
};
use rnc_storage::CaseStore;

use crate::auth::QualityAccess;

/// Word that must be typed to delete a case.
pub const DELETE_CONFIRMATION: &str = "CONFIRMAR";

/// Open a new case under the next number of the current year.
#[tracing::instrument(skip(allocator, _access, case))]
pub async fn create_case(
    allocator: &RncAllocator,
    _access: &QualityAccess,
    case: &NewCase,
) -> RncResult<Allocation> {
    let allocation = allocator.allocate_and_insert(case).await?;
    tracing::info!(
        case_id = %allocation.case_id,
        rnc_number = %allocation.rnc_number,
        attempts = allocation.attempts,
        "Case opened"
    );
    Ok(allocation)
}

/// Load a case or fail with `NotFound`.
pub async fn get_case(store: &dyn CaseStore, id: CaseId) -> RncResult<CaseRecord> {
    store
        .case_get(id)
        .await?
        .ok_or_else(|| StorageError::not_found(EntityKind::Case, id).into())
}

/// Every case, newest first.
pub async fn list_cases(store: &dyn CaseStore) -> RncResult<Vec<CaseRecord>> {
    store.case_list().await
}

/// Close an `Open` or `Reopened` case.
#[tracing::instrument(skip(store, clock, _access, request))]
pub async fn close_case(
    store: &dyn CaseStore,
    clock: &dyn WallClock,
    _access: &QualityAccess,
    id: CaseId,
    request: CloseCase,
) -> RncResult<CaseRecord> {
    require_actor(&request.by, "closed_by")?;
    let mut case = get_case(store, id).await?;
    let update = case.plan_close(request, clock.now())?;
    store.case_update(id, &update).await?;
    case.apply(&update);
    tracing::info!(rnc_number = %case.rnc_number, "Case closed");
    Ok(case)
}

/// Reopen a `Closed` case. The earlier closure stays on record.
#[tracing::instrument(skip(store, clock, _access, request))]
pub async fn reopen_case(
    store: &dyn CaseStore,
    clock: &dyn WallClock,
    _access: &QualityAccess,
    id: CaseId,
    request: ReopenCase,
) -> RncResult<CaseRecord> {
    require_actor(&request.by, "reopened_by")?;
    let mut case = get_case(store, id).await?;
    let update = case.plan_reopen(request, clock.now())?;
    store.case_update(id, &update).await?;
    case.apply(&update);
    tracing::info!(rnc_number = %case.rnc_number, "Case reopened");
    Ok(case)
}

/// Cancel a case in any status but `Cancelled`.
#[tracing::instrument(skip(store, clock, _access, request))]
pub async fn cancel_case(
    store: &dyn CaseStore,
    clock: &dyn WallClock,
    _access: &QualityAccess,
    id: CaseId,
    request: CancelCase,
) -> RncResult<CaseRecord> {
    require_actor(&request.by, "cancelled_by")?;
    let mut case = get_case(store, id).await?;
    let update = case.plan_cancel(request, clock.now())?;
    store.case_update(id, &update).await?;
    case.apply(&update);
    tracing::info!(rnc_number = %case.rnc_number, "Case cancelled");
    Ok(case)
}

/// Hard-delete a case. `confirmation` must be [`DELETE_CONFIRMATION`],
/// compared trimmed and case-insensitively.
#[tracing::instrument(skip(store, _access))]
pub async fn delete_case(
    store: &dyn CaseStore,
    _access: &QualityAccess,
    id: CaseId,
    confirmation: &str,
) -> RncResult<()> {
    if !confirmation.trim().eq_ignore_ascii_case(DELETE_CONFIRMATION) {
        return Err(ValidationError::ConfirmationMismatch {
            expected: DELETE_CONFIRMATION,
        }
        .into());
    }
    store.case_delete(id).await?;
    tracing::warn!("Case deleted");
    Ok(())
}

fn require_actor(by: &str, field: &str) -> RncResult<()> {
    if by.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::QualityGate;
    use rnc_core::{CaseStatus, FixedClock, RncError};
    use rnc_storage::InMemoryStore;
    use std::sync::Arc;

    fn access() -> QualityAccess {
        QualityGate::with_password("q").authenticate("q").unwrap()
    }

    fn setup() -> (Arc<InMemoryStore>, Arc<FixedClock>, RncAllocator) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::at_year(2025));
        let allocator = RncAllocator::new(
            store.clone(),
            clock.clone(),
            rnc_core::AllocatorConfig::without_pauses(rnc_core::AllocatorConfig::MIN_ATTEMPTS),
        );
        (store, clock, allocator)
    }

    fn close_request() -> CloseCase {
        CloseCase {
            by: "qa".to_string(),
            notes: "ok".to_string(),
            description: "done".to_string(),
            effectiveness: rnc_core::Effectiveness::Effective,
        }
    }

    #[tokio::test]
    async fn test_create_then_close_keeps_number() {
        let (store, clock, allocator) = setup();
        let allocation = create_case(&allocator, &access(), &NewCase::default()).await.unwrap();

        let closed = close_case(
            store.as_ref(),
            clock.as_ref(),
            &access(),
            allocation.case_id,
            close_request(),
        )
        .await
        .unwrap();

        assert_eq!(closed.status, CaseStatus::Closed);
        assert_eq!(closed.rnc_number, "2025-001");
        assert_eq!(closed.closure.as_ref().unwrap().at, clock.now());
        assert_eq!(get_case(store.as_ref(), allocation.case_id).await.unwrap(), closed);
    }

    #[tokio::test]
    async fn test_close_requires_actor() {
        let (store, clock, allocator) = setup();
        let allocation = create_case(&allocator, &access(), &NewCase::default()).await.unwrap();
        let request = CloseCase {
            by: "  ".to_string(),
            ..close_request()
        };

        let result = close_case(
            store.as_ref(),
            clock.as_ref(),
            &access(),
            allocation.case_id,
            request,
        )
        .await;
        assert!(matches!(
            result,
            Err(RncError::Validation(ValidationError::RequiredFieldMissing { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_confirmation_word() {
        let (store, _clock, allocator) = setup();
        let allocation = create_case(&allocator, &access(), &NewCase::default()).await.unwrap();

        let result = delete_case(store.as_ref(), &access(), allocation.case_id, "sim").await;
        assert!(matches!(
            result,
            Err(RncError::Validation(ValidationError::ConfirmationMismatch { .. }))
        ));
        assert!(store.case_get(allocation.case_id).await.unwrap().is_some());

        delete_case(store.as_ref(), &access(), allocation.case_id, " confirmar ")
            .await
            .unwrap();
        assert!(store.case_get(allocation.case_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_missing_case() {
        let (store, _clock, _allocator) = setup();
        let result = get_case(store.as_ref(), CaseId::new(77)).await;
        assert!(matches!(
            result,
            Err(RncError::Storage(StorageError::NotFound {
                entity: EntityKind::Case,
                ..
            }))
        ));
    }
}
