//! Error types for RNC operations

use crate::CaseStatus;
use std::fmt;
use thiserror::Error;

/// Entity discriminator used in storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Case,
    YearCounter,
    Pep,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EntityKind::Case => "Case",
            EntityKind::YearCounter => "YearCounter",
            EntityKind::Pep => "Pep",
        };
        write!(f, "{}", value)
    }
}

/// Storage layer errors.
///
/// Backends classify driver failures into these variants. Only
/// [`StorageError::Transient`] is retried by the allocator; everything else
/// propagates to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: EntityKind, id: String },

    #[error("Transient failure during {operation}: {reason}")]
    Transient {
        operation: &'static str,
        reason: String,
    },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Storage operation {operation} failed: {reason}")]
    Backend {
        operation: &'static str,
        reason: String,
    },

    #[error("Schema bootstrap failed: {reason}")]
    Schema { reason: String },

    #[error("Unit of work already finished")]
    UnitOfWorkFinished,
}

impl StorageError {
    /// Contention or timeouts that a fresh attempt may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient { .. })
    }

    pub fn transient(operation: &'static str, reason: impl Into<String>) -> Self {
        StorageError::Transient {
            operation,
            reason: reason.into(),
        }
    }

    pub fn backend(operation: &'static str, reason: impl Into<String>) -> Self {
        StorageError::Backend {
            operation,
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: EntityKind, id: impl fmt::Display) -> Self {
        StorageError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid RNC number {value:?}: {reason}")]
    InvalidRncNumber { value: String, reason: String },

    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Cannot {action} a case in status {from}")]
    InvalidTransition {
        from: CaseStatus,
        action: &'static str,
    },

    #[error("Deletion not confirmed: type {expected} to delete")]
    ConfirmationMismatch { expected: &'static str },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Authentication errors raised by the quality gate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid quality password")]
    InvalidPassword,

    #[error("Quality access is not configured")]
    NotConfigured,
}

/// Allocation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Could not allocate a unique RNC number for {year} after {attempts} attempts")]
    Exhausted { year: i32, attempts: u32 },
}

/// Master error type for all RNC errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Allocation error: {0}")]
    Allocation(#[from] AllocationError),
}

impl RncError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RncError::Storage(err) if err.is_transient())
    }
}

/// Result type alias for RNC operations.
pub type RncResult<T> = Result<T, RncError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::not_found(EntityKind::Case, 17);
        let msg = format!("{}", err);
        assert!(msg.contains("Entity not found"));
        assert!(msg.contains("Case"));
        assert!(msg.contains("17"));
    }

    #[test]
    fn test_only_transient_storage_errors_are_transient() {
        assert!(StorageError::transient("advance_counter", "deadlock").is_transient());
        assert!(!StorageError::backend("advance_counter", "syntax error").is_transient());
        assert!(!StorageError::Unavailable {
            reason: "closed".to_string()
        }
        .is_transient());
        assert!(!StorageError::UnitOfWorkFinished.is_transient());
    }

    #[test]
    fn test_rnc_error_transient_passthrough() {
        let err = RncError::from(StorageError::transient("commit", "busy"));
        assert!(err.is_transient());
        let err = RncError::from(AllocationError::Exhausted {
            year: 2025,
            attempts: 20,
        });
        assert!(!err.is_transient());
    }

    #[test]
    fn test_allocation_error_display_exhausted() {
        let err = AllocationError::Exhausted {
            year: 2025,
            attempts: 20,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("2025"));
        assert!(msg.contains("20 attempts"));
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = ValidationError::InvalidTransition {
            from: CaseStatus::Cancelled,
            action: "close",
        };
        assert_eq!(format!("{}", err), "Cannot close a case in status cancelled");
    }

    #[test]
    fn test_rnc_error_from_variants() {
        let storage = RncError::from(StorageError::UnitOfWorkFinished);
        assert!(matches!(storage, RncError::Storage(_)));

        let validation = RncError::from(ValidationError::RequiredFieldMissing {
            field: "title".to_string(),
        });
        assert!(matches!(validation, RncError::Validation(_)));

        let config = RncError::from(ConfigError::MissingRequired {
            field: "RNC_DB_HOST".to_string(),
        });
        assert!(matches!(config, RncError::Config(_)));

        let auth = RncError::from(AuthError::InvalidPassword);
        assert!(matches!(auth, RncError::Auth(_)));
    }
}
