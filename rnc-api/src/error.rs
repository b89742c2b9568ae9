//! Error Types for the RNC front end
//!
//! This module defines error handling for the outer layer:
//! - ErrorCode enum for categorizing errors
//! - ApiError struct carried up to the command line
//! - Conversion from the core `RncError` taxonomy
//!
//! Every code maps to a process exit status from the BSD `sysexits` range.

use rnc_core::{RncError, StorageError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for front-end failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors
    // ========================================================================
    /// Quality password missing, wrong, or not configured
    Unauthorized,

    // ========================================================================
    // Validation Errors
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Lifecycle transition not allowed from the current status
    StateConflict,

    /// Destructive operation without the confirmation word
    ConfirmationRequired,

    // ========================================================================
    // Not Found Errors
    // ========================================================================
    /// Requested entity does not exist
    EntityNotFound,

    // ========================================================================
    // Server Errors
    // ========================================================================
    /// Retry budget spent without securing a unique number
    AllocationExhausted,

    /// Configuration could not be loaded
    ConfigError,

    /// Database operation failed
    DatabaseError,

    /// Store is unreachable or persistently contended
    ServiceUnavailable,

    /// Internal error
    InternalError,
}

impl ErrorCode {
    /// Process exit status for this error code.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::StateConflict
            | ErrorCode::ConfirmationRequired => 65,

            ErrorCode::EntityNotFound => 66,

            ErrorCode::ServiceUnavailable => 69,

            ErrorCode::InternalError => 70,

            ErrorCode::DatabaseError => 74,

            ErrorCode::AllocationExhausted => 75,

            ErrorCode::Unauthorized => 77,

            ErrorCode::ConfigError => 78,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error returned by every front-end operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.code.exit_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// A file the user named could not be read or written.
    pub fn file_error(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::new(
            ErrorCode::InvalidInput,
            format!("Cannot access {}: {}", path.display(), err),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// CONVERSIONS FROM CORE ERRORS
// ============================================================================

impl From<RncError> for ApiError {
    fn from(err: RncError) -> Self {
        match err {
            RncError::Storage(StorageError::NotFound { entity, id }) => {
                ApiError::entity_not_found(&entity.to_string(), id)
            }
            RncError::Storage(
                err @ (StorageError::Transient { .. } | StorageError::Unavailable { .. }),
            ) => {
                tracing::warn!(error = %err, "Store unavailable");
                ApiError::service_unavailable(err.to_string())
            }
            RncError::Storage(err) => {
                // Full driver detail stays in the log.
                tracing::error!(error = ?err, "Database error");
                ApiError::database_error(err.to_string())
            }
            RncError::Validation(err @ ValidationError::InvalidTransition { .. }) => {
                ApiError::state_conflict(err.to_string())
            }
            RncError::Validation(err @ ValidationError::ConfirmationMismatch { .. }) => {
                ApiError::new(ErrorCode::ConfirmationRequired, err.to_string())
            }
            RncError::Validation(err) => ApiError::new(ErrorCode::ValidationFailed, err.to_string()),
            RncError::Config(err) => ApiError::new(ErrorCode::ConfigError, err.to_string()),
            RncError::Auth(err) => ApiError::unauthorized(err.to_string()),
            RncError::Allocation(err) => {
                tracing::error!(error = %err, "Allocation exhausted");
                ApiError::new(ErrorCode::AllocationExhausted, err.to_string())
            }
        }
    }
}

impl From<rnc_core::ConfigError> for ApiError {
    fn from(err: rnc_core::ConfigError) -> Self {
        RncError::from(err).into()
    }
}

impl From<rnc_core::AuthError> for ApiError {
    fn from(err: rnc_core::AuthError) -> Self {
        RncError::from(err).into()
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::internal_error(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::internal_error(format!("JSON serialization failed: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for front-end operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rnc_core::{AllocationError, AuthError, CaseStatus, EntityKind};

    #[test]
    fn test_error_code_exit_mapping() {
        assert_eq!(ErrorCode::ValidationFailed.exit_code(), 65);
        assert_eq!(ErrorCode::EntityNotFound.exit_code(), 66);
        assert_eq!(ErrorCode::AllocationExhausted.exit_code(), 75);
        assert_eq!(ErrorCode::Unauthorized.exit_code(), 77);
        assert_eq!(ErrorCode::ConfigError.exit_code(), 78);
    }

    #[test]
    fn test_not_found_conversion() {
        let err: ApiError = RncError::from(StorageError::not_found(EntityKind::Case, 9)).into();
        assert_eq!(err.code, ErrorCode::EntityNotFound);
        assert!(err.message.contains("Case"));
        assert!(err.message.contains('9'));
    }

    #[test]
    fn test_validation_conversions() {
        let err: ApiError = RncError::from(ValidationError::InvalidTransition {
            from: CaseStatus::Cancelled,
            action: "close",
        })
        .into();
        assert_eq!(err.code, ErrorCode::StateConflict);

        let err: ApiError = RncError::from(ValidationError::ConfirmationMismatch {
            expected: "CONFIRMAR",
        })
        .into();
        assert_eq!(err.code, ErrorCode::ConfirmationRequired);
        assert!(err.message.contains("CONFIRMAR"));
    }

    #[test]
    fn test_storage_conversions() {
        let err: ApiError = RncError::from(StorageError::transient("commit", "busy")).into();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);

        let err: ApiError = RncError::from(StorageError::backend("insert", "syntax")).into();
        assert_eq!(err.code, ErrorCode::DatabaseError);
    }

    #[test]
    fn test_auth_and_allocation_conversions() {
        let err: ApiError = AuthError::InvalidPassword.into();
        assert_eq!(err.code, ErrorCode::Unauthorized);

        let err: ApiError = RncError::from(AllocationError::Exhausted {
            year: 2025,
            attempts: 10,
        })
        .into();
        assert_eq!(err.code, ErrorCode::AllocationExhausted);
        assert!(err.message.contains("2025"));
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::unauthorized("Invalid quality password");
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("UNAUTHORIZED"));
        assert!(json.contains("Invalid quality password"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_display_and_exit_code() {
        let err = ApiError::invalid_input("Bad row");
        assert_eq!(format!("{}", err), "InvalidInput: Bad row");
        assert_eq!(err.exit_code(), 65);
    }
}
