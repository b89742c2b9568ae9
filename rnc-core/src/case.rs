//! Case records and their lifecycle.
//!
//! ```text
//! Open ── close ──→ Closed ── reopen ──→ Reopened ── close ──→ Closed ...
//!   │                  │                     │
//!   └──── cancel ──────┴────── cancel ───────┴──→ Cancelled
//! ```
//!
//! Hard deletion is allowed from any state. No transition touches
//! `rnc_number`: [`CaseUpdate`] has no field that could carry it.

use crate::{CaseId, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle status of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Open,
    Closed,
    Reopened,
    Cancelled,
}

impl CaseStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            CaseStatus::Open => "open",
            CaseStatus::Closed => "closed",
            CaseStatus::Reopened => "reopened",
            CaseStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    ///
    /// Older exports used the labels shown in the form (`Aberta`,
    /// `Encerrada`, `Em ação`, `Cancelada`); those still parse.
    pub fn from_db_str(s: &str) -> Result<Self, CaseStatusParseError> {
        match s.trim().to_lowercase().as_str() {
            "open" | "aberta" => Ok(CaseStatus::Open),
            "closed" | "encerrada" => Ok(CaseStatus::Closed),
            "reopened" | "em ação" | "em acao" | "reaberta" => Ok(CaseStatus::Reopened),
            "cancelled" | "canceled" | "cancelada" => Ok(CaseStatus::Cancelled),
            _ => Err(CaseStatusParseError(s.to_string())),
        }
    }

    pub fn can_close(&self) -> bool {
        matches!(self, CaseStatus::Open | CaseStatus::Reopened)
    }

    pub fn can_reopen(&self) -> bool {
        matches!(self, CaseStatus::Closed)
    }

    pub fn can_cancel(&self) -> bool {
        !matches!(self, CaseStatus::Cancelled)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for CaseStatus {
    type Err = CaseStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid case status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseStatusParseError(pub String);

impl fmt::Display for CaseStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid case status: {}", self.0)
    }
}

impl std::error::Error for CaseStatusParseError {}

/// Outcome recorded when a case is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effectiveness {
    #[default]
    Pending,
    Effective,
    NotEffective,
}

impl Effectiveness {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Effectiveness::Pending => "pending",
            Effectiveness::Effective => "effective",
            Effectiveness::NotEffective => "not_effective",
        }
    }

    /// Unknown values read back as `Pending`.
    pub fn from_db_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "effective" | "eficaz" => Effectiveness::Effective,
            "not_effective" | "não eficaz" | "nao eficaz" => Effectiveness::NotEffective,
            _ => Effectiveness::Pending,
        }
    }
}

impl fmt::Display for Effectiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// User-supplied fields of a case, as submitted by the form or a CSV row.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewCase {
    pub reported_at: Option<Timestamp>,
    pub issuer: Option<String>,
    pub area: Option<String>,
    pub pep: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub references: Option<String>,
    pub causer: Option<String>,
    pub process: Option<String>,
    pub origin: Option<String>,
    pub severity: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closure {
    pub at: Timestamp,
    pub by: String,
    pub notes: String,
    pub description: String,
    pub effectiveness: Effectiveness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reopening {
    pub at: Timestamp,
    pub by: String,
    pub reason: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub at: Timestamp,
    pub by: String,
    pub reason: String,
}

/// A stored case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: CaseId,
    /// Free text for imported legacy rows, `YYYY-NNN` for allocated ones.
    pub rnc_number: String,
    #[serde(flatten)]
    pub fields: NewCase,
    pub responsible: Option<String>,
    pub actions: Option<String>,
    pub action_owner: Option<String>,
    pub status: CaseStatus,
    pub closure: Option<Closure>,
    pub reopening: Option<Reopening>,
    pub cancellation: Option<Cancellation>,
}

impl CaseRecord {
    /// A freshly inserted case.
    pub fn opened(id: CaseId, rnc_number: impl Into<String>, fields: NewCase) -> Self {
        Self {
            id,
            rnc_number: rnc_number.into(),
            fields,
            responsible: None,
            actions: None,
            action_owner: None,
            status: CaseStatus::Open,
            closure: None,
            reopening: None,
            cancellation: None,
        }
    }

    pub fn plan_close(&self, req: CloseCase, at: Timestamp) -> Result<CaseUpdate, ValidationError> {
        if !self.status.can_close() {
            return Err(ValidationError::InvalidTransition {
                from: self.status,
                action: "close",
            });
        }
        Ok(CaseUpdate {
            closure: Some(Closure {
                at,
                by: req.by,
                notes: req.notes,
                description: req.description,
                effectiveness: req.effectiveness,
            }),
            ..CaseUpdate::status_only(CaseStatus::Closed)
        })
    }

    pub fn plan_reopen(
        &self,
        req: ReopenCase,
        at: Timestamp,
    ) -> Result<CaseUpdate, ValidationError> {
        if !self.status.can_reopen() {
            return Err(ValidationError::InvalidTransition {
                from: self.status,
                action: "reopen",
            });
        }
        Ok(CaseUpdate {
            reopening: Some(Reopening {
                at,
                by: req.by,
                reason: req.reason,
                description: req.description,
            }),
            ..CaseUpdate::status_only(CaseStatus::Reopened)
        })
    }

    pub fn plan_cancel(
        &self,
        req: CancelCase,
        at: Timestamp,
    ) -> Result<CaseUpdate, ValidationError> {
        if !self.status.can_cancel() {
            return Err(ValidationError::InvalidTransition {
                from: self.status,
                action: "cancel",
            });
        }
        Ok(CaseUpdate {
            cancellation: Some(Cancellation {
                at,
                by: req.by,
                reason: req.reason,
            }),
            ..CaseUpdate::status_only(CaseStatus::Cancelled)
        })
    }

    /// Apply an update in place. Sections left `None` keep their value.
    pub fn apply(&mut self, update: &CaseUpdate) {
        self.status = update.status;
        if let Some(closure) = &update.closure {
            self.closure = Some(closure.clone());
        }
        if let Some(reopening) = &update.reopening {
            self.reopening = Some(reopening.clone());
        }
        if let Some(cancellation) = &update.cancellation {
            self.cancellation = Some(cancellation.clone());
        }
    }
}

// ============================================================================
// LIFECYCLE REQUESTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CloseCase {
    pub by: String,
    pub notes: String,
    pub description: String,
    pub effectiveness: Effectiveness,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReopenCase {
    pub by: String,
    pub reason: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CancelCase {
    pub by: String,
    pub reason: String,
}

/// Lifecycle change persisted by `case_update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseUpdate {
    pub status: CaseStatus,
    pub closure: Option<Closure>,
    pub reopening: Option<Reopening>,
    pub cancellation: Option<Cancellation>,
}

impl CaseUpdate {
    pub fn status_only(status: CaseStatus) -> Self {
        Self {
            status,
            closure: None,
            reopening: None,
            cancellation: None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> Timestamp {
        NaiveDate::from_ymd_opt(2025, 3, 14)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn open_case() -> CaseRecord {
        CaseRecord::opened(
            CaseId::new(1),
            "2025-001",
            NewCase {
                title: Some("Belt misaligned".to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_status_db_roundtrip() {
        for status in [
            CaseStatus::Open,
            CaseStatus::Closed,
            CaseStatus::Reopened,
            CaseStatus::Cancelled,
        ] {
            assert_eq!(CaseStatus::from_db_str(status.as_db_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_status_accepts_legacy_labels() {
        assert_eq!("Aberta".parse::<CaseStatus>().unwrap(), CaseStatus::Open);
        assert_eq!("Encerrada".parse::<CaseStatus>().unwrap(), CaseStatus::Closed);
        assert_eq!("Em ação".parse::<CaseStatus>().unwrap(), CaseStatus::Reopened);
        assert_eq!("Cancelada".parse::<CaseStatus>().unwrap(), CaseStatus::Cancelled);
        assert!("Pendente".parse::<CaseStatus>().is_err());
    }

    #[test]
    fn test_effectiveness_parsing() {
        assert_eq!(Effectiveness::from_db_str("Eficaz"), Effectiveness::Effective);
        assert_eq!(
            Effectiveness::from_db_str("not_effective"),
            Effectiveness::NotEffective
        );
        assert_eq!(Effectiveness::from_db_str("A verificar"), Effectiveness::Pending);
    }

    #[test]
    fn test_close_reopen_close_keeps_number() {
        let mut case = open_case();

        let update = case
            .plan_close(
                CloseCase {
                    by: "qa".to_string(),
                    effectiveness: Effectiveness::Effective,
                    ..Default::default()
                },
                at(),
            )
            .unwrap();
        case.apply(&update);
        assert_eq!(case.status, CaseStatus::Closed);
        assert_eq!(case.closure.as_ref().unwrap().by, "qa");

        let update = case
            .plan_reopen(
                ReopenCase {
                    by: "qa".to_string(),
                    reason: "recurred".to_string(),
                    ..Default::default()
                },
                at(),
            )
            .unwrap();
        case.apply(&update);
        assert_eq!(case.status, CaseStatus::Reopened);
        assert!(case.closure.is_some(), "reopen keeps the earlier closure");

        let update = case.plan_close(CloseCase::default(), at()).unwrap();
        case.apply(&update);
        assert_eq!(case.status, CaseStatus::Closed);
        assert_eq!(case.rnc_number, "2025-001");
    }

    #[test]
    fn test_illegal_transitions() {
        let case = open_case();
        assert_eq!(
            case.plan_reopen(ReopenCase::default(), at()).unwrap_err(),
            ValidationError::InvalidTransition {
                from: CaseStatus::Open,
                action: "reopen",
            }
        );

        let mut cancelled = open_case();
        let update = cancelled.plan_cancel(CancelCase::default(), at()).unwrap();
        cancelled.apply(&update);
        assert!(cancelled.plan_close(CloseCase::default(), at()).is_err());
        assert!(cancelled.plan_cancel(CancelCase::default(), at()).is_err());
        assert!(cancelled.plan_reopen(ReopenCase::default(), at()).is_err());
    }

    #[test]
    fn test_closed_case_can_be_cancelled() {
        let mut case = open_case();
        let update = case.plan_close(CloseCase::default(), at()).unwrap();
        case.apply(&update);
        let update = case.plan_cancel(CancelCase::default(), at()).unwrap();
        case.apply(&update);
        assert_eq!(case.status, CaseStatus::Cancelled);
        assert!(case.cancellation.is_some());
    }
}
