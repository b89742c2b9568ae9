//! Table definitions and the row shape shared by both SQL backends.

use chrono::NaiveDateTime;
use rnc_core::{
    Cancellation, CaseId, CaseRecord, CaseStatus, Closure, Effectiveness, NewCase, Reopening,
    RncResult, StorageError,
};

pub const POSTGRES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rnc_year_counters (
    year INTEGER PRIMARY KEY,
    last_seq BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS rnc_cases (
    id BIGSERIAL PRIMARY KEY,
    rnc_number TEXT NOT NULL,
    reported_at TIMESTAMP,
    issuer TEXT,
    area TEXT,
    pep TEXT,
    title TEXT,
    responsible TEXT,
    description TEXT,
    case_references TEXT,
    causer TEXT,
    process TEXT,
    origin TEXT,
    severity TEXT,
    category TEXT,
    actions TEXT,
    action_owner TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    closed_at TIMESTAMP,
    closed_by TEXT,
    closure_notes TEXT,
    closure_description TEXT,
    effectiveness TEXT,
    reopened_at TIMESTAMP,
    reopened_by TEXT,
    reopen_reason TEXT,
    reopen_description TEXT,
    cancelled_at TIMESTAMP,
    cancelled_by TEXT,
    cancel_reason TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS rnc_cases_rnc_number_key ON rnc_cases (rnc_number);

CREATE TABLE IF NOT EXISTS rnc_peps (
    id BIGSERIAL PRIMARY KEY,
    code TEXT NOT NULL UNIQUE
);
"#;

pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rnc_year_counters (
    year INTEGER PRIMARY KEY,
    last_seq INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rnc_cases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rnc_number TEXT NOT NULL,
    reported_at TEXT,
    issuer TEXT,
    area TEXT,
    pep TEXT,
    title TEXT,
    responsible TEXT,
    description TEXT,
    case_references TEXT,
    causer TEXT,
    process TEXT,
    origin TEXT,
    severity TEXT,
    category TEXT,
    actions TEXT,
    action_owner TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    closed_at TEXT,
    closed_by TEXT,
    closure_notes TEXT,
    closure_description TEXT,
    effectiveness TEXT,
    reopened_at TEXT,
    reopened_by TEXT,
    reopen_reason TEXT,
    reopen_description TEXT,
    cancelled_at TEXT,
    cancelled_by TEXT,
    cancel_reason TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS rnc_cases_rnc_number_key ON rnc_cases (rnc_number);

CREATE TABLE IF NOT EXISTS rnc_peps (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE
);
"#;

/// Column list for case reads, in [`RawCase`] field order.
pub const CASE_COLUMNS: &str = "id, rnc_number, reported_at, issuer, area, pep, title, \
    responsible, description, case_references, causer, process, origin, severity, category, \
    actions, action_owner, status, closed_at, closed_by, closure_notes, closure_description, \
    effectiveness, reopened_at, reopened_by, reopen_reason, reopen_description, cancelled_at, \
    cancelled_by, cancel_reason";

/// Columns written by a case insert after `rnc_number` and `status`, in
/// [`NewCase`] field order.
pub const NEW_CASE_COLUMNS: &str = "reported_at, issuer, area, pep, title, description, \
    case_references, causer, process, origin, severity, category";

/// Lifecycle update shared by both backends. Sections absent from the
/// update keep their stored values.
pub fn update_case_sql(placeholder: fn(usize) -> String) -> String {
    let p = placeholder;
    format!(
        "UPDATE rnc_cases SET status = {}, \
         closed_at = COALESCE({}, closed_at), closed_by = COALESCE({}, closed_by), \
         closure_notes = COALESCE({}, closure_notes), \
         closure_description = COALESCE({}, closure_description), \
         effectiveness = COALESCE({}, effectiveness), \
         reopened_at = COALESCE({}, reopened_at), reopened_by = COALESCE({}, reopened_by), \
         reopen_reason = COALESCE({}, reopen_reason), \
         reopen_description = COALESCE({}, reopen_description), \
         cancelled_at = COALESCE({}, cancelled_at), cancelled_by = COALESCE({}, cancelled_by), \
         cancel_reason = COALESCE({}, cancel_reason) \
         WHERE id = {}",
        p(1), p(2), p(3), p(4), p(5), p(6), p(7), p(8), p(9), p(10), p(11), p(12), p(13), p(14)
    )
}

pub fn pg_placeholder(n: usize) -> String {
    format!("${}", n)
}

pub fn sqlite_placeholder(n: usize) -> String {
    format!("?{}", n)
}

// ============================================================================
// ROW SHAPE
// ============================================================================

/// A `rnc_cases` row as read from either backend.
#[derive(Debug, Clone, Default)]
pub struct RawCase {
    pub id: i64,
    pub rnc_number: String,
    pub reported_at: Option<NaiveDateTime>,
    pub issuer: Option<String>,
    pub area: Option<String>,
    pub pep: Option<String>,
    pub title: Option<String>,
    pub responsible: Option<String>,
    pub description: Option<String>,
    pub references: Option<String>,
    pub causer: Option<String>,
    pub process: Option<String>,
    pub origin: Option<String>,
    pub severity: Option<String>,
    pub category: Option<String>,
    pub actions: Option<String>,
    pub action_owner: Option<String>,
    pub status: String,
    pub closed_at: Option<NaiveDateTime>,
    pub closed_by: Option<String>,
    pub closure_notes: Option<String>,
    pub closure_description: Option<String>,
    pub effectiveness: Option<String>,
    pub reopened_at: Option<NaiveDateTime>,
    pub reopened_by: Option<String>,
    pub reopen_reason: Option<String>,
    pub reopen_description: Option<String>,
    pub cancelled_at: Option<NaiveDateTime>,
    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,
}

impl RawCase {
    pub fn into_record(self) -> RncResult<CaseRecord> {
        let status = CaseStatus::from_db_str(&self.status).map_err(|e| StorageError::Backend {
            operation: "decode_case",
            reason: e.to_string(),
        })?;

        let closure = self.closed_at.map(|at| Closure {
            at,
            by: self.closed_by.unwrap_or_default(),
            notes: self.closure_notes.unwrap_or_default(),
            description: self.closure_description.unwrap_or_default(),
            effectiveness: self
                .effectiveness
                .as_deref()
                .map(Effectiveness::from_db_str)
                .unwrap_or_default(),
        });
        let reopening = self.reopened_at.map(|at| Reopening {
            at,
            by: self.reopened_by.unwrap_or_default(),
            reason: self.reopen_reason.unwrap_or_default(),
            description: self.reopen_description.unwrap_or_default(),
        });
        let cancellation = self.cancelled_at.map(|at| Cancellation {
            at,
            by: self.cancelled_by.unwrap_or_default(),
            reason: self.cancel_reason.unwrap_or_default(),
        });

        Ok(CaseRecord {
            id: CaseId::new(self.id),
            rnc_number: self.rnc_number,
            fields: NewCase {
                reported_at: self.reported_at,
                issuer: self.issuer,
                area: self.area,
                pep: self.pep,
                title: self.title,
                description: self.description,
                references: self.references,
                causer: self.causer,
                process: self.process,
                origin: self.origin,
                severity: self.severity,
                category: self.category,
            },
            responsible: self.responsible,
            actions: self.actions,
            action_owner: self.action_owner,
            status,
            closure,
            reopening,
            cancellation,
        })
    }
}
