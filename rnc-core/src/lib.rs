//! RNC Core - Entity Types
//!
//! Data structures shared by every other crate in the workspace: the RNC
//! identifier format, case records and their lifecycle states, the per-year
//! counter, the error taxonomy, and the allocator's retry configuration.
//! Nothing in here talks to a store.

pub mod case;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod number;

pub use case::{
    CancelCase, Cancellation, CaseRecord, CaseStatus, CaseStatusParseError, CaseUpdate,
    CloseCase, Closure, Effectiveness, NewCase, ReopenCase, Reopening,
};
pub use clock::{FixedClock, SystemClock, WallClock};
pub use config::AllocatorConfig;
pub use error::{
    AllocationError, AuthError, ConfigError, EntityKind, RncError, RncResult, StorageError,
    ValidationError,
};
pub use identity::{CaseId, Timestamp};
pub use number::{legacy_suffix, max_legacy_suffix, RncNumber, YearCounter};
