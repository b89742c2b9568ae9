//! RNC API - Services and Command-Line Front End
//!
//! Everything above the allocator: the case lifecycle guarded by quality
//! access, CSV import and export, the PEP catalogue, configuration loading,
//! log setup, and the `rnc` command dispatch.

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod services;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use auth::{QualityAccess, QualityGate, QualityPassword};
pub use cli::{Cli, Command, PepAction};
pub use config::{AppConfig, LogFormat};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use state::AppState;
pub use telemetry::init_tracing;
