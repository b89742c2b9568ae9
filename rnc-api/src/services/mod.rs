//! Service Layer
//!
//! Business operations behind the command line: the case lifecycle, CSV
//! exchange, and the PEP catalogue. Services return the core `RncResult`;
//! the command layer turns failures into [`crate::ApiError`].

mod case_service;
mod csv_io;
mod pep_service;

pub use case_service::*;
pub use csv_io::*;
pub use pep_service::*;
