//! Specflow Structural Validator
//!
//! Read-only inspection of a change directory against the expected shape:
//!
//! - Required files (`proposal.md`, `tasks.md`) with content checks
//! - Optional directories (`specs/`, `tests/`, `docs/`)
//! - Security hazards: path traversal and unsafe content patterns
//! - An injected-rule extension point for organization-specific policy
//!
//! Validation is a pure function of the directory contents at call time: no
//! lock is taken, nothing is written, and every violation is reported in one
//! pass so a caller can fix everything in a single round-trip.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod result;
mod rules;
mod validator;

pub use result::{
    codes, Severity, ValidationError, ValidationResult, ValidationSummary,
};
pub use rules::Rule;
pub use validator::{StructuralValidator, ValidatorOptions};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
