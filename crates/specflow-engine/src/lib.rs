//! Specflow Change Lifecycle Engine
//!
//! The orchestrator for change-management operations, composing the
//! sandbox, lock manager, validator, and receipt generator into the public
//! surface:
//!
//! - [`ChangeLifecycleEngine::open`]: idempotent open-or-resume with
//!   lock acquisition and scaffolding
//! - [`ChangeLifecycleEngine::archive`]: validate → lock → archive
//!   subprocess → receipt, idempotent and safe to retry
//! - [`ResourceReader`]: paginated listings with stable page tokens and
//!   bounded-memory streaming reads (never takes a lock)
//!
//! # State machine
//!
//! Per change: absent → active (unlocked) → active (locked) → archived.
//! Archived is terminal; archiving an archived change is a successful no-op
//! that returns the existing receipt.
//!
//! # Concurrency
//!
//! The on-disk lock file is the only synchronization primitive. Engine
//! instances in different processes sharing the filesystem coordinate
//! correctly; no in-process state is authoritative.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod config;
mod engine;
mod error;
mod reader;
mod response;
mod summary;

pub use config::{EngineConfig, Template};
pub use engine::ChangeLifecycleEngine;
pub use error::EngineError;
pub use reader::{
    FileContent, FileStream, ListOptions, ProgressCallback, ResourceReader, StreamProgress,
};
pub use response::{
    ArchiveOutcome, ArchiveWarning, ChangePage, ChangeStatus, ChangeSummary, OpenOutcome,
    OpenRequest, ToolResponse, API_VERSION,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
