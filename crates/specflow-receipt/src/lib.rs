//! Specflow Receipt Generator
//!
//! Produces the durable, auditable record of a completed archive:
//!
//! - [`Receipt`]: version-control history, test results, actor and
//!   tool-version metadata (JSON-serialized by the engine)
//! - [`ReceiptGenerator`]: gathers the data with graceful degradation —
//!   a missing or failing git / test runner yields empty defaults plus a
//!   [`ReceiptWarning`], never a failed archive
//! - [`CommandRunner`]: the safe-process-execution port; subprocesses run
//!   with argument vectors (no shell), a sanitized environment, and a
//!   timeout
//!
//! The generator returns plain values; persisting the receipt file is the
//! engine's responsibility.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod exec;
mod generator;
mod receipt;

pub use exec::{CommandRunner, ExecError, ExecOutput, TokioRunner};
pub use generator::{ReceiptGenerator, ReceiptOptions, ReceiptWarning};
pub use receipt::{Actor, Receipt, TestStats};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
