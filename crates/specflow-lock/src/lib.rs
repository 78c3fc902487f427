//! Specflow Lock Manager
//!
//! Per-change mutual exclusion over a shared filesystem:
//!
//! - [`LockInfo`]: the JSON lease record stored in a change's `.lock` file
//! - [`LockManager`]: acquire / release / inspect operations
//!
//! The atomic exclusive-create of the lock file **is** the cross-process
//! lock; no in-process state is authoritative. Leases carry a TTL so a
//! crashed owner never wedges a change: once `now >= since + ttl` the lock
//! is inert and any owner may reclaim it.
//!
//! Locking is scoped per change directory. Operations on different changes
//! never contend and no global mutex exists.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod manager;

pub use manager::{AcquireKind, Acquired, LockError, LockInfo, LockManager, LOCK_FILE_NAME};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
