//! Engine error taxonomy
//!
//! Every variant maps to a stable machine-readable code via
//! [`EngineError::code`]. The taxonomy follows recoverability: caller-fixable
//! input errors, contention errors (retry with backoff), and failures of the
//! archive pipeline itself. External-dependency failures inside receipt
//! generation never surface here — they degrade to warnings on the outcome.

use specflow_lock::{LockError, LockInfo};
use specflow_sandbox::{SandboxError, SlugError};
use specflow_validate::ValidationResult;
use std::path::PathBuf;

/// Errors surfaced by engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed change identifier
    #[error(transparent)]
    BadSlug(#[from] SlugError),

    /// Path escaped the sandbox or could not be resolved
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    /// Change directory does not exist
    #[error("no such change: {slug}")]
    NoChange { slug: String },

    /// Change is already archived; the requested operation needs an active change
    #[error("change '{slug}' is archived")]
    Archived { slug: String },

    /// Another owner holds a valid lease; holder details attached
    #[error("change is locked by '{}'", .0.owner)]
    Locked(LockInfo),

    /// Lock choreography failed during archive for a reason other than contention
    #[error("archive could not take the lock: {0}")]
    ArchiveLockFailed(#[source] LockError),

    /// Structural validation rejected the change; the full violation list is attached
    #[error("validation failed with {} error(s)", .0.errors.len())]
    ValidationFailed(ValidationResult),

    /// The configured test command did not pass and passing is required
    #[error("tests did not pass and require_tests_pass is set")]
    TestsRequired,

    /// The external archive command failed; the lock is kept so a retry can reuse it
    #[error("archive command exited {status}: {stderr}")]
    ArchiveCommandFailed { status: i32, stderr: String },

    /// An existing receipt file could not be read back
    #[error("receipt unreadable at {path}: {message}")]
    ReceiptUnreadable { path: PathBuf, message: String },

    /// Unknown scaffold template name
    #[error("unknown template: '{0}'")]
    UnknownTemplate(String),

    /// Page index below 1
    #[error("page must be >= 1, got {0}")]
    InvalidPage(i64),

    /// Page size below 1
    #[error("page size must be >= 1, got {0}")]
    InvalidPageSize(i64),

    /// Page size above the configured maximum
    #[error("page size {size} exceeds maximum {max}")]
    PageSizeTooLarge { size: usize, max: usize },

    /// Stale or malformed continuation token; restart from page 1
    #[error("invalid page token")]
    InvalidToken,

    /// Unknown change member in a read request
    #[error("invalid member '{member}': expected proposal, tasks, or delta/<path>")]
    InvalidMember { member: String },

    /// Buffered-but-undelivered stream data hit the memory ceiling
    #[error("stream buffer exceeded {limit} bytes (consumer too slow)")]
    MemoryLimitExceeded { limit: usize },

    /// Filesystem failure outside the cases above
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    /// Stable machine-readable code for callers
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadSlug(_) => "EBADSLUG",
            Self::Sandbox(e) => e.code(),
            Self::NoChange { .. } => "ENOCHANGE",
            Self::Archived { .. } => "EARCHIVED",
            Self::Locked(_) => "ELOCKED",
            Self::ArchiveLockFailed(_) => "EARCHIVED_LOCK_FAILED",
            Self::ValidationFailed(_) => "EARCHIVED_VALIDATION_FAILED",
            Self::TestsRequired => "EARCHIVED_VALIDATION_FAILED",
            Self::ArchiveCommandFailed { .. } => "EARCHIVED_COMMAND_FAILED",
            Self::ReceiptUnreadable { .. } => "EARCHIVED_RECEIPT_FAILED",
            Self::UnknownTemplate(_) => "INVALID_TEMPLATE",
            Self::InvalidPage(_) => "INVALID_PAGE",
            Self::InvalidPageSize(_) => "INVALID_PAGE_SIZE",
            Self::PageSizeTooLarge { .. } => "PAGE_SIZE_TOO_LARGE",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::InvalidMember { .. } => "INVALID_MEMBER",
            Self::MemoryLimitExceeded { .. } => "MEMORY_LIMIT_EXCEEDED",
            Self::Io { .. } => "EBADSHAPE_IO_ERROR",
        }
    }

    /// Map a lock failure: contention becomes `ELOCKED` with holder info,
    /// anything else is a lock-infrastructure failure
    pub(crate) fn from_lock(e: LockError) -> Self {
        match e {
            LockError::Held(info) => Self::Locked(info),
            other => Self::ArchiveLockFailed(other),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            EngineError::NoChange {
                slug: "x".to_string()
            }
            .code(),
            "ENOCHANGE"
        );
        assert_eq!(EngineError::InvalidToken.code(), "INVALID_TOKEN");
        assert_eq!(
            EngineError::MemoryLimitExceeded { limit: 1 }.code(),
            "MEMORY_LIMIT_EXCEEDED"
        );
        assert_eq!(
            EngineError::ArchiveCommandFailed {
                status: 2,
                stderr: String::new()
            }
            .code(),
            "EARCHIVED_COMMAND_FAILED"
        );
    }

    #[test]
    fn held_lock_maps_to_elocked() {
        let info = LockInfo::new("alice", 60);
        let err = EngineError::from_lock(LockError::Held(info));
        assert_eq!(err.code(), "ELOCKED");
    }

    #[test]
    fn slug_error_converts() {
        let err: EngineError = "NO".parse::<specflow_sandbox::Slug>().unwrap_err().into();
        assert_eq!(err.code(), "EBADSLUG");
    }
}
