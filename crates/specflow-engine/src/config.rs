//! Engine configuration

use crate::error::EngineError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Scaffold template applied by `open` for missing required files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Template {
    /// Proposal with rationale section, checklist tasks, empty specs tree
    #[default]
    Default,
    /// Bare headings only
    Minimal,
}

impl Template {
    /// Initial `proposal.md` body
    #[must_use]
    pub fn proposal(&self, title: &str, rationale: Option<&str>) -> String {
        match self {
            Self::Default => {
                let why = rationale.unwrap_or("_to be written_");
                format!("# {title}\n\n## Why\n\n{why}\n\n## What Changes\n\n_to be written_\n")
            }
            Self::Minimal => format!("# {title}\n"),
        }
    }

    /// Initial `tasks.md` body
    #[must_use]
    pub fn tasks(&self, title: &str) -> String {
        match self {
            Self::Default => {
                format!("# Tasks: {title}\n\n- [ ] draft the proposal\n- [ ] write spec deltas\n- [ ] implement\n")
            }
            Self::Minimal => format!("# Tasks: {title}\n\n- [ ] fill in\n"),
        }
    }
}

impl FromStr for Template {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "minimal" => Ok(Self::Minimal),
            other => Err(EngineError::UnknownTemplate(other.to_string())),
        }
    }
}

/// Configuration for the engine and reader
///
/// Builder-style setters; every knob has a production default.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sandbox root under which change directories live
    pub root: PathBuf,
    /// Lease TTL in seconds when the caller does not pass one
    pub default_ttl: u64,
    /// Identity used for engine-held locks (archive) and as default owner
    pub actor: String,
    /// Model/tool identifier recorded in receipts
    pub actor_model: String,
    /// External archive command (program + base args); the slug is appended
    /// as a single argument. The command must be idempotent: a retry after
    /// a crash between the command and receipt persistence re-invokes it.
    /// `None` skips the external step.
    pub archive_command: Option<Vec<String>>,
    /// Test command run scoped to the change path at archive time
    pub test_command: Option<Vec<String>>,
    /// Refuse to archive when the test command does not pass
    pub require_tests_pass: bool,
    /// Deadline for each subprocess invocation
    pub subprocess_timeout: Duration,
    /// Files at or below this size are returned whole; larger ones stream
    pub streaming_threshold: u64,
    /// Chunk size for streaming reads
    pub chunk_size: usize,
    /// Ceiling for buffered-but-undelivered stream data
    pub max_memory: usize,
    /// Progress callback fires every this many chunks
    pub progress_interval: u64,
    /// How long a full stream buffer may stall before the read aborts
    pub stall_timeout: Duration,
    /// Listing page size when the caller does not pass one
    pub default_page_size: usize,
    /// Hard ceiling on requested page size
    pub max_page_size: usize,
}

impl EngineConfig {
    /// Configuration rooted at `root` with production defaults
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            root: root.into(),
            default_ttl: 3600,
            actor: format!("{}@{}", std::process::id(), host),
            actor_model: format!("specflow-{}", crate::VERSION),
            archive_command: None,
            test_command: None,
            require_tests_pass: false,
            subprocess_timeout: Duration::from_secs(30),
            streaming_threshold: 10 * 1024 * 1024,
            chunk_size: 64 * 1024,
            max_memory: 50 * 1024 * 1024,
            progress_interval: 5,
            stall_timeout: Duration::from_secs(10),
            default_page_size: 50,
            max_page_size: 1000,
        }
    }

    /// With a default lease TTL
    #[inline]
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: u64) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// With an engine actor identity
    #[inline]
    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// With an external archive command
    #[inline]
    #[must_use]
    pub fn with_archive_command(mut self, command: Vec<String>) -> Self {
        self.archive_command = Some(command);
        self
    }

    /// With a test command
    #[inline]
    #[must_use]
    pub fn with_test_command(mut self, command: Vec<String>) -> Self {
        self.test_command = Some(command);
        self
    }

    /// Require the test command to pass before archiving
    #[inline]
    #[must_use]
    pub fn with_require_tests_pass(mut self, require: bool) -> Self {
        self.require_tests_pass = require;
        self
    }

    /// With streaming bounds (threshold, chunk size, memory ceiling)
    #[inline]
    #[must_use]
    pub fn with_streaming(mut self, threshold: u64, chunk_size: usize, max_memory: usize) -> Self {
        self.streaming_threshold = threshold;
        self.chunk_size = chunk_size;
        self.max_memory = max_memory;
        self
    }
}
