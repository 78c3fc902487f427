//! Safe subprocess execution port
//!
//! All external tools (git, test runner, archive CLI) go through
//! [`CommandRunner`]. Invocation is argument-vector only — nothing is ever
//! interpolated into a shell — and every call carries a timeout after which
//! the child is killed and the call reports failure rather than hanging the
//! engine.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Captured result of a finished subprocess
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code; -1 when terminated by signal
    pub status: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the process exited zero
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Errors from subprocess execution
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The program could not be started
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran past its deadline and was killed
    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    /// IO failure while collecting output
    #[error("io error running '{program}': {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Working directory does not exist
    #[error("working directory missing: {0}")]
    WorkdirMissing(PathBuf),
}

/// The safe-process-execution port
///
/// Mockable seam for tests; production uses [`TokioRunner`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` in `cwd`, bounded by `timeout`
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ExecOutput, ExecError>;
}

/// Production runner on `tokio::process`
///
/// The child gets a minimal environment: everything is cleared except
/// `PATH` and `HOME` (git wants its config). Stdio is captured, never
/// inherited.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

impl TokioRunner {
    /// Create a runner
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ExecOutput, ExecError> {
        if !cwd.is_dir() {
            return Err(ExecError::WorkdirMissing(cwd.to_path_buf()));
        }

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(cwd)
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in ["PATH", "HOME"] {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }

        tracing::debug!(program, ?args, cwd = %cwd.display(), "spawning subprocess");
        let child = command.spawn().map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| ExecError::Io {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                // kill_on_drop reaps the child when the future is dropped.
                tracing::warn!(program, ?timeout, "subprocess timed out");
                return Err(ExecError::Timeout {
                    program: program.to_string(),
                    timeout,
                });
            }
        };

        Ok(ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
