//! Receipt assembly with graceful degradation
//!
//! Two error channels, deliberately distinct: the archive subprocess
//! (invoked by the engine, not here) fails hard; everything this module
//! gathers — git history, test results, tool versions — degrades to
//! defaults plus a [`ReceiptWarning`]. A missing git binary must never fail
//! an archive.

use crate::exec::CommandRunner;
use crate::receipt::{Actor, Receipt, TestStats};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Non-fatal findings collected while assembling a receipt
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReceiptWarning {
    /// Git history could not be collected
    #[error("git history unavailable: {0}")]
    GitUnavailable(String),

    /// The configured test command failed to run (distinct from tests
    /// running and failing, which is a plain `passed: false`)
    #[error("test run unavailable: {0}")]
    TestsUnavailable(String),

    /// A tool version could not be detected
    #[error("version detection failed for '{tool}': {message}")]
    VersionUnknown { tool: String, message: String },
}

/// Configuration for receipt assembly
#[derive(Debug, Clone)]
pub struct ReceiptOptions {
    /// Deadline for each subprocess call
    pub subprocess_timeout: Duration,
    /// Test command (program + args) run scoped to the change path
    pub test_command: Option<Vec<String>>,
    /// Extra CLIs to probe with `--version` for the tool-versions map
    pub version_probes: Vec<String>,
    /// Fixed model/tool identifier recorded in the actor block
    pub actor_model: String,
    /// How many recent commits to record
    pub commit_limit: usize,
}

impl Default for ReceiptOptions {
    fn default() -> Self {
        Self {
            subprocess_timeout: Duration::from_secs(30),
            test_command: None,
            version_probes: Vec::new(),
            actor_model: format!("specflow-{}", crate::VERSION),
            commit_limit: 20,
        }
    }
}

/// Gathers receipt data from git, the test runner, and version probes
pub struct ReceiptGenerator {
    runner: Arc<dyn CommandRunner>,
    options: ReceiptOptions,
}

impl ReceiptGenerator {
    /// Create a generator over the given execution port
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, options: ReceiptOptions) -> Self {
        Self { runner, options }
    }

    /// Assemble a receipt for `slug` at `change_path`
    ///
    /// Infallible by design: every data source degrades to defaults, and
    /// the reasons come back as warnings alongside the receipt.
    pub async fn generate(&self, change_path: &Path, slug: &str) -> (Receipt, Vec<ReceiptWarning>) {
        let mut warnings = Vec::new();

        let (commits, files_touched) = self.git_history(change_path, &mut warnings).await;
        let tests = self.test_stats(change_path, &mut warnings).await;
        let tool_versions = self.tool_versions(change_path, &mut warnings).await;

        let receipt = Receipt {
            slug: slug.to_string(),
            git_range: format!("last-{}", self.options.commit_limit),
            commits,
            files_touched,
            tests,
            archived_at: Utc::now(),
            actor: Actor::current(self.options.actor_model.clone()),
            tool_versions,
        };
        (receipt, warnings)
    }

    /// Recent commit ids and touched files for the change path
    async fn git_history(
        &self,
        change_path: &Path,
        warnings: &mut Vec<ReceiptWarning>,
    ) -> (Vec<String>, Vec<String>) {
        let limit = self.options.commit_limit.to_string();
        let commits = self
            .git(
                change_path,
                &["log", "-n", &limit, "--pretty=format:%H", "--", "."],
            )
            .await;
        let commits = match commits {
            Ok(stdout) => stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Err(message) => {
                tracing::warn!(%message, "git log failed, receipt gets empty history");
                warnings.push(ReceiptWarning::GitUnavailable(message));
                return (Vec::new(), Vec::new());
            }
        };

        let files = self
            .git(
                change_path,
                &["log", "-n", &limit, "--name-only", "--pretty=format:", "--", "."],
            )
            .await;
        let files_touched = match files {
            Ok(stdout) => dedup_preserving_order(stdout.lines()),
            Err(message) => {
                warnings.push(ReceiptWarning::GitUnavailable(message));
                Vec::new()
            }
        };
        (commits, files_touched)
    }

    /// Counts of added/updated test files plus the pass/fail verdict
    async fn test_stats(
        &self,
        change_path: &Path,
        warnings: &mut Vec<ReceiptWarning>,
    ) -> TestStats {
        let mut stats = TestStats::default();

        let limit = self.options.commit_limit.to_string();
        match self
            .git(
                change_path,
                &[
                    "log",
                    "-n",
                    &limit,
                    "--name-status",
                    "--pretty=format:",
                    "--",
                    "tests",
                ],
            )
            .await
        {
            Ok(stdout) => {
                let mut added = std::collections::BTreeSet::new();
                let mut updated = std::collections::BTreeSet::new();
                for line in stdout.lines() {
                    let mut parts = line.split_whitespace();
                    match (parts.next(), parts.next()) {
                        (Some(status), Some(path)) if status.starts_with('A') => {
                            added.insert(path.to_string());
                        }
                        (Some(status), Some(path)) if status.starts_with('M') => {
                            updated.insert(path.to_string());
                        }
                        _ => {}
                    }
                }
                stats.added = added.len() as u32;
                stats.updated = updated.difference(&added).count() as u32;
            }
            Err(message) => warnings.push(ReceiptWarning::GitUnavailable(message)),
        }

        let Some(command) = &self.options.test_command else {
            warnings.push(ReceiptWarning::TestsUnavailable(
                "no test command configured".to_string(),
            ));
            return stats;
        };
        let Some((program, args)) = command.split_first() else {
            warnings.push(ReceiptWarning::TestsUnavailable(
                "empty test command".to_string(),
            ));
            return stats;
        };

        match self
            .runner
            .run(program, args, change_path, self.options.subprocess_timeout)
            .await
        {
            Ok(output) => {
                stats.passed = output.success();
                if !output.success() {
                    tracing::warn!(program, status = output.status, "test command failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "test command unavailable");
                warnings.push(ReceiptWarning::TestsUnavailable(e.to_string()));
            }
        }
        stats
    }

    /// Engine and CLI versions, `"unknown"` rather than failing
    ///
    /// Also used by the engine to stamp `tool_versions` onto response
    /// envelopes; `change_path` is only the working directory for probes.
    pub async fn tool_versions(
        &self,
        change_path: &Path,
        warnings: &mut Vec<ReceiptWarning>,
    ) -> BTreeMap<String, String> {
        let mut versions = BTreeMap::new();
        versions.insert("specflow".to_string(), crate::VERSION.to_string());

        let mut probes = vec!["git".to_string()];
        probes.extend(self.options.version_probes.iter().cloned());

        for tool in probes {
            let version = match self
                .runner
                .run(
                    &tool,
                    &["--version".to_string()],
                    change_path,
                    self.options.subprocess_timeout,
                )
                .await
            {
                Ok(output) if output.success() => {
                    let line = output.stdout.lines().next().unwrap_or("").trim();
                    // `git --version` prints "git version 2.43.0"
                    line.rsplit(' ').next().unwrap_or("unknown").to_string()
                }
                Ok(output) => {
                    warnings.push(ReceiptWarning::VersionUnknown {
                        tool: tool.clone(),
                        message: format!("exit status {}", output.status),
                    });
                    "unknown".to_string()
                }
                Err(e) => {
                    warnings.push(ReceiptWarning::VersionUnknown {
                        tool: tool.clone(),
                        message: e.to_string(),
                    });
                    "unknown".to_string()
                }
            };
            versions.insert(tool, version);
        }
        versions
    }

    /// Run git, folding every failure mode into a message string
    async fn git(&self, cwd: &Path, args: &[&str]) -> Result<String, String> {
        let args: Vec<String> = args.iter().map(|s| (*s).to_string()).collect();
        match self
            .runner
            .run("git", &args, cwd, self.options.subprocess_timeout)
            .await
        {
            Ok(output) if output.success() => Ok(output.stdout),
            Ok(output) => Err(format!(
                "git exited {}: {}",
                output.status,
                output.stderr.trim()
            )),
            Err(e) => Err(e.to_string()),
        }
    }
}

fn dedup_preserving_order<'a>(lines: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    lines
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| seen.insert(l.to_string()))
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecError, ExecOutput, MockCommandRunner};
    use mockall::predicate::always;

    fn ok(stdout: &str) -> Result<ExecOutput, ExecError> {
        Ok(ExecOutput {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn spawn_failure() -> Result<ExecOutput, ExecError> {
        Err(ExecError::Spawn {
            program: "git".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        })
    }

    fn generator(runner: MockCommandRunner, options: ReceiptOptions) -> ReceiptGenerator {
        ReceiptGenerator::new(Arc::new(runner), options)
    }

    #[tokio::test]
    async fn git_failure_degrades_to_empty_defaults() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .returning(|_, _, _, _| spawn_failure());

        let generator = generator(runner, ReceiptOptions::default());
        let dir = tempfile::tempdir().unwrap();
        let (receipt, warnings) = generator.generate(dir.path(), "add-auth").await;

        assert!(receipt.commits.is_empty());
        assert!(receipt.files_touched.is_empty());
        assert!(!receipt.tests.passed);
        assert_eq!(receipt.tool_versions["git"], "unknown");
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ReceiptWarning::GitUnavailable(_))));
    }

    #[tokio::test]
    async fn commits_and_files_are_collected() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .with(
                mockall::predicate::eq("git"),
                always(),
                always(),
                always(),
            )
            .returning(|_, args, _, _| {
                if args.iter().any(|a| a == "--pretty=format:%H") {
                    ok("abc111\nabc222\n")
                } else if args.iter().any(|a| a == "--name-status") {
                    ok("A\ttests/auth.rs\nM\ttests/auth.rs\nM\ttests/login.rs\n")
                } else if args.iter().any(|a| a == "--name-only") {
                    ok("proposal.md\ntasks.md\nproposal.md\n")
                } else if args.iter().any(|a| a == "--version") {
                    ok("git version 2.43.0")
                } else {
                    ok("")
                }
            });

        let generator = generator(runner, ReceiptOptions::default());
        let dir = tempfile::tempdir().unwrap();
        let (receipt, _warnings) = generator.generate(dir.path(), "add-auth").await;

        assert_eq!(receipt.commits, vec!["abc111", "abc222"]);
        assert_eq!(receipt.files_touched, vec!["proposal.md", "tasks.md"]);
        assert_eq!(receipt.git_range, "last-20");
        assert_eq!(receipt.tests.added, 1);
        assert_eq!(receipt.tests.updated, 1);
        assert_eq!(receipt.tool_versions["git"], "2.43.0");
        assert_eq!(receipt.slug, "add-auth");
    }

    #[tokio::test]
    async fn passing_test_command_sets_passed() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|program, _, _, _| {
            if program == "git" {
                ok("")
            } else {
                ok("all tests passed")
            }
        });

        let options = ReceiptOptions {
            test_command: Some(vec!["cargo".to_string(), "test".to_string()]),
            ..ReceiptOptions::default()
        };
        let generator = generator(runner, options);
        let dir = tempfile::tempdir().unwrap();
        let (receipt, _) = generator.generate(dir.path(), "add-auth").await;
        assert!(receipt.tests.passed);
    }

    #[tokio::test]
    async fn failing_test_command_is_recorded_not_fatal() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|program, _, _, _| {
            if program == "git" {
                ok("")
            } else {
                Ok(ExecOutput {
                    status: 1,
                    stdout: String::new(),
                    stderr: "2 tests failed".to_string(),
                })
            }
        });

        let options = ReceiptOptions {
            test_command: Some(vec!["cargo".to_string(), "test".to_string()]),
            ..ReceiptOptions::default()
        };
        let generator = generator(runner, options);
        let dir = tempfile::tempdir().unwrap();
        let (receipt, warnings) = generator.generate(dir.path(), "add-auth").await;

        assert!(!receipt.tests.passed);
        // Tests ran and failed: that is evidence, not a warning.
        assert!(!warnings
            .iter()
            .any(|w| matches!(w, ReceiptWarning::TestsUnavailable(_))));
    }

    #[tokio::test]
    async fn missing_test_command_warns() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_, _, _, _| ok(""));

        let generator = generator(runner, ReceiptOptions::default());
        let dir = tempfile::tempdir().unwrap();
        let (receipt, warnings) = generator.generate(dir.path(), "add-auth").await;

        assert!(!receipt.tests.passed);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ReceiptWarning::TestsUnavailable(_))));
    }

    #[tokio::test]
    async fn version_probes_cover_extra_tools() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|program, args, _, _| {
            if args.iter().any(|a| a == "--version") {
                match program {
                    "git" => ok("git version 2.43.0"),
                    "archiver" => ok("archiver 1.2.3"),
                    _ => spawn_failure(),
                }
            } else {
                ok("")
            }
        });

        let options = ReceiptOptions {
            version_probes: vec!["archiver".to_string()],
            ..ReceiptOptions::default()
        };
        let generator = generator(runner, options);
        let dir = tempfile::tempdir().unwrap();
        let (receipt, _) = generator.generate(dir.path(), "add-auth").await;

        assert_eq!(receipt.tool_versions["archiver"], "1.2.3");
        assert!(receipt.tool_versions.contains_key("specflow"));
    }
}
