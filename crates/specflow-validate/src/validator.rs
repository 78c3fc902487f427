//! Directory-shape validation

use crate::result::{codes, Severity, ValidationError, ValidationResult};
use crate::rules::{
    check_not_empty, check_task_structure, check_unsafe_content, is_probably_binary, Rule,
};
use specflow_sandbox::PathSandbox;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Required members of every change
const REQUIRED_FILES: [(&str, &str, &str); 2] = [
    (
        "proposal.md",
        codes::PROPOSAL_MISSING,
        "create proposal.md describing the change",
    ),
    (
        "tasks.md",
        codes::TASKS_MISSING,
        "create tasks.md with a task list",
    ),
];

/// Optional members; absence is a warning when `validate_optional` is set
const OPTIONAL_DIRS: [&str; 3] = ["specs", "tests", "docs"];

/// Knobs for one validation call
#[derive(Debug, Clone, Copy)]
pub struct ValidatorOptions {
    /// Warn about missing optional directories
    pub validate_optional: bool,
    /// Run path-traversal and unsafe-content checks
    pub security_checks: bool,
    /// Files larger than this skip content checks and report as oversized
    pub max_file_size: u64,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            validate_optional: true,
            security_checks: true,
            max_file_size: 10 * 1024 * 1024,
        }
    }
}

/// Validates a change's file tree
///
/// Holds the sandbox (for traversal checks) and the ordered rule list:
/// built-ins first, injected rules appended via [`StructuralValidator::with_rule`].
pub struct StructuralValidator {
    sandbox: PathSandbox,
    rules: Vec<Box<dyn Rule>>,
}

impl StructuralValidator {
    /// Create a validator for changes under `sandbox`
    #[must_use]
    pub fn new(sandbox: PathSandbox) -> Self {
        Self {
            sandbox,
            rules: Vec::new(),
        }
    }

    /// Append a custom rule; runs after built-in checks, in insertion order
    #[must_use]
    pub fn with_rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    /// Number of injected rules
    #[inline]
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Validate the change directory at `change_path`
    ///
    /// Pure read-only: reports every violation found rather than stopping at
    /// the first, so one call surfaces everything to fix.
    #[must_use]
    pub fn validate(&self, change_path: &Path, options: &ValidatorOptions) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !change_path.is_dir() {
            result.push_error(
                ValidationError::new(
                    codes::DIRECTORY_INVALID,
                    format!("change directory not found: {}", change_path.display()),
                    Severity::Critical,
                )
                .with_hint("open the change before validating it"),
            );
            return result;
        }

        self.check_required(change_path, options, &mut result);
        if options.validate_optional {
            self.check_optional(change_path, &mut result);
        }
        self.walk_tree(change_path, options, &mut result);

        let offending: HashSet<&PathBuf> =
            result.errors.iter().filter_map(|e| e.path.as_ref()).collect();
        result.summary.valid_files = result.summary.total_files.saturating_sub(offending.len());

        tracing::debug!(
            path = %change_path.display(),
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            "validation complete"
        );
        result
    }

    fn check_required(
        &self,
        change_path: &Path,
        options: &ValidatorOptions,
        result: &mut ValidationResult,
    ) {
        for (name, missing_code, hint) in REQUIRED_FILES {
            let path = change_path.join(name);
            if !path.is_file() {
                result.push_error(
                    ValidationError::new(
                        missing_code,
                        format!("required file missing: {name}"),
                        Severity::Critical,
                    )
                    .with_path(name)
                    .with_hint(hint),
                );
                continue;
            }
            result.summary.required_files += 1;

            let rel = Path::new(name);
            let Some(content) = self.read_text(&path, rel, options, result) else {
                continue;
            };
            if let Some(err) = check_not_empty(&content, rel) {
                result.push_error(err);
            }
            if name == "tasks.md" && !content.trim().is_empty() {
                if let Some(err) = check_task_structure(&content, rel) {
                    result.push_error(err);
                }
            }
        }
    }

    fn check_optional(&self, change_path: &Path, result: &mut ValidationResult) {
        for name in OPTIONAL_DIRS {
            let path = change_path.join(name);
            if path.is_dir() {
                result.summary.optional_files += 1;
            } else if path.exists() {
                // Present but not a directory blocks archival.
                result.push_error(
                    ValidationError::new(
                        codes::DIRECTORY_INVALID,
                        format!("{name} exists but is not a directory"),
                        Severity::Medium,
                    )
                    .with_path(name)
                    .with_hint("replace the file with a directory"),
                );
            } else {
                let code = if name == "specs" {
                    codes::SPECS_MISSING
                } else {
                    codes::DIRECTORY_INVALID
                };
                result.push_warning(
                    ValidationError::new(
                        code,
                        format!("optional directory not present: {name}/"),
                        Severity::Low,
                    )
                    .with_path(name),
                );
            }
        }
    }

    /// Single pass over the tree: counts files, runs traversal checks,
    /// unsafe-content scanning, and injected rules.
    fn walk_tree(
        &self,
        change_path: &Path,
        options: &ValidatorOptions,
        result: &mut ValidationResult,
    ) {
        for entry in WalkDir::new(change_path).follow_links(false).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    result.push_error(
                        ValidationError::new(
                            codes::IO_ERROR,
                            format!("failed to walk change tree: {e}"),
                            Severity::High,
                        ),
                    );
                    continue;
                }
            };
            let rel = entry
                .path()
                .strip_prefix(change_path)
                .unwrap_or(entry.path())
                .to_path_buf();

            if options.security_checks
                && self.sandbox.ensure_within(entry.path()).is_err()
            {
                result.push_error(
                    ValidationError::new(
                        codes::PATH_TRAVERSAL,
                        format!("{} resolves outside the change directory", rel.display()),
                        Severity::Critical,
                    )
                    .with_path(&rel)
                    .with_hint("remove the escaping link or entry"),
                );
                continue;
            }

            if !entry.file_type().is_file() {
                continue;
            }
            result.summary.total_files += 1;

            // Required files already went through the content pipeline.
            let is_required = REQUIRED_FILES
                .iter()
                .any(|(name, _, _)| rel == Path::new(name));
            if is_required {
                if options.security_checks || !self.rules.is_empty() {
                    if let Ok(bytes) = fs::read(entry.path()) {
                        if !is_probably_binary(&bytes) {
                            let content = String::from_utf8_lossy(&bytes);
                            self.scan_content(&content, &rel, options, result);
                        }
                    }
                }
                continue;
            }

            let Some(content) = self.read_text(entry.path(), &rel, options, result) else {
                continue;
            };
            self.scan_content(&content, &rel, options, result);
        }
    }

    /// Unsafe-pattern scan plus injected rules for one file
    fn scan_content(
        &self,
        content: &str,
        rel: &Path,
        options: &ValidatorOptions,
        result: &mut ValidationResult,
    ) {
        if options.security_checks {
            for err in check_unsafe_content(content, rel) {
                result.push_error(err);
            }
        }
        for rule in &self.rules {
            for finding in rule.check(content, rel) {
                tracing::debug!(rule = rule.name(), path = %rel.display(), code = %finding.code, "rule finding");
                if finding.severity > Severity::Low {
                    result.push_error(finding);
                } else {
                    result.push_warning(finding);
                }
            }
        }
    }

    /// Read a file for content checks, reporting size and IO problems
    ///
    /// Returns `None` when content checks should be skipped for this file.
    fn read_text(
        &self,
        path: &Path,
        rel: &Path,
        options: &ValidatorOptions,
        result: &mut ValidationResult,
    ) -> Option<String> {
        match fs::metadata(path) {
            Ok(meta) if meta.len() > options.max_file_size => {
                result.push_error(
                    ValidationError::new(
                        codes::SIZE_EXCEEDED,
                        format!(
                            "{} is {} bytes (limit {})",
                            rel.display(),
                            meta.len(),
                            options.max_file_size
                        ),
                        Severity::Medium,
                    )
                    .with_path(rel)
                    .with_hint("move large assets out of the change directory"),
                );
                return None;
            }
            Ok(_) => {}
            Err(e) => {
                result.push_error(io_violation(rel, &e));
                return None;
            }
        }

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                result.push_error(io_violation(rel, &e));
                return None;
            }
        };

        if is_probably_binary(&bytes) {
            result.push_error(
                ValidationError::new(
                    codes::CONTENT_BINARY,
                    format!("{} is binary", rel.display()),
                    Severity::Medium,
                )
                .with_path(rel)
                .with_hint("change documents must be text"),
            );
            return None;
        }

        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn io_violation(rel: &Path, e: &io::Error) -> ValidationError {
    let (code, message) = if e.kind() == io::ErrorKind::PermissionDenied {
        (
            codes::PERMISSION_DENIED,
            format!("{}: permission denied", rel.display()),
        )
    } else {
        (codes::IO_ERROR, format!("{}: {e}", rel.display()))
    };
    ValidationError::new(code, message, Severity::High).with_path(rel)
}
