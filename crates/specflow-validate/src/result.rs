//! Validation result model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stable violation codes surfaced to callers
///
/// Injected rules may introduce codes outside this set; built-in checks only
/// ever emit these.
pub mod codes {
    pub const PROPOSAL_MISSING: &str = "EBADSHAPE_PROPOSAL_MISSING";
    pub const TASKS_MISSING: &str = "EBADSHAPE_TASKS_MISSING";
    pub const SPECS_MISSING: &str = "EBADSHAPE_SPECS_MISSING";
    pub const DIRECTORY_INVALID: &str = "EBADSHAPE_DIRECTORY_INVALID";
    pub const CONTENT_EMPTY: &str = "EBADSHAPE_CONTENT_EMPTY";
    pub const CONTENT_BINARY: &str = "EBADSHAPE_CONTENT_BINARY";
    pub const TASKS_NO_STRUCTURE: &str = "EBADSHAPE_TASKS_NO_STRUCTURE";
    pub const SECURITY_VIOLATION: &str = "EBADSHAPE_SECURITY_VIOLATION";
    pub const PATH_TRAVERSAL: &str = "EBADSHAPE_PATH_TRAVERSAL";
    pub const SIZE_EXCEEDED: &str = "EBADSHAPE_SIZE_EXCEEDED";
    pub const IO_ERROR: &str = "EBADSHAPE_IO_ERROR";
    pub const PERMISSION_DENIED: &str = "EBADSHAPE_PERMISSION_DENIED";
    pub const UNKNOWN_ERROR: &str = "EBADSHAPE_UNKNOWN_ERROR";
}

/// How severe a violation is
///
/// Ordering is meaningful: `Critical > High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A single violation found during validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Machine-readable code, usually from [`codes`]
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// File or directory the violation refers to, relative to the change dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Actionable fix suggestion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Severity of this violation
    pub severity: Severity,
}

impl ValidationError {
    /// Build a violation record
    #[must_use]
    pub fn new(code: &str, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            path: None,
            hint: None,
            severity,
        }
    }

    /// Attach the offending path
    #[inline]
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach a fix hint
    #[inline]
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// File counts for the validated tree
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Regular files visited
    pub total_files: usize,
    /// Files with no violations against them
    pub valid_files: usize,
    /// Required files present (of 2)
    pub required_files: usize,
    /// Optional directories present (of 3)
    pub optional_files: usize,
}

/// Outcome of one validation call
///
/// `is_valid` is true iff `errors` is empty; warnings never affect validity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Blocking violations, in discovery order
    pub errors: Vec<ValidationError>,
    /// Non-blocking findings, in discovery order
    pub warnings: Vec<ValidationError>,
    /// File counts
    pub summary: ValidationSummary,
}

impl ValidationResult {
    /// Whether the change passes validation
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a blocking violation
    #[inline]
    pub fn push_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    /// Record a non-blocking finding
    #[inline]
    pub fn push_warning(&mut self, warning: ValidationError) {
        self.warnings.push(warning);
    }

    /// True if any error carries the given code
    #[must_use]
    pub fn has_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn result_validity_tracks_errors_only() {
        let mut result = ValidationResult::default();
        assert!(result.is_valid());

        result.push_warning(ValidationError::new(
            codes::SPECS_MISSING,
            "no specs directory",
            Severity::Low,
        ));
        assert!(result.is_valid());

        result.push_error(ValidationError::new(
            codes::PROPOSAL_MISSING,
            "proposal.md missing",
            Severity::Critical,
        ));
        assert!(!result.is_valid());
        assert!(result.has_error(codes::PROPOSAL_MISSING));
    }

    #[test]
    fn error_builder_attaches_path_and_hint() {
        let err = ValidationError::new(codes::CONTENT_EMPTY, "empty", Severity::Medium)
            .with_path("proposal.md")
            .with_hint("write a proposal");
        assert_eq!(err.path.as_deref(), Some(std::path::Path::new("proposal.md")));
        assert_eq!(err.hint.as_deref(), Some("write a proposal"));
    }
}
