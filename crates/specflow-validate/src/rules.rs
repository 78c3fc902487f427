//! Built-in content rules and the injection point for custom ones

use crate::result::{codes, Severity, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// A pluggable validation rule
///
/// Built-in rules run first, injected rules append, order is deterministic.
/// Rules see file content that already passed the binary check; they must
/// not touch the filesystem themselves.
pub trait Rule: Send + Sync {
    /// Short rule identifier for logs
    fn name(&self) -> &str;

    /// Inspect `content` of the file at `path` (relative to the change dir)
    fn check(&self, content: &str, path: &Path) -> Vec<ValidationError>;
}

/// Closures double as rules, matching the strategy-list design.
impl<F> Rule for F
where
    F: Fn(&str, &Path) -> Vec<ValidationError> + Send + Sync,
{
    fn name(&self) -> &str {
        "custom"
    }

    fn check(&self, content: &str, path: &Path) -> Vec<ValidationError> {
        self(content, path)
    }
}

/// At least one `-`/`*`/`+` bullet or `1.` ordered item
static TASK_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:[-*+]|\d+\.)\s+\S").expect("task marker pattern"));

/// Content that could execute when the file is rendered
static UNSAFE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)<script", "script tag"),
        (r"(?i)javascript:", "javascript url"),
        (r#"(?i)\bon[a-z]+\s*=\s*["']"#, "inline event handler"),
        (r"(?i)<iframe", "iframe tag"),
        (r"(?i)data:text/html", "data url document"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("unsafe pattern"), label))
    .collect()
});

/// NUL byte in the first 8 KiB marks the file as binary
pub(crate) fn is_probably_binary(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(8192)];
    window.contains(&0)
}

/// Empty or whitespace-only content
pub(crate) fn check_not_empty(content: &str, path: &Path) -> Option<ValidationError> {
    if content.trim().is_empty() {
        Some(
            ValidationError::new(
                codes::CONTENT_EMPTY,
                format!("{} is empty", path.display()),
                Severity::Medium,
            )
            .with_path(path)
            .with_hint("add content before archiving"),
        )
    } else {
        None
    }
}

/// `tasks.md` must contain at least one recognizable list item
pub(crate) fn check_task_structure(content: &str, path: &Path) -> Option<ValidationError> {
    if TASK_MARKER.is_match(content) {
        None
    } else {
        Some(
            ValidationError::new(
                codes::TASKS_NO_STRUCTURE,
                format!("{} has no task list items", path.display()),
                Severity::Medium,
            )
            .with_path(path)
            .with_hint("use markdown list markers (-, *, + or 1.) for tasks"),
        )
    }
}

/// Scan for known-unsafe executable content
pub(crate) fn check_unsafe_content(content: &str, path: &Path) -> Vec<ValidationError> {
    UNSAFE_PATTERNS
        .iter()
        .filter(|(pattern, _)| pattern.is_match(content))
        .map(|(_, label)| {
            ValidationError::new(
                codes::SECURITY_VIOLATION,
                format!("{} contains unsafe content: {label}", path.display()),
                Severity::Critical,
            )
            .with_path(path)
            .with_hint("remove executable markup from change documents")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_detection_flags_nul_bytes() {
        assert!(is_probably_binary(b"abc\0def"));
        assert!(!is_probably_binary(b"plain markdown text"));
    }

    #[test]
    fn binary_detection_only_inspects_prefix() {
        let mut big = vec![b'a'; 9000];
        big.push(0);
        assert!(!is_probably_binary(&big));
    }

    #[test]
    fn empty_check_trims_whitespace() {
        let path = Path::new("proposal.md");
        assert!(check_not_empty("  \n\t ", path).is_some());
        assert!(check_not_empty("# Title", path).is_none());
    }

    #[test]
    fn task_structure_accepts_all_marker_kinds() {
        let path = Path::new("tasks.md");
        for content in ["- [ ] item", "* item", "+ item", "1. item", "  2. nested"] {
            assert!(check_task_structure(content, path).is_none(), "{content}");
        }
    }

    #[test]
    fn task_structure_rejects_prose_only() {
        let path = Path::new("tasks.md");
        let err = check_task_structure("just a paragraph of prose", path).unwrap();
        assert_eq!(err.code, codes::TASKS_NO_STRUCTURE);
        assert_eq!(err.severity, Severity::Medium);
    }

    #[test]
    fn unsafe_content_catches_script_and_handlers() {
        let path = Path::new("proposal.md");
        let hits = check_unsafe_content(
            "<SCRIPT>alert(1)</script> and <a onclick=\"x()\">go</a>",
            path,
        );
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|e| e.severity == Severity::Critical));
        assert!(hits.iter().all(|e| e.code == codes::SECURITY_VIOLATION));
    }

    #[test]
    fn unsafe_content_ignores_plain_markdown() {
        let path = Path::new("proposal.md");
        assert!(check_unsafe_content("# Proposal\n\nonboarding = great", path).is_empty());
    }

    #[test]
    fn closures_are_rules() {
        let rule = |content: &str, path: &Path| {
            if content.contains("TODO") {
                vec![ValidationError::new("EPOLICY_TODO", "todo found", Severity::Low)
                    .with_path(path)]
            } else {
                Vec::new()
            }
        };
        let hits = Rule::check(&rule, "a TODO lives here", Path::new("tasks.md"));
        assert_eq!(hits.len(), 1);
        assert_eq!(Rule::name(&rule), "custom");
    }
}
