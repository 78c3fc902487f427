//! Change summary assembly for listings

use crate::error::EngineError;
use crate::response::{ChangeStatus, ChangeSummary};
use chrono::{DateTime, Utc};
use specflow_lock::{LockManager, LOCK_FILE_NAME};
use specflow_sandbox::{PathSandbox, Slug};
use std::fs;
use std::path::Path;
use std::time::SystemTime;
use walkdir::WalkDir;

/// Receipt file marking a change as archived
pub(crate) const RECEIPT_FILE_NAME: &str = "receipt.json";

/// Build the listing summary for one change
pub(crate) fn load_summary(
    sandbox: &PathSandbox,
    locks: &LockManager,
    slug: &Slug,
) -> Result<ChangeSummary, EngineError> {
    let dir = sandbox.change_dir(slug);
    let metadata = fs::metadata(&dir).map_err(|e| EngineError::io(&dir, e))?;

    let dir_mtime = metadata
        .modified()
        .map(into_utc)
        .unwrap_or_else(|_| Utc::now());
    let (created_at, modified_at) = tree_mtime_range(&dir).unwrap_or((dir_mtime, dir_mtime));

    let proposal = dir.join("proposal.md");
    let tasks = dir.join("tasks.md");
    let has_proposal = proposal.is_file();
    let has_tasks = tasks.is_file();

    let title = has_proposal
        .then(|| extract_title(&proposal))
        .flatten()
        .unwrap_or_else(|| slug.to_string());

    let task_count = if has_tasks {
        fs::read_to_string(&tasks)
            .map(|content| count_task_markers(&content))
            .unwrap_or(0)
    } else {
        0
    };

    let specs = dir.join("specs");
    let spec_count = fs::read_dir(&specs)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0);
    let delta_count = if specs.is_dir() {
        WalkDir::new(&specs)
            .follow_links(false)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
            .count()
    } else {
        0
    };

    let lock = locks.is_held(&dir);
    let status = if dir.join(RECEIPT_FILE_NAME).is_file() {
        ChangeStatus::Archived
    } else if lock.is_some() {
        ChangeStatus::Locked
    } else {
        ChangeStatus::Active
    };

    Ok(ChangeSummary {
        slug: slug.to_string(),
        title,
        owner: lock.map(|l| l.owner),
        created_at,
        modified_at,
        has_proposal,
        has_tasks,
        spec_count,
        task_count,
        delta_count,
        status,
    })
}

/// Oldest and newest file mtimes in the change tree
///
/// Both timestamps come from regular files only: directory mtimes shift on
/// entry churn, and filesystem birth times are neither portable nor stable,
/// so the oldest file stands in for creation. The lock file is excluded so
/// acquiring or releasing a lease does not reorder listings.
fn tree_mtime_range(dir: &Path) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mtimes: Vec<DateTime<Utc>> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name() != LOCK_FILE_NAME)
        .filter_map(|e| e.metadata().ok())
        .filter_map(|m| m.modified().ok())
        .map(into_utc)
        .collect();
    let oldest = *mtimes.iter().min()?;
    let newest = *mtimes.iter().max()?;
    Some((oldest, newest))
}

/// First `#` heading of the proposal
fn extract_title(proposal: &Path) -> Option<String> {
    let content = fs::read_to_string(proposal).ok()?;
    content.lines().find_map(|line| {
        line.strip_prefix("# ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
    })
}

/// Count of recognizable list items
pub(crate) fn count_task_markers(content: &str) -> usize {
    content
        .lines()
        .map(str::trim_start)
        .filter(|line| {
            let bullet = ["- ", "* ", "+ "]
                .iter()
                .any(|marker| line.starts_with(marker));
            let ordered = line
                .split_once(". ")
                .is_some_and(|(n, rest)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) && !rest.trim().is_empty());
            (bullet && line.len() > 2) || ordered
        })
        .count()
}

fn into_utc(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, PathSandbox, Slug) {
        let root = tempfile::tempdir().unwrap();
        let slug: Slug = "add-auth".parse().unwrap();
        fs::create_dir(root.path().join("add-auth")).unwrap();
        let sandbox = PathSandbox::new(root.path()).unwrap();
        (root, sandbox, slug)
    }

    #[test]
    fn summary_for_scaffolded_change() {
        let (root, sandbox, slug) = fixture();
        let dir = root.path().join("add-auth");
        fs::write(dir.join("proposal.md"), "# Add authentication\n\nbody\n").unwrap();
        fs::write(dir.join("tasks.md"), "- [ ] one\n- [x] two\nprose\n1. three\n").unwrap();
        fs::create_dir_all(dir.join("specs/auth")).unwrap();
        fs::write(dir.join("specs/auth/spec.md"), "## ADDED\n").unwrap();

        let summary = load_summary(&sandbox, &LockManager::new(), &slug).unwrap();
        assert_eq!(summary.title, "Add authentication");
        assert!(summary.has_proposal);
        assert!(summary.has_tasks);
        assert_eq!(summary.task_count, 3);
        assert_eq!(summary.spec_count, 1);
        assert_eq!(summary.delta_count, 1);
        assert_eq!(summary.status, ChangeStatus::Active);
    }

    #[test]
    fn summary_falls_back_to_slug_title() {
        let (_root, sandbox, slug) = fixture();
        let summary = load_summary(&sandbox, &LockManager::new(), &slug).unwrap();
        assert_eq!(summary.title, "add-auth");
        assert!(!summary.has_proposal);
        assert_eq!(summary.task_count, 0);
    }

    #[test]
    fn locked_change_reports_owner() {
        let (root, sandbox, slug) = fixture();
        let locks = LockManager::new();
        locks
            .acquire(&root.path().join("add-auth"), "alice", 3600)
            .unwrap();

        let summary = load_summary(&sandbox, &locks, &slug).unwrap();
        assert_eq!(summary.status, ChangeStatus::Locked);
        assert_eq!(summary.owner.as_deref(), Some("alice"));
    }

    #[test]
    fn archived_change_wins_over_lock() {
        let (root, sandbox, slug) = fixture();
        let dir = root.path().join("add-auth");
        fs::write(dir.join(RECEIPT_FILE_NAME), "{}").unwrap();

        let summary = load_summary(&sandbox, &LockManager::new(), &slug).unwrap();
        assert_eq!(summary.status, ChangeStatus::Archived);
    }

    #[test]
    fn missing_change_is_io_error() {
        let (_root, sandbox, _slug) = fixture();
        let ghost: Slug = "ghost-change".parse().unwrap();
        assert!(load_summary(&sandbox, &LockManager::new(), &ghost).is_err());
    }

    #[test]
    fn task_marker_variants() {
        assert_eq!(count_task_markers("- a\n* b\n+ c\n12. d\n"), 4);
        assert_eq!(count_task_markers("prose\n-\n*\n"), 0);
    }
}
