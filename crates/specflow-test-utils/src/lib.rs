//! Testing utilities for the Specflow workspace
//!
//! Filesystem-level fixtures: a temp sandbox root plus helpers that build
//! change directories in known states (scaffolded, locked, expired-lock,
//! archived) without going through the engine.

#![allow(missing_docs)]

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A temp sandbox root for change directories
pub struct ChangeFixture {
    root: tempfile::TempDir,
}

impl ChangeFixture {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("create fixture root"),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn change_dir(&self, slug: &str) -> PathBuf {
        self.root.path().join(slug)
    }

    /// Create a structurally valid change: proposal, tasks, specs/
    pub fn scaffold(&self, slug: &str) -> PathBuf {
        let dir = self.change_dir(slug);
        fs::create_dir_all(dir.join("specs")).expect("create change dir");
        fs::write(
            dir.join("proposal.md"),
            format!("# {slug}\n\n## Why\n\nfixture change\n"),
        )
        .expect("write proposal");
        fs::write(dir.join("tasks.md"), "- [ ] first task\n- [ ] second task\n")
            .expect("write tasks");
        dir
    }

    /// Scaffold `count` changes named `change-NNN` with strictly increasing
    /// modification times, so listings have a deterministic order
    pub fn scaffold_many(&self, count: usize) -> Vec<String> {
        let base = SystemTime::now() - Duration::from_secs(count as u64 + 10);
        (0..count)
            .map(|i| {
                let slug = format!("change-{i:03}");
                self.scaffold(&slug);
                self.set_modified(&slug, base + Duration::from_secs(i as u64));
                slug
            })
            .collect()
    }

    /// Set the modification time of every file in the change
    pub fn set_modified(&self, slug: &str, time: SystemTime) {
        let dir = self.change_dir(slug);
        for name in ["proposal.md", "tasks.md"] {
            let file = File::options()
                .write(true)
                .open(dir.join(name))
                .expect("open for set_modified");
            file.set_modified(time).expect("set mtime");
        }
    }

    /// Write a lease record directly; `since` as unix seconds
    pub fn write_lock(&self, slug: &str, owner: &str, since: u64, ttl: u64) {
        let lock = serde_json::json!({
            "owner": owner,
            "since": since,
            "ttl": ttl,
        });
        fs::write(
            self.change_dir(slug).join(".lock"),
            serde_json::to_vec_pretty(&lock).expect("serialize lock"),
        )
        .expect("write lock");
    }

    /// Write a lease that expired in the past
    pub fn write_expired_lock(&self, slug: &str, owner: &str) {
        let since = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_secs()
            - 120;
        self.write_lock(slug, owner, since, 1);
    }

    /// Mark a change archived by writing a minimal receipt
    pub fn write_receipt(&self, slug: &str) {
        let receipt = serde_json::json!({
            "slug": slug,
            "commits": [],
            "gitRange": "last-20",
            "filesTouched": [],
            "tests": {"added": 0, "updated": 0, "passed": false},
            "archivedAt": "2026-01-01T00:00:00Z",
            "actor": {"type": "agent", "name": "fixture@test", "model": "specflow-test"},
            "toolVersions": {"specflow": "0.1.0"},
        });
        fs::write(
            self.change_dir(slug).join("receipt.json"),
            serde_json::to_vec_pretty(&receipt).expect("serialize receipt"),
        )
        .expect("write receipt");
    }

    /// Write a spec delta file under `specs/`
    pub fn write_delta(&self, slug: &str, relative: &str, content: &str) -> PathBuf {
        let path = self.change_dir(slug).join("specs").join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create delta parent");
        }
        fs::write(&path, content).expect("write delta");
        path
    }
}

impl Default for ChangeFixture {
    fn default() -> Self {
        Self::new()
    }
}
