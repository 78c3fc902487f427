//! Canonicalizing path resolution inside a project root
//!
//! [`PathSandbox`] is the only component that converts caller input into
//! absolute paths. Resolution normalizes, follows symbolic links, and
//! verifies the result keeps the sandbox root as a strict prefix; this check
//! runs before any read or write touches the filesystem.

use crate::slug::Slug;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Sandboxed path resolver
///
/// Holds the canonicalized project root. All resolution goes through
/// [`PathSandbox::ensure_within`], which re-resolves symlinks on every call
/// so a link created after construction cannot escape.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    /// Canonical absolute root; every resolved path must live below it
    root: PathBuf,
}

impl PathSandbox {
    /// Create a sandbox rooted at `root`
    ///
    /// The root must exist and be a directory; it is canonicalized once so
    /// later prefix checks compare canonical forms.
    ///
    /// # Errors
    /// Returns [`SandboxError::RootUnavailable`] if the root cannot be
    /// canonicalized or is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|source| SandboxError::RootUnavailable {
                path: root.to_path_buf(),
                source,
            })?;
        if !canonical.is_dir() {
            return Err(SandboxError::RootUnavailable {
                path: canonical,
                source: io::Error::other("not a directory"),
            });
        }
        Ok(Self { root: canonical })
    }

    /// The canonical sandbox root
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a change
    ///
    /// Safe to build by joining: the slug grammar admits no separators,
    /// dots, or empty segments.
    #[inline]
    #[must_use]
    pub fn change_dir(&self, slug: &Slug) -> PathBuf {
        self.root.join(slug.as_str())
    }

    /// Resolve a relative member path under `base`
    ///
    /// Rejects absolute paths and any `..` or root component before
    /// touching the filesystem, then verifies containment via
    /// [`PathSandbox::ensure_within`].
    ///
    /// # Errors
    /// [`SandboxError::PathEscape`] for traversal or symlink escapes.
    pub fn resolve_member(
        &self,
        base: &Path,
        relative: impl AsRef<Path>,
    ) -> Result<PathBuf, SandboxError> {
        let relative = relative.as_ref();
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::PathEscape {
                        path: relative.to_path_buf(),
                    });
                }
            }
        }
        self.ensure_within(&base.join(relative))
    }

    /// Verify `path` resolves inside the sandbox root
    ///
    /// Canonicalizes the deepest existing ancestor (so not-yet-created files
    /// are checked against their real parent) and re-appends the remaining
    /// components. Symlinks anywhere along the existing portion are
    /// followed, so a link pointing outside the root fails here.
    ///
    /// # Errors
    /// [`SandboxError::PathEscape`] if the resolved path leaves the root,
    /// [`SandboxError::Io`] if the existing ancestor cannot be resolved.
    pub fn ensure_within(&self, path: &Path) -> Result<PathBuf, SandboxError> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let (existing, remainder) = split_at_existing(&absolute);
        let canonical_base = existing.canonicalize().map_err(|source| SandboxError::Io {
            path: existing.clone(),
            source,
        })?;
        let resolved = canonical_base.join(&remainder);

        if resolved == self.root || resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            tracing::warn!(path = %absolute.display(), "path escaped sandbox root");
            Err(SandboxError::PathEscape { path: absolute })
        }
    }
}

/// Split `path` into its deepest existing ancestor and the trailing
/// non-existing remainder. `..` in the remainder is rejected upstream, so a
/// plain re-join is sound.
fn split_at_existing(path: &Path) -> (PathBuf, PathBuf) {
    let mut existing = path.to_path_buf();
    let mut remainder = PathBuf::new();
    let mut tail: Vec<std::ffi::OsString> = Vec::new();

    while !existing.exists() {
        match existing.file_name() {
            Some(name) => {
                tail.push(name.to_os_string());
                existing.pop();
            }
            None => break,
        }
    }
    for name in tail.into_iter().rev() {
        remainder.push(name);
    }
    (existing, remainder)
}

/// Errors from sandbox resolution
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Sandbox root missing or not a directory
    #[error("sandbox root unavailable: {path}: {source}")]
    RootUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Path resolves outside the sandbox root
    #[error("path escapes sandbox: {path}")]
    PathEscape { path: PathBuf },

    /// IO error while resolving
    #[error("io error resolving {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    /// Stable machine-readable code for callers
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathEscape { .. } => "EPATH_ESCAPE",
            Self::RootUnavailable { .. } | Self::Io { .. } => "EBADSHAPE_IO_ERROR",
        }
    }
}
