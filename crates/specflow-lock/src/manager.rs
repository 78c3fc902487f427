//! File-based lease acquisition and release

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the lease file inside a change directory
pub const LOCK_FILE_NAME: &str = ".lock";

/// Reclaim races are resolved by retrying the exclusive create a bounded
/// number of times; exactly one contender wins each round.
const ACQUIRE_ATTEMPTS: u32 = 3;

/// The lease record stored in the lock file
///
/// A lease is valid iff `now < since + ttl`. `pid` and `hostname` are
/// diagnostics only — expiry never consults process liveness, because the
/// owner may live on the other side of a network filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Free-form identity of the lease holder
    pub owner: String,
    /// Acquisition time, unix seconds
    pub since: u64,
    /// Lease duration, seconds
    pub ttl: u64,
    /// Holder process id, for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Holder hostname, for diagnostics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl LockInfo {
    /// Build a lease for the current process
    #[must_use]
    pub fn new(owner: impl Into<String>, ttl: u64) -> Self {
        Self {
            owner: owner.into(),
            since: unix_now(),
            ttl,
            pid: Some(std::process::id()),
            hostname: hostname::get()
                .ok()
                .map(|h| h.to_string_lossy().into_owned()),
        }
    }

    /// Whether the lease has elapsed
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        unix_now() >= self.since.saturating_add(self.ttl)
    }

    /// Unix second at which the lease becomes inert
    #[inline]
    #[must_use]
    pub fn expires_at(&self) -> u64 {
        self.since.saturating_add(self.ttl)
    }
}

/// How an acquisition succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireKind {
    /// No lock existed
    Fresh,
    /// The caller already held a valid lease (re-entrant resume)
    Resumed,
    /// An expired lease from another owner was taken over
    Reclaimed,
}

/// Result of a successful acquisition
#[derive(Debug, Clone)]
pub struct Acquired {
    /// The lease now on disk
    pub info: LockInfo,
    /// How it was obtained
    pub kind: AcquireKind,
}

/// Per-change lease operations
///
/// Stateless: every call re-reads the lock file, so multiple engine
/// instances sharing the filesystem agree on who holds what. An in-process
/// cache would have to re-validate against disk anyway, so none is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockManager;

impl LockManager {
    /// Create a manager
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Lock file path for a change directory
    #[inline]
    #[must_use]
    pub fn lock_path(change_dir: &Path) -> PathBuf {
        change_dir.join(LOCK_FILE_NAME)
    }

    /// Acquire or resume the lease on `change_dir`
    ///
    /// Succeeds when no valid lock exists, the existing lock is expired, or
    /// the existing lock belongs to `owner` (the lease is refreshed with the
    /// requested `ttl`).
    ///
    /// # Errors
    /// - [`LockError::InvalidTtl`] for `ttl == 0`
    /// - [`LockError::Held`] when another owner holds a valid lease
    /// - [`LockError::Io`] when the lock file cannot be created or replaced
    pub fn acquire(
        &self,
        change_dir: &Path,
        owner: &str,
        ttl: u64,
    ) -> Result<Acquired, LockError> {
        if ttl == 0 {
            return Err(LockError::InvalidTtl);
        }
        let path = Self::lock_path(change_dir);
        let mut kind = AcquireKind::Fresh;

        for attempt in 0..ACQUIRE_ATTEMPTS {
            match self.try_create(&path, owner, ttl) {
                Ok(info) => {
                    tracing::info!(owner, path = %path.display(), ?kind, "lock acquired");
                    return Ok(Acquired { info, kind });
                }
                Err(CreateFailure::Exists) => {}
                Err(CreateFailure::Io(source)) => {
                    return Err(LockError::Io {
                        path: path.clone(),
                        source,
                    })
                }
            }

            match self.read(&path) {
                ReadOutcome::Valid(existing) if existing.owner == owner => {
                    // Re-entrant resume refreshes the lease in place.
                    let info = LockInfo::new(owner, ttl);
                    self.replace(&path, &info)?;
                    tracing::debug!(owner, path = %path.display(), "lock resumed");
                    return Ok(Acquired {
                        info,
                        kind: AcquireKind::Resumed,
                    });
                }
                ReadOutcome::Valid(existing) => {
                    return Err(LockError::Held(existing));
                }
                ReadOutcome::Expired(previous) => {
                    tracing::info!(
                        previous_owner = %previous.owner,
                        expired_at = previous.expires_at(),
                        "reclaiming expired lock"
                    );
                    kind = AcquireKind::Reclaimed;
                    self.remove(&path)?;
                }
                ReadOutcome::Corrupt => {
                    tracing::warn!(path = %path.display(), "corrupted lock file, recreating");
                    self.remove(&path)?;
                }
                ReadOutcome::Absent => {
                    // Raced with a release between create and read; retry.
                }
                ReadOutcome::Io(source) => {
                    return Err(LockError::Io {
                        path: path.clone(),
                        source,
                    })
                }
            }
            tracing::debug!(attempt, path = %path.display(), "retrying lock create");
        }

        // Every retry found the slot taken again: report the current holder.
        match self.read(&path) {
            ReadOutcome::Valid(existing) => Err(LockError::Held(existing)),
            _ => Err(LockError::Contended { path }),
        }
    }

    /// Release the lease if `owner` holds it
    ///
    /// Returns `true` if a lease was deleted. Releasing a lock held by
    /// someone else, an absent lock, or a corrupted lock is a no-op — an
    /// active lease must never be destroyed by a non-owner.
    ///
    /// # Errors
    /// [`LockError::Io`] if the owner's lease exists but cannot be deleted.
    pub fn release(&self, change_dir: &Path, owner: &str) -> Result<bool, LockError> {
        let path = Self::lock_path(change_dir);
        match self.read(&path) {
            ReadOutcome::Valid(info) | ReadOutcome::Expired(info) if info.owner == owner => {
                self.remove(&path)?;
                tracing::info!(owner, path = %path.display(), "lock released");
                Ok(true)
            }
            ReadOutcome::Io(source) => Err(LockError::Io { path, source }),
            _ => Ok(false),
        }
    }

    /// Current valid lease, if any
    ///
    /// Expired and corrupted locks are inert and report as `None`.
    #[must_use]
    pub fn is_held(&self, change_dir: &Path) -> Option<LockInfo> {
        match self.read(&Self::lock_path(change_dir)) {
            ReadOutcome::Valid(info) => Some(info),
            _ => None,
        }
    }

    /// Exclusive-create the lock file and write the lease
    fn try_create(&self, path: &Path, owner: &str, ttl: u64) -> Result<LockInfo, CreateFailure> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = match options.open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(CreateFailure::Exists)
            }
            Err(e) => return Err(CreateFailure::Io(e)),
        };

        let info = LockInfo::new(owner, ttl);
        let json = serde_json::to_vec_pretty(&info).map_err(io_from_serde)?;
        file.write_all(&json).map_err(CreateFailure::Io)?;
        file.sync_all().map_err(CreateFailure::Io)?;
        Ok(info)
    }

    /// Atomically replace an owned lease (temp file + rename)
    fn replace(&self, path: &Path, info: &LockInfo) -> Result<(), LockError> {
        let tmp = path.with_file_name(".lock.tmp");
        let write = || -> io::Result<()> {
            let mut options = OpenOptions::new();
            options.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            let mut file = options.open(&tmp)?;
            let json = serde_json::to_vec_pretty(info).map_err(io_from_serde_ref)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|source| LockError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read(&self, path: &Path) -> ReadOutcome {
        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<LockInfo>(&raw) {
                Ok(info) if info.is_expired() => ReadOutcome::Expired(info),
                Ok(info) => ReadOutcome::Valid(info),
                Err(_) => ReadOutcome::Corrupt,
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => ReadOutcome::Absent,
            Err(e) => ReadOutcome::Io(e),
        }
    }

    fn remove(&self, path: &Path) -> Result<(), LockError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

enum ReadOutcome {
    Valid(LockInfo),
    Expired(LockInfo),
    Corrupt,
    Absent,
    Io(io::Error),
}

enum CreateFailure {
    Exists,
    Io(io::Error),
}

fn io_from_serde(e: serde_json::Error) -> CreateFailure {
    CreateFailure::Io(io::Error::other(e))
}

fn io_from_serde_ref(e: serde_json::Error) -> io::Error {
    io::Error::other(e)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Errors from lease operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// A zero TTL would create an instantly-expired lease
    #[error("lock ttl must be greater than zero")]
    InvalidTtl,

    /// Another owner holds a valid lease; the record is attached so callers
    /// can display or contact the holder
    #[error("change is locked by '{}' until unix second {}", .0.owner, .0.expires_at())]
    Held(LockInfo),

    /// Lost the reclaim race repeatedly without observing a readable holder
    #[error("lock contended: {path}")]
    Contended { path: PathBuf },

    /// Filesystem failure
    #[error("lock io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn write_lock(dir: &Path, info: &LockInfo) {
        fs::write(
            LockManager::lock_path(dir),
            serde_json::to_vec_pretty(info).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn acquire_fresh_creates_lock_file() {
        let dir = change_dir();
        let manager = LockManager::new();
        let acquired = manager.acquire(dir.path(), "alice", 3600).unwrap();

        assert_eq!(acquired.kind, AcquireKind::Fresh);
        assert_eq!(acquired.info.owner, "alice");
        assert!(LockManager::lock_path(dir.path()).exists());
    }

    #[test]
    fn acquire_rejects_zero_ttl() {
        let dir = change_dir();
        let result = LockManager::new().acquire(dir.path(), "alice", 0);
        assert!(matches!(result, Err(LockError::InvalidTtl)));
    }

    #[test]
    fn second_owner_is_rejected_with_holder_info() {
        let dir = change_dir();
        let manager = LockManager::new();
        manager.acquire(dir.path(), "alice", 3600).unwrap();

        match manager.acquire(dir.path(), "bob", 3600) {
            Err(LockError::Held(info)) => {
                assert_eq!(info.owner, "alice");
                assert_eq!(info.ttl, 3600);
            }
            other => panic!("expected Held, got {other:?}"),
        }
    }

    #[test]
    fn same_owner_resumes() {
        let dir = change_dir();
        let manager = LockManager::new();
        manager.acquire(dir.path(), "alice", 3600).unwrap();
        let resumed = manager.acquire(dir.path(), "alice", 7200).unwrap();

        assert_eq!(resumed.kind, AcquireKind::Resumed);
        assert_eq!(resumed.info.ttl, 7200);
    }

    #[test]
    fn expired_lock_is_reclaimed() {
        let dir = change_dir();
        let expired = LockInfo {
            owner: "alice".to_string(),
            since: unix_now() - 100,
            ttl: 1,
            pid: None,
            hostname: None,
        };
        write_lock(dir.path(), &expired);

        let manager = LockManager::new();
        let acquired = manager.acquire(dir.path(), "bob", 3600).unwrap();
        assert_eq!(acquired.kind, AcquireKind::Reclaimed);
        assert_eq!(acquired.info.owner, "bob");
    }

    #[test]
    fn corrupted_lock_is_recreated() {
        let dir = change_dir();
        fs::write(LockManager::lock_path(dir.path()), b"not json at all").unwrap();

        let manager = LockManager::new();
        let acquired = manager.acquire(dir.path(), "alice", 3600).unwrap();
        assert_eq!(acquired.info.owner, "alice");
    }

    #[test]
    fn release_by_owner_deletes() {
        let dir = change_dir();
        let manager = LockManager::new();
        manager.acquire(dir.path(), "alice", 3600).unwrap();

        assert!(manager.release(dir.path(), "alice").unwrap());
        assert!(!LockManager::lock_path(dir.path()).exists());
    }

    #[test]
    fn release_by_other_owner_is_noop() {
        let dir = change_dir();
        let manager = LockManager::new();
        manager.acquire(dir.path(), "alice", 3600).unwrap();

        assert!(!manager.release(dir.path(), "bob").unwrap());
        assert!(LockManager::lock_path(dir.path()).exists());
    }

    #[test]
    fn release_absent_is_noop() {
        let dir = change_dir();
        assert!(!LockManager::new().release(dir.path(), "alice").unwrap());
    }

    #[test]
    fn is_held_reports_valid_lease_only() {
        let dir = change_dir();
        let manager = LockManager::new();
        assert!(manager.is_held(dir.path()).is_none());

        manager.acquire(dir.path(), "alice", 3600).unwrap();
        assert_eq!(manager.is_held(dir.path()).unwrap().owner, "alice");

        let expired = LockInfo {
            owner: "alice".to_string(),
            since: unix_now() - 100,
            ttl: 1,
            pid: None,
            hostname: None,
        };
        write_lock(dir.path(), &expired);
        assert!(manager.is_held(dir.path()).is_none());
    }

    #[test]
    fn concurrent_acquire_admits_exactly_one() {
        let dir = change_dir();
        let path = dir.path().to_path_buf();
        let manager = LockManager::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    LockManager::new()
                        .acquire(&path, &format!("owner-{i}"), 3600)
                        .is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&ok| ok)
            .count();
        assert_eq!(winners, 1);
        assert!(manager.is_held(&path).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn lock_file_has_restricted_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = change_dir();
        LockManager::new().acquire(dir.path(), "alice", 3600).unwrap();

        let mode = fs::metadata(LockManager::lock_path(dir.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn lock_info_serde_round_trip() {
        let info = LockInfo::new("alice", 60);
        let json = serde_json::to_string(&info).unwrap();
        let back: LockInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(info, back);
    }
}
