//! Cross-process FIFO mutex built on lock files in a shared directory.
//!
//! No IPC primitive beyond a shared filesystem is required: a waiter
//! announces itself by creating a zero-byte lock file, and the earliest
//! creation timestamp in the namespace wins. Lock files older than the
//! deadlock age are reclaimed by any waiter that observes them, so a
//! crashed holder cannot wedge the queue.
//!
//! # Ordering
//!
//! The namespace is sorted by `(creation time, path)`. Owner tokens are
//! unique, so two files never share a path; two files created within the
//! filesystem's timestamp resolution are ordered by path as a deterministic
//! tie-break. Ordering at clock-resolution granularity is a documented
//! weakness of the protocol, not a correctness guarantee.

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use uuid::Uuid;

use memovault_core::{LockError, MemoResult};

use super::KeyLock;

/// Default maximum tolerated age of any lock file before reclamation.
pub const DEFAULT_DEADLOCK_AGE: Duration = Duration::from_secs(3600);

/// Default interval between queue polls while waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Host component of owner tokens, resolved once per process.
static HOST: Lazy<String> = Lazy::new(|| {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
});

/// A filesystem-only mutual exclusion lock with FIFO acquisition order.
///
/// Each instance owns at most one lock file, named
/// `{prefix}_{key}_{hostname}_{token}`, in the shared lock directory. The
/// set of files sharing the `{prefix}_{key}_` name prefix is the wait
/// queue; ascending creation time is the acquisition order.
///
/// State machine: unlocked, then waiting (own file cast, not earliest),
/// then held (own file earliest), then unlocked again on release. Waiting
/// loops for as long as the key is contested.
pub struct FifoMutex {
    key: String,
    lock_prefix: String,
    lock_dir: PathBuf,
    deadlock_age: Duration,
    poll_interval: Duration,
    owner: String,
    held: bool,
}

impl FifoMutex {
    /// Create a mutex for `key` under `lock_prefix` in `lock_dir`.
    ///
    /// The owner token combines the host name with a fresh UUID, so it is
    /// unique across hosts, processes, and restarts.
    pub fn new(
        key: impl Into<String>,
        lock_prefix: impl Into<String>,
        lock_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key: key.into(),
            lock_prefix: lock_prefix.into(),
            lock_dir: lock_dir.into(),
            deadlock_age: DEFAULT_DEADLOCK_AGE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            owner: format!("{}_{}", *HOST, Uuid::now_v7().simple()),
            held: false,
        }
    }

    /// Set the age past which any waiter may reclaim a lock file. Must be
    /// well above the worst-case hold time of legitimate holders.
    pub fn with_deadlock_age(mut self, age: Duration) -> Self {
        self.deadlock_age = age;
        self
    }

    /// Set the poll interval. A newly-eligible waiter may sleep up to one
    /// full interval past the moment it becomes eligible.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The logical key this mutex guards.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// This instance's owner token.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// True while this instance holds the lock.
    pub fn held(&self) -> bool {
        self.held
    }

    /// `{prefix}_{key}` - the namespace all queue members share.
    fn full_prefix(&self) -> String {
        format!("{}_{}", self.lock_prefix, self.key)
    }

    /// Absolute path of this instance's lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.lock_dir
            .join(format!("{}_{}", self.full_prefix(), self.owner))
    }

    /// True if this instance's lock file currently exists.
    pub fn check(&self) -> bool {
        self.lock_path().exists()
    }

    /// Create this instance's lock file.
    ///
    /// Recasting after external removal re-enters the queue at the back
    /// with a fresh timestamp; a reaped waiter does not jump the line.
    fn cast(&self) -> MemoResult<()> {
        let path = self.lock_path();
        std::fs::create_dir_all(&self.lock_dir).map_err(|source| LockError::Cast {
            path: path.clone(),
            source,
        })?;
        std::fs::File::create(&path).map_err(|source| LockError::Cast { path, source })?;
        Ok(())
    }

    /// All queue members, ascending by `(creation time, path)`.
    ///
    /// A competitor's file can vanish between listing and stat; such
    /// entries are skipped rather than reported as failures.
    fn namespace(&self) -> MemoResult<Vec<(DateTime<Utc>, PathBuf)>> {
        let member_prefix = format!("{}_", self.full_prefix());
        let entries = std::fs::read_dir(&self.lock_dir).map_err(|source| LockError::Namespace {
            dir: self.lock_dir.clone(),
            source,
        })?;

        let mut queue = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LockError::Namespace {
                dir: self.lock_dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !name.starts_with(&member_prefix) {
                continue;
            }

            let path = entry.path();
            match created_at(&path) {
                Ok(timestamp) => queue.push((timestamp, path)),
                Err(source) if source.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(LockError::Timestamp { path, source }.into()),
            }
        }

        queue.sort();
        Ok(queue)
    }

    /// Cast, then poll until this instance's file is the earliest entry.
    fn wait_for_lock(&mut self) -> MemoResult<()> {
        self.cast()?;
        let own = self.lock_path();

        loop {
            let queue = self.namespace()?;
            let Some((cast_at, oldest)) = queue.first().cloned() else {
                // Even our own file is missing; rejoin the queue.
                self.cast()?;
                continue;
            };

            if oldest == own {
                break;
            }

            tracing::debug!(
                key = %self.key,
                behind = %oldest.display(),
                "waiting for lock"
            );
            thread::sleep(self.poll_interval);

            // If our file was reaped while waiting, rejoin at the back.
            if !self.check() {
                tracing::debug!(key = %self.key, "own lock file vanished, recasting");
                self.cast()?;
            }

            let age = Utc::now()
                .signed_duration_since(cast_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if age > self.deadlock_age {
                tracing::warn!(
                    stale = %oldest.display(),
                    age_secs = age.as_secs(),
                    "reclaiming lock file past the deadlock age"
                );
                match std::fs::remove_file(&oldest) {
                    Ok(()) => {}
                    // Another waiter can reclaim it first.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => {
                        tracing::warn!(
                            stale = %oldest.display(),
                            error = %err,
                            "failed to reclaim stale lock file"
                        );
                    }
                }
            }
        }

        self.held = true;
        Ok(())
    }

    /// Acquire the lock and return a scoped guard that releases it on drop.
    pub fn lock(self) -> MemoResult<super::LockGuard> {
        super::LockGuard::acquire(Box::new(self))
    }

    /// Remove this instance's lock file.
    ///
    /// A missing file is expected when the lock was reclaimed as a
    /// deadlock; it is logged and swallowed, never escalated.
    pub fn unlock(&mut self) {
        self.held = false;
        let path = self.lock_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "lock file already gone on release");
            }
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to remove lock file on release"
                );
            }
        }
    }
}

impl KeyLock for FifoMutex {
    fn acquire(&mut self) -> MemoResult<()> {
        self.wait_for_lock()
    }

    fn release(&mut self) {
        self.unlock();
    }
}

/// Creation timestamp of a file, falling back to mtime on filesystems
/// without birth-time support. Lock files are never written after creation,
/// so the two coincide.
fn created_at(path: &Path) -> std::io::Result<DateTime<Utc>> {
    let metadata = std::fs::metadata(path)?;
    let timestamp = metadata.created().or_else(|_| metadata.modified())?;
    Ok(DateTime::<Utc>::from(timestamp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quick_mutex(dir: &Path, key: &str) -> FifoMutex {
        FifoMutex::new(key, "testlock", dir)
            .with_poll_interval(Duration::from_millis(10))
            .with_deadlock_age(Duration::from_secs(60))
    }

    #[test]
    fn test_lock_file_name_encodes_namespace_and_owner() {
        let dir = TempDir::new().unwrap();
        let mutex = quick_mutex(dir.path(), "alpha");
        let name = mutex
            .lock_path()
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(name.starts_with("testlock_alpha_"));
        assert!(name.contains(mutex.owner()));
    }

    #[test]
    fn test_owner_tokens_are_unique() {
        let dir = TempDir::new().unwrap();
        let a = quick_mutex(dir.path(), "alpha");
        let b = quick_mutex(dir.path(), "alpha");
        assert_ne!(a.owner(), b.owner());
        assert_ne!(a.lock_path(), b.lock_path());
    }

    #[test]
    fn test_uncontested_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let mut mutex = quick_mutex(dir.path(), "solo");

        mutex.acquire().unwrap();
        assert!(mutex.held());
        assert!(mutex.check());

        mutex.release();
        assert!(!mutex.held());
        assert!(!mutex.check());
    }

    #[test]
    fn test_release_without_file_does_not_panic() {
        let dir = TempDir::new().unwrap();
        let mut mutex = quick_mutex(dir.path(), "gone");
        mutex.acquire().unwrap();

        // Simulate deadlock reclamation by a third party.
        std::fs::remove_file(mutex.lock_path()).unwrap();
        mutex.release();
        mutex.release();
    }

    #[test]
    fn test_namespace_isolated_by_key() {
        let dir = TempDir::new().unwrap();
        let mut a = quick_mutex(dir.path(), "left");
        let mut b = quick_mutex(dir.path(), "right");

        // Unrelated keys must not queue behind each other.
        a.acquire().unwrap();
        b.acquire().unwrap();
        assert!(a.held() && b.held());
        a.release();
        b.release();
    }

    #[test]
    fn test_deadlock_reclamation_of_orphan() {
        let dir = TempDir::new().unwrap();

        // An orphaned competitor that will never release.
        let orphan = dir.path().join("testlock_stale_otherhost_deadbeef");
        std::fs::File::create(&orphan).unwrap();
        std::thread::sleep(Duration::from_millis(120));

        let mut mutex = FifoMutex::new("stale", "testlock", dir.path())
            .with_poll_interval(Duration::from_millis(10))
            .with_deadlock_age(Duration::from_millis(100));

        mutex.acquire().unwrap();
        assert!(mutex.held());
        assert!(!orphan.exists(), "stale lock file should be reclaimed");
        mutex.release();
    }
}
