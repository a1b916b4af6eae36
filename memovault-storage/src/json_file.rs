//! JSON-file storage backend.
//!
//! One `{key}.json` per cache entry in a shared directory. Because that
//! directory may be shared between processes, the lock override returns a
//! [`FifoMutex`] scoped to the cache key instead of the in-process default;
//! this is what upgrades the engine to safe multi-process operation.
//!
//! Keys are used verbatim as file names; the engine's default delimiter
//! keeps derived keys free of path separators.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use memovault_core::{BackendError, MemoResult};

use crate::backend::StorageBackend;
use crate::lock::fifo::{DEFAULT_DEADLOCK_AGE, DEFAULT_POLL_INTERVAL};
use crate::lock::{FifoMutex, KeyLock};

/// Default prefix for lock files cast by this backend.
pub const DEFAULT_LOCK_PREFIX: &str = "mvlock";

/// Filesystem-backed cache of JSON entries.
///
/// Lock files live in the cache directory unless a separate lock directory
/// is configured. Directories are created on first use.
pub struct JsonFileBackend {
    cache_dir: PathBuf,
    lock_dir: PathBuf,
    lock_prefix: String,
    deadlock_age: Duration,
    poll_interval: Duration,
}

impl JsonFileBackend {
    /// Create a backend rooted at `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            lock_dir: cache_dir.clone(),
            cache_dir,
            lock_prefix: DEFAULT_LOCK_PREFIX.to_string(),
            deadlock_age: DEFAULT_DEADLOCK_AGE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Keep lock files in a directory other than the cache directory.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    /// Set the lock-file prefix.
    pub fn with_lock_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = prefix.into();
        self
    }

    /// Set the deadlock age for locks cast by this backend.
    pub fn with_deadlock_age(mut self, age: Duration) -> Self {
        self.deadlock_age = age;
        self
    }

    /// Set the poll interval for locks cast by this backend.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The directory cache entries are stored in.
    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    /// Path of the entry stored under `key`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    fn io_error(key: &str, source: std::io::Error) -> BackendError {
        match source.kind() {
            ErrorKind::NotFound => BackendError::NotFound {
                key: key.to_string(),
            },
            _ => BackendError::Io {
                key: key.to_string(),
                source,
            },
        }
    }
}

impl StorageBackend for JsonFileBackend {
    fn check(&self, key: &str) -> MemoResult<bool> {
        Ok(self.entry_path(key).exists())
    }

    fn fetch(&self, key: &str) -> MemoResult<Value> {
        let path = self.entry_path(key);
        let bytes = fs::read(&path).map_err(|e| Self::io_error(key, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            BackendError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn store(&self, key: &str, value: &Value) -> MemoResult<()> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| Self::io_error(key, e))?;
        let bytes = serde_json::to_vec(value).map_err(|e| BackendError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(self.entry_path(key), bytes).map_err(|e| Self::io_error(key, e))?;
        tracing::debug!(%key, dir = %self.cache_dir.display(), "stored cache entry");
        Ok(())
    }

    fn delete(&self, key: &str) -> MemoResult<()> {
        fs::remove_file(self.entry_path(key)).map_err(|e| Self::io_error(key, e).into())
    }

    fn lock(&self, key: &str) -> Box<dyn KeyLock> {
        Box::new(
            FifoMutex::new(key, self.lock_prefix.clone(), self.lock_dir.clone())
                .with_deadlock_age(self.deadlock_age)
                .with_poll_interval(self.poll_interval),
        )
    }
}
