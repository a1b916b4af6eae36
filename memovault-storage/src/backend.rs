//! Storage backend capability trait and the in-memory reference backend.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use memovault_core::{BackendError, MemoResult};

use crate::lock::{InProcessLock, KeyLock};

/// Persistence capability consumed by the memoization engine.
///
/// `check`, `fetch`, `store`, and `delete` are required: a backend that
/// cannot provide one of them does not compile, which is the failure mode
/// for an unimplemented persistence contract. `lock` has a default body
/// returning in-process mutual exclusion; backends whose medium is shared
/// between processes override it with a lock that spans them (see
/// [`JsonFileBackend`](crate::json_file::JsonFileBackend)).
pub trait StorageBackend: Send + Sync {
    /// Does an entry exist under `key`?
    fn check(&self, key: &str) -> MemoResult<bool>;

    /// Read the entry under `key`.
    ///
    /// The result is only defined when [`check`](Self::check) is true;
    /// backends report a missing entry as [`BackendError::NotFound`].
    fn fetch(&self, key: &str) -> MemoResult<Value>;

    /// Create or overwrite the entry under `key`.
    fn store(&self, key: &str, value: &Value) -> MemoResult<()>;

    /// Remove the entry under `key`.
    ///
    /// Returns [`BackendError::NotFound`] when there is nothing to remove;
    /// callers doing opportunistic cleanup tolerate that case themselves.
    fn delete(&self, key: &str) -> MemoResult<()>;

    /// Mutual exclusion for `key`.
    ///
    /// The default is sufficient for concurrent callers within one process.
    fn lock(&self, key: &str) -> Box<dyn KeyLock> {
        Box::new(InProcessLock::new(key))
    }
}

/// In-memory backend: a `HashMap` behind an `RwLock`.
///
/// Entries live only for the lifetime of the process. Uses the default
/// in-process lock.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for MemoryBackend {
    fn check(&self, key: &str) -> MemoResult<bool> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key))
    }

    fn fetch(&self, key: &str) -> MemoResult<Value> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(|| {
                BackendError::NotFound {
                    key: key.to_string(),
                }
                .into()
            })
    }

    fn store(&self, key: &str, value: &Value) -> MemoResult<()> {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> MemoResult<()> {
        match self
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
        {
            Some(_) => Ok(()),
            None => Err(BackendError::NotFound {
                key: key.to_string(),
            }
            .into()),
        }
    }
}
