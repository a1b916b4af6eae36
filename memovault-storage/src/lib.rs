//! Memovault Storage - Backends, Locks, and the Memoization Engine
//!
//! The storage abstraction layer for memovault. Defines the capability
//! trait concrete backends implement, the lock hierarchy (in-process
//! default and cross-process FIFO file mutex), and the engine that
//! orchestrates key derivation, locking, and fetch-or-compute.

pub mod backend;
pub mod engine;
pub mod json_file;
pub mod lock;

pub use backend::{MemoryBackend, StorageBackend};
pub use engine::{MemoStatsSnapshot, Memoizer};
pub use json_file::JsonFileBackend;
pub use lock::{FifoMutex, InProcessLock, KeyLock, LockGuard};

// Re-export core types so callers need only one crate.
pub use memovault_core::{
    BackendError, CallArgs, KeyError, KeySpec, LockError, MemoError, MemoResult,
};
