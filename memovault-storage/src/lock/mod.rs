//! Lock hierarchy: scoped guards, the in-process default, and the
//! cross-process FIFO file mutex.

pub mod fifo;

pub use fifo::FifoMutex;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use once_cell::sync::Lazy;

use memovault_core::MemoResult;

/// A mutual-exclusion primitive scoped to one cache key.
///
/// `acquire` blocks until the lock is held. `release` never fails:
/// releasing a lock that is already gone is a no-op, so scoped release can
/// run unconditionally on every exit path.
pub trait KeyLock: Send {
    /// Block until the lock is held.
    fn acquire(&mut self) -> MemoResult<()>;

    /// Relinquish the lock.
    fn release(&mut self);
}

/// Scoped acquisition: acquires on construction, releases on drop.
///
/// Dropping the guard releases the lock on every control path, including
/// unwinds out of the wrapped computation.
pub struct LockGuard {
    lock: Box<dyn KeyLock>,
}

impl LockGuard {
    /// Acquire `lock` and return a guard that releases it when dropped.
    pub fn acquire(mut lock: Box<dyn KeyLock>) -> MemoResult<Self> {
        lock.acquire()?;
        Ok(Self { lock })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

/// Binary semaphore: a held flag guarded by a mutex, plus a condvar to wake
/// waiters on release.
#[derive(Default)]
struct KeySemaphore {
    held: Mutex<bool>,
    cond: Condvar,
}

/// Process-wide registry of per-key semaphores backing [`InProcessLock`].
/// Entries are never reclaimed; the population is bounded by the distinct
/// keys memoized within one process.
static KEY_SEMAPHORES: Lazy<Mutex<HashMap<String, Arc<KeySemaphore>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// In-process mutual exclusion for one cache key.
///
/// The default lock for backends that declare no cross-process locking
/// need. All instances created for the same key share one semaphore, so
/// concurrent threads memoizing the same key exclude each other; instances
/// for different keys are independent.
pub struct InProcessLock {
    semaphore: Arc<KeySemaphore>,
    held: bool,
}

impl InProcessLock {
    /// Create a lock instance for `key`, sharing the key's semaphore with
    /// every other instance in this process.
    pub fn new(key: &str) -> Self {
        let semaphore = {
            let mut registry = KEY_SEMAPHORES.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(registry.entry(key.to_string()).or_default())
        };
        Self {
            semaphore,
            held: false,
        }
    }
}

impl KeyLock for InProcessLock {
    fn acquire(&mut self) -> MemoResult<()> {
        let mut held = self
            .semaphore
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while *held {
            held = self
                .semaphore
                .cond
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        *held = true;
        self.held = true;
        Ok(())
    }

    fn release(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        let mut held = self
            .semaphore
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *held = false;
        self.semaphore.cond.notify_one();
    }
}
