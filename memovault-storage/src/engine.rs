//! The memoization engine: key derivation, locking, fetch-or-compute.
//!
//! [`Memoizer`] makes a function's results durable across invocations with
//! at-most-one computation per distinct argument set, even when concurrent
//! callers race on the same key. Persistence is delegated to a
//! [`StorageBackend`]; the engine never touches a medium directly.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use memovault_core::{BackendError, CallArgs, KeySpec, MemoResult};

use crate::backend::StorageBackend;
use crate::lock::LockGuard;

/// Traffic counters, updated with relaxed atomics.
#[derive(Debug, Default)]
struct MemoStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time snapshot of the engine's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStatsSnapshot {
    /// Calls answered from the backend.
    pub hits: u64,
    /// Calls that invoked the wrapped function.
    pub misses: u64,
    /// Entries written to the backend.
    pub stores: u64,
    /// Entries removed by invalidation.
    pub invalidations: u64,
}

impl MemoStatsSnapshot {
    /// Hit rate over all cache consultations (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Memoizes a function's results through a [`StorageBackend`].
///
/// The wrapped function takes a [`CallArgs`] and returns its result
/// directly; panics unwind through the engine unchanged (the key's lock
/// guard still releases on the way out). Results must round-trip through
/// serde so hits can be reconstructed from the backend.
///
/// # Duplicate Keys
///
/// [`put`](Self::put) refuses to overwrite an existing entry and reports
/// [`BackendError::Duplicate`]; invalidate first to replace a value. This
/// engine never silently overwrites.
///
/// # Example
///
/// ```ignore
/// let engine = Memoizer::new(
///     |args| args.positional()[0].as_i64().unwrap().pow(2),
///     "square",
///     JsonFileBackend::new("/var/cache/memovault"),
/// );
/// let out = engine.run(&CallArgs::new().arg(5)?)?; // computed once, then cached
/// ```
pub struct Memoizer<B, F, T> {
    backend: B,
    func: F,
    spec: KeySpec,
    invalidate: bool,
    stats: MemoStats,
    _output: PhantomData<fn() -> T>,
}

impl<B, F, T> Memoizer<B, F, T>
where
    B: StorageBackend,
    F: Fn(&CallArgs) -> T,
    T: Serialize + DeserializeOwned,
{
    /// Wrap `func`, identified by `func_name`, over `backend`.
    pub fn new(func: F, func_name: impl Into<String>, backend: B) -> Self {
        Self {
            backend,
            func,
            spec: KeySpec::new(func_name),
            invalidate: false,
            stats: MemoStats::default(),
            _output: PhantomData,
        }
    }

    /// Set the cache-key namespace prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.spec = self.spec.with_prefix(prefix);
        self
    }

    /// Set the key-segment delimiter.
    pub fn with_delimiter(mut self, delim: impl Into<String>) -> Self {
        self.spec = self.spec.with_delimiter(delim);
        self
    }

    /// Exclude a positional argument (by index) from key hashing.
    pub fn ignore_positional(mut self, index: usize) -> Self {
        self.spec = self.spec.ignore_positional(index);
        self
    }

    /// Exclude a keyword argument (by name) from key hashing.
    pub fn ignore_keyword(mut self, name: impl Into<String>) -> Self {
        self.spec = self.spec.ignore_keyword(name);
        self
    }

    /// Register a default keyword value, hashed whether or not the caller
    /// supplies it.
    pub fn default_kwarg<V: Serialize>(
        mut self,
        name: impl Into<String>,
        value: V,
    ) -> MemoResult<Self> {
        self.spec = self.spec.default_kwarg(name, value)?;
        Ok(self)
    }

    /// When set, every call deletes any existing entry before running, so
    /// the wrapped function executes unconditionally.
    pub fn invalidate_on_call(mut self, invalidate: bool) -> Self {
        self.invalidate = invalidate;
        self
    }

    /// The backend this engine persists through.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The key spec this engine derives keys with.
    pub fn spec(&self) -> &KeySpec {
        &self.spec
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> MemoStatsSnapshot {
        MemoStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            stores: self.stats.stores.load(Ordering::Relaxed),
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
        }
    }

    /// The cache key for an argument set.
    pub fn key(&self, args: &CallArgs) -> MemoResult<String> {
        self.spec.derive(args)
    }

    /// A scoped guard over the key's lock, already acquired.
    pub fn lock(&self, key: &str) -> MemoResult<LockGuard> {
        LockGuard::acquire(self.backend.lock(key))
    }

    /// Fetch-or-compute.
    ///
    /// The key's lock is held across the whole check, compute, store
    /// sequence, so concurrent callers of the same argument set compute at
    /// most once between them. A hit is decided by the backend's `check`,
    /// never by inspecting the fetched value, so a legitimately-null result
    /// is still a hit. The wrapped function receives the caller's original
    /// arguments, not the normalized set used for hashing.
    pub fn run(&self, args: &CallArgs) -> MemoResult<T> {
        let key = self.spec.derive(args)?;

        if self.invalidate {
            self.remove_entry(&key)?;
        }

        let _guard = self.lock(&key)?;

        if self.backend.check(&key)? {
            let raw = self.backend.fetch(&key)?;
            let value = self.deserialize(&key, raw)?;
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(%key, "cache hit");
            return Ok(value);
        }

        tracing::debug!(%key, "cache miss");
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let value = (self.func)(args);
        let raw = self.serialize(&key, &value)?;
        self.backend.store(&key, &raw)?;
        self.stats.stores.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    /// Locked read of an existing entry; `None` when the key is absent.
    pub fn get(&self, key: &str) -> MemoResult<Option<T>> {
        let _guard = self.lock(key)?;
        if !self.backend.check(key)? {
            return Ok(None);
        }
        let raw = self.backend.fetch(key)?;
        Ok(Some(self.deserialize(key, raw)?))
    }

    /// Locked write of a precomputed value.
    ///
    /// Returns the value unchanged so `put` can sit at the end of a call
    /// chain.
    ///
    /// # Errors
    ///
    /// [`BackendError::Duplicate`] when an entry already exists under `key`.
    pub fn put(&self, key: &str, value: T) -> MemoResult<T> {
        let raw = self.serialize(key, &value)?;
        let _guard = self.lock(key)?;
        if self.backend.check(key)? {
            return Err(BackendError::Duplicate {
                key: key.to_string(),
            }
            .into());
        }
        self.backend.store(key, &raw)?;
        self.stats.stores.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    /// Remove the entry for an argument set, tolerating its absence.
    pub fn invalidate(&self, args: &CallArgs) -> MemoResult<()> {
        let key = self.spec.derive(args)?;
        self.remove_entry(&key)
    }

    /// Remove the entry under `key`.
    ///
    /// A missing key propagates as [`BackendError::NotFound`]: deleting
    /// nothing on direct request is a caller error, unlike opportunistic
    /// invalidation.
    pub fn delete(&self, key: &str) -> MemoResult<()> {
        self.backend.delete(key)
    }

    /// Delete swallowing the missing-key case.
    fn remove_entry(&self, key: &str) -> MemoResult<()> {
        match self.backend.delete(key) {
            Ok(()) => {
                self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%key, "invalidated cache entry");
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn serialize(&self, key: &str, value: &T) -> MemoResult<Value> {
        serde_json::to_value(value).map_err(|e| {
            BackendError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn deserialize(&self, key: &str, raw: Value) -> MemoResult<T> {
        serde_json::from_value(raw).map_err(|e| {
            BackendError::Serialization {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}
