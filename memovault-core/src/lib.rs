//! Memovault Core - Argument Model and Key Derivation
//!
//! Pure types and logic with no I/O: the call-argument model, cache-key
//! derivation and hashing, and the error taxonomy. The storage layer and
//! every backend depend on this crate.

pub mod args;
pub mod error;
pub mod key;

pub use args::CallArgs;
pub use error::{BackendError, KeyError, LockError, MemoError, MemoResult};
pub use key::{KeySpec, DEFAULT_DELIMITER};
