//! Cache-key derivation and argument hashing.
//!
//! A cache key is `{prefix}{delim}{function}{delim}{digest}`, where the
//! digest is a SHA-512 over the canonical serialization of the normalized
//! argument set. Normalization merges default keyword values into the
//! supplied keywords and drops ignored arguments, so that logically
//! identical calls always hash to the same key.
//!
//! # Canonical Form
//!
//! The hashed bytes are `serde_json::to_vec` of the pair
//! `(positionals, keywords)`. Keyword maps are `BTreeMap`s, so the byte
//! output is deterministic for a given logical argument set. Exactly one
//! hashing scheme exists in this codebase.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha512};

use crate::args::{to_value, CallArgs};
use crate::error::{KeyError, MemoResult};

/// Default separator between key segments.
///
/// Chosen so key segments collide with neither the hex digest alphabet nor
/// a filesystem path separator, keeping derived keys usable as file names.
pub const DEFAULT_DELIMITER: &str = "_";

/// Everything needed to derive a cache key from an argument set.
///
/// A `KeySpec` is fixed at engine construction: the wrapped function's name,
/// an optional namespace prefix, the segment delimiter, the ignore lists,
/// and the default keyword map.
#[derive(Debug, Clone)]
pub struct KeySpec {
    func_name: String,
    prefix: String,
    delim: String,
    ignore_args: BTreeSet<usize>,
    ignore_kwargs: BTreeSet<String>,
    default_kwargs: BTreeMap<String, Value>,
}

impl KeySpec {
    /// Create a spec for a function with no prefix, the default delimiter,
    /// and nothing ignored.
    pub fn new(func_name: impl Into<String>) -> Self {
        Self {
            func_name: func_name.into(),
            prefix: String::new(),
            delim: DEFAULT_DELIMITER.to_string(),
            ignore_args: BTreeSet::new(),
            ignore_kwargs: BTreeSet::new(),
            default_kwargs: BTreeMap::new(),
        }
    }

    /// Set the namespace prefix. An empty prefix is omitted from derived
    /// keys entirely rather than leaving an empty leading segment.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the segment delimiter.
    pub fn with_delimiter(mut self, delim: impl Into<String>) -> Self {
        self.delim = delim.into();
        self
    }

    /// Exclude a positional argument (by index) from hashing.
    pub fn ignore_positional(mut self, index: usize) -> Self {
        self.ignore_args.insert(index);
        self
    }

    /// Exclude a keyword argument (by name) from hashing.
    pub fn ignore_keyword(mut self, name: impl Into<String>) -> Self {
        self.ignore_kwargs.insert(name.into());
        self
    }

    /// Register a default keyword value.
    ///
    /// Defaults are merged into every hashed argument set, so a caller that
    /// omits the argument and a caller that passes the default explicitly
    /// produce the same key.
    pub fn default_kwarg<T: Serialize>(
        mut self,
        name: impl Into<String>,
        value: T,
    ) -> MemoResult<Self> {
        self.default_kwargs.insert(name.into(), to_value(value)?);
        Ok(self)
    }

    /// The wrapped function's name.
    pub fn func_name(&self) -> &str {
        &self.func_name
    }

    /// The namespace prefix (empty when unset).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Normalized (positional, keyword) view of an argument set: defaults
    /// merged in (supplied values win), ignored entries dropped.
    fn normalize(&self, args: &CallArgs) -> (Vec<Value>, BTreeMap<String, Value>) {
        let positional = args
            .positional()
            .iter()
            .enumerate()
            .filter(|(index, _)| !self.ignore_args.contains(index))
            .map(|(_, value)| value.clone())
            .collect();

        let mut keyword = self.default_kwargs.clone();
        keyword.extend(
            args.keyword()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        keyword.retain(|name, _| !self.ignore_kwargs.contains(name));

        (positional, keyword)
    }

    /// SHA-512 digest of the normalized argument set, as lowercase hex.
    pub fn digest(&self, args: &CallArgs) -> MemoResult<String> {
        let normalized = self.normalize(args);
        let bytes = serde_json::to_vec(&normalized).map_err(|e| KeyError::Unserializable {
            reason: e.to_string(),
        })?;

        let mut hasher = Sha512::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// The full cache key for an argument set.
    pub fn derive(&self, args: &CallArgs) -> MemoResult<String> {
        let base = format!("{}{}{}", self.func_name, self.delim, self.digest(args)?);
        if self.prefix.is_empty() {
            Ok(base)
        } else {
            Ok(format!("{}{}{}", self.prefix, self.delim, base))
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn build_args(values: &[i64]) -> CallArgs {
        let mut args = CallArgs::new();
        for v in values {
            args = args.arg(v).unwrap();
        }
        args
    }

    proptest! {
        /// Identical argument sets always hash to identical digests.
        #[test]
        fn prop_digest_deterministic(values in proptest::collection::vec(any::<i64>(), 0..8)) {
            let spec = KeySpec::new("f");
            let a = spec.digest(&build_args(&values)).unwrap();
            let b = spec.digest(&build_args(&values)).unwrap();
            prop_assert_eq!(a, b);
        }

        /// Distinct positional values produce distinct digests.
        #[test]
        fn prop_distinct_values_distinct_digest(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            let spec = KeySpec::new("f");
            let da = spec.digest(&build_args(&[a])).unwrap();
            let db = spec.digest(&build_args(&[b])).unwrap();
            prop_assert_ne!(da, db);
        }

        /// Keyword insertion order never changes the digest.
        #[test]
        fn prop_kwarg_order_irrelevant(x in any::<i32>(), y in any::<i32>()) {
            let spec = KeySpec::new("f");
            let ab = CallArgs::new().kwarg("a", x).unwrap().kwarg("b", y).unwrap();
            let ba = CallArgs::new().kwarg("b", y).unwrap().kwarg("a", x).unwrap();
            prop_assert_eq!(spec.digest(&ab).unwrap(), spec.digest(&ba).unwrap());
        }
    }
}
