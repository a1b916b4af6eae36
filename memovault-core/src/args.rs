//! Call-argument model for memoized functions.
//!
//! A memoized call is identified by its positional and keyword arguments.
//! `CallArgs` reifies both as JSON values so argument sets can be normalized
//! and hashed deterministically, independent of the wrapped function's
//! concrete parameter types.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::error::{KeyError, MemoResult};

/// The positional and keyword arguments of one memoized call.
///
/// Keyword arguments live in a `BTreeMap`, so their serialized order is
/// deterministic regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: BTreeMap<String, Value>,
}

impl CallArgs {
    /// An empty argument set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Unserializable`] when the value cannot be
    /// represented as JSON (e.g. a map with non-string keys).
    pub fn arg<T: Serialize>(mut self, value: T) -> MemoResult<Self> {
        self.positional.push(to_value(value)?);
        Ok(self)
    }

    /// Set a keyword argument. Setting the same name twice keeps the last
    /// value.
    pub fn kwarg<T: Serialize>(mut self, name: impl Into<String>, value: T) -> MemoResult<Self> {
        self.keyword.insert(name.into(), to_value(value)?);
        Ok(self)
    }

    /// The positional arguments in call order.
    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// The keyword arguments, sorted by name.
    pub fn keyword(&self) -> &BTreeMap<String, Value> {
        &self.keyword
    }

    /// Look up a keyword argument by name.
    pub fn get_kwarg(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    /// True when no arguments have been supplied.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }
}

/// Serialize a value into its JSON representation for hashing.
pub(crate) fn to_value<T: Serialize>(value: T) -> MemoResult<Value> {
    serde_json::to_value(value).map_err(|e| {
        KeyError::Unserializable {
            reason: e.to_string(),
        }
        .into()
    })
}
