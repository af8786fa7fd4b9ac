//! The key/value input handed to a stage.

use crate::parser::JsonMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Untyped input for one stage.
///
/// Each stage declares which keys it requires; there is no global schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageInput {
    values: JsonMap,
    /// Keys carrying an earlier stage's payload.
    #[serde(skip)]
    bound: BTreeSet<String>,
}

impl StageInput {
    /// Creates an empty input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the conventional `{"text": ...}` input.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new().with("text", Value::String(text.into()))
    }

    /// Adds a key, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts a key, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        self.bound.remove(&key);
        self.values.insert(key, value.into())
    }

    /// Inserts the payload of an earlier stage under `key`.
    ///
    /// A bound payload counts as present even when it is an empty object, so
    /// a degraded upstream stage never fails the stages that consume it.
    pub fn bind(&mut self, key: impl Into<String>, payload: Value) {
        let key = key.into();
        if payload.is_null() {
            self.bound.remove(&key);
        } else {
            self.bound.insert(key.clone());
        }
        self.values.insert(key, payload);
    }

    /// Gets a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Gets a string value.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Returns true if `key` is present and non-empty.
    #[must_use]
    pub fn has_value(&self, key: &str) -> bool {
        self.values
            .get(key)
            .is_some_and(|v| !is_blank(v) || (self.bound.contains(key) && !v.is_null()))
    }

    /// Returns the keys of `required` that are absent or empty, in order.
    #[must_use]
    pub fn missing_keys<S: AsRef<str>>(&self, required: &[S]) -> Vec<String> {
        required
            .iter()
            .map(AsRef::as_ref)
            .filter(|key| !self.has_value(key))
            .map(str::to_string)
            .collect()
    }

    /// Returns true if there are no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Iterates over the keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Borrows the underlying map.
    #[must_use]
    pub const fn as_map(&self) -> &JsonMap {
        &self.values
    }

    /// Consumes the input, returning the underlying map.
    #[must_use]
    pub fn into_map(self) -> JsonMap {
        self.values
    }
}

/// Null, whitespace-only strings and empty containers count as absent.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

impl From<JsonMap> for StageInput {
    fn from(map: JsonMap) -> Self {
        Self {
            values: map,
            bound: BTreeSet::new(),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for StageInput {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Self::from(iter.into_iter().map(|(k, v)| (k.into(), v)).collect::<JsonMap>())
    }
}
