// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Declared node configuration.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque key/value configuration attached to a declaration.
///
/// Keys are kept sorted, so two `Props` built in different insertion orders
/// compare equal. Equality is the engine's change policy: field-by-field over
/// the top-level entries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Props(BTreeMap<String, Value>);

impl Props {
    /// Empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts or replaces a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Reads a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Reads a string field.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Iterates fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no fields are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names of the fields whose values differ between `self` and `other`
    /// (including fields present on only one side), in key order.
    #[must_use]
    pub fn changed_fields<'a>(&'a self, other: &'a Self) -> Vec<&'a str> {
        let mut changed: Vec<&str> = Vec::new();
        for (k, v) in &self.0 {
            if other.0.get(k) != Some(v) {
                changed.push(k);
            }
        }
        for k in other.0.keys() {
            if !self.0.contains_key(k) {
                changed.push(k);
            }
        }
        changed.sort_unstable();
        changed
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Props {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insertion_order_is_irrelevant() {
        let a = Props::new().with("x", 1).with("y", "two");
        let b = Props::new().with("y", "two").with("x", 1);
        assert_eq!(a, b);
        assert!(a.changed_fields(&b).is_empty());
    }

    #[test]
    fn changed_fields_reports_both_sides() {
        let a = Props::new().with("x", 1).with("gone", true);
        let b = Props::new().with("x", 2).with("new", json!({"deep": 1}));
        assert_eq!(a.changed_fields(&b), vec!["gone", "new", "x"]);
    }
}
