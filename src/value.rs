//! Internal value model for data held in the remote tree.
//!
//! [`Value`] is a closed tagged union. Mapping keys are symbolic [`Key`]s
//! rather than raw strings; conversion to and from the wire happens in
//! [`crate::codec`].

use serde_json::Number;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TreeError};

/// A symbolic mapping key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Arc<str>);

impl Key {
    /// Create a key from its name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The key's name without the leading colon.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

impl Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

/// Associative mapping of symbolic keys to values.
pub type Mapping = BTreeMap<Key, Value>;

/// Data stored at a node of the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Absent data. Writing `Null` removes a node.
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Ordered list; element order is preserved.
    List(Vec<Value>),
    Map(Mapping),
}

impl Value {
    /// Build a mapping from `(key, value)` pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Key>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// True for absent data.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean, if this is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number as `i64`, if it is an integer in range.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// The number as `f64`, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// The string, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The elements, if this is a list.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// The entries, if this is a mapping.
    pub fn as_map(&self) -> Option<&Mapping> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a key in a mapping. Non-mappings have no keys.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|map| map.get(key))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl TryFrom<f64> for Value {
    type Error = TreeError;

    /// Non-finite floats have no wire representation and are rejected.
    fn try_from(n: f64) -> Result<Self> {
        Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| TreeError::Serialization(format!("{} is not a finite number", n)))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Mapping> for Value {
    fn from(map: Mapping) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = Key::from("score");
        assert_eq!(key.to_string(), ":score");
        assert_eq!(key.name(), "score");
        assert_eq!(format!("{:?}", key), ":score");
    }

    #[test]
    fn test_map_lookup_by_str() {
        let v = Value::map([("a", 1), ("b", 2)]);
        assert_eq!(v.get("a"), Some(&Value::from(1)));
        assert_eq!(v.get("missing"), None);
        assert_eq!(Value::from(3).get("a"), None);
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(7i64).as_i64(), Some(7));
        assert_eq!(Value::try_from(1.5).unwrap().as_f64(), Some(1.5));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(
            Value::from(vec![Value::from(1), Value::from(2)]).as_list().map(<[Value]>::len),
            Some(2)
        );
    }

    #[test]
    fn test_non_finite_float_is_rejected() {
        for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = Value::try_from(n).unwrap_err();
            assert!(matches!(err, TreeError::Serialization(_)));
        }
        assert_eq!(Value::try_from(-0.25).unwrap().as_f64(), Some(-0.25));
    }
}
