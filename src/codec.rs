//! Conversion between wire values and the internal [`Value`] model.
//!
//! Wire values are plain `serde_json::Value`s with string keys. Hydration
//! retags object keys as symbolic [`Key`]s; serialization stringifies them
//! again. Lists and scalars pass through structurally unchanged, so the two
//! directions are exact inverses.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;
use crate::value::{Key, Value};

/// Wire representation used by the remote tree store.
pub type WireValue = serde_json::Value;

/// Convert a wire value into the internal model.
pub fn hydrate(wire: &WireValue) -> Value {
    match wire {
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(*b),
        WireValue::Number(n) => Value::Number(n.clone()),
        WireValue::String(s) => Value::String(s.clone()),
        WireValue::Array(items) => Value::List(items.iter().map(hydrate).collect()),
        WireValue::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (Key::new(k), hydrate(v)))
                .collect(),
        ),
    }
}

/// Consuming variant of [`hydrate`].
pub fn hydrate_owned(wire: WireValue) -> Value {
    match wire {
        WireValue::Null => Value::Null,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Number(n) => Value::Number(n),
        WireValue::String(s) => Value::String(s),
        WireValue::Array(items) => Value::List(items.into_iter().map(hydrate_owned).collect()),
        WireValue::Object(map) => Value::Map(
            map.into_iter()
                .map(|(k, v)| (Key::from(k), hydrate_owned(v)))
                .collect(),
        ),
    }
}

/// Convert an internal value back to its wire representation.
pub fn serialize(value: &Value) -> WireValue {
    match value {
        Value::Null => WireValue::Null,
        Value::Bool(b) => WireValue::Bool(*b),
        Value::Number(n) => WireValue::Number(n.clone()),
        Value::String(s) => WireValue::String(s.clone()),
        Value::List(items) => WireValue::Array(items.iter().map(serialize).collect()),
        Value::Map(map) => WireValue::Object(
            map.iter()
                .map(|(k, v)| (k.name().to_string(), serialize(v)))
                .collect(),
        ),
    }
}

/// Encode any serde-serializable type as a [`Value`].
pub fn to_value<T: Serialize + ?Sized>(data: &T) -> Result<Value> {
    Ok(hydrate_owned(serde_json::to_value(data)?))
}

/// Decode a [`Value`] into a serde-deserializable type.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> Result<T> {
    serde_json::from_value(serialize(value)).map_err(Into::into)
}

impl From<WireValue> for Value {
    fn from(wire: WireValue) -> Self {
        hydrate_owned(wire)
    }
}

impl From<&Value> for WireValue {
    fn from(value: &Value) -> Self {
        serialize(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn samples() -> Vec<WireValue> {
        vec![
            json!(null),
            json!(true),
            json!(false),
            json!(0),
            json!(-42),
            json!(u64::MAX),
            json!(3.25),
            json!("héllo wörld ✓"),
            json!({}),
            json!([]),
            json!({"a": {"b": {"c": 1}}}),
            json!([1, "two", 3.0, null]),
            json!({"users": [{"name": "ada", "tags": ["x", "y"]}, {"name": "bo"}], "n": null}),
        ]
    }

    #[test]
    fn test_wire_round_trip() {
        for wire in samples() {
            assert_eq!(serialize(&hydrate(&wire)), wire);
            assert_eq!(serialize(&hydrate_owned(wire.clone())), wire);
        }
    }

    #[test]
    fn test_value_round_trip() {
        for wire in samples() {
            let value = hydrate(&wire);
            assert_eq!(hydrate(&serialize(&value)), value);
        }
    }

    #[test]
    fn test_keys_become_symbolic() {
        let value = hydrate(&json!({"a": {"b": 1}}));
        let inner = value.get("a").and_then(|v| v.get("b"));
        assert_eq!(inner, Some(&Value::from(1)));
        assert!(value.as_map().unwrap().contains_key(&Key::from("a")));
    }

    #[test]
    fn test_list_order_preserved() {
        let value = hydrate(&json!(["z", "a", "m"]));
        let items: Vec<&str> = value
            .as_list()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert_eq!(items, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_scalars_unchanged() {
        assert_eq!(hydrate(&json!("s")), Value::from("s"));
        assert_eq!(serialize(&Value::from(12)), json!(12));
        assert_eq!(serialize(&Value::Null), json!(null));
    }

    #[test]
    fn test_typed_helpers() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Player {
            name: String,
            score: i64,
        }

        let player = Player {
            name: "ada".to_string(),
            score: 9,
        };
        let value = to_value(&player).unwrap();
        assert_eq!(value.get("score"), Some(&Value::from(9)));

        let back: Player = from_value(&value).unwrap();
        assert_eq!(back, player);

        let err = from_value::<Player>(&Value::from(1)).unwrap_err();
        assert!(matches!(err, crate::TreeError::Serialization(_)));
    }
}
