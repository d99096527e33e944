//! Structured value model carried on topics and across the mesh.
//!
//! [`Value`] is a closed tagged union. Its text form is JSON: integers and
//! floats keep their distinction through the number syntax, and raw bytes
//! travel as the single-key object `{"$bytes": "<hex>"}`. A user object whose
//! only key is `$bytes` (or `$$bytes`, ...) gains one extra leading `$` on the
//! wire, so every object still reads back as an object.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Error as _, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Object key used to carry [`Value::Bytes`] through JSON.
pub const BYTES_KEY: &str = "$bytes";

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Bytes(Vec<u8>),
}

impl Value {
    /// Build an empty object.
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// Short label for the variant, used as a default topic type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Bytes(_) => "bytes",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Look up a key when this value is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Serialize to the JSON text form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the JSON text form.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "<{}>", self.type_name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Self::Object(v)
    }
}

// ---------------------------------------------------------------------------
// Serde
// ---------------------------------------------------------------------------

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => s.serialize_unit(),
            Self::Bool(b) => s.serialize_bool(*b),
            Self::Int(i) => s.serialize_i64(*i),
            // JSON has no NaN or infinities.
            Self::Float(f) if !f.is_finite() => s.serialize_unit(),
            Self::Float(f) => s.serialize_f64(*f),
            Self::String(v) => s.serialize_str(v),
            Self::Array(items) => {
                let mut seq = s.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Object(map) => {
                let mut out = s.serialize_map(Some(map.len()))?;
                match sole_entry(map) {
                    Some((k, v)) if is_bytes_key(k) => {
                        out.serialize_entry(&format!("${k}"), v)?;
                    }
                    _ => {
                        for (k, v) in map {
                            out.serialize_entry(k, v)?;
                        }
                    }
                }
                out.end()
            }
            Self::Bytes(bytes) => {
                let mut out = s.serialize_map(Some(1))?;
                out.serialize_entry(BYTES_KEY, &hex::encode(bytes))?;
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        d.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Value, D::Error> {
        Value::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => Value::Int(i),
            Err(_) => Value::Float(v as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((k, v)) = access.next_entry::<String, Value>()? {
            map.insert(k, v);
        }

        let escaped = match sole_entry(&map) {
            Some((k, Value::String(encoded))) if k == BYTES_KEY => {
                let bytes = hex::decode(encoded).map_err(A::Error::custom)?;
                return Ok(Value::Bytes(bytes));
            }
            Some((k, _)) if k.len() > BYTES_KEY.len() && is_bytes_key(k) => Some(k.clone()),
            _ => None,
        };
        if let Some(key) = escaped {
            if let Some(v) = map.remove(&key) {
                map.insert(key[1..].to_string(), v);
            }
        }
        Ok(Value::Object(map))
    }
}

fn sole_entry(map: &BTreeMap<String, Value>) -> Option<(&String, &Value)> {
    if map.len() == 1 {
        map.iter().next()
    } else {
        None
    }
}

/// `$bytes` preceded by any number of extra `$`.
fn is_bytes_key(key: &str) -> bool {
    key.strip_suffix("bytes")
        .is_some_and(|prefix| !prefix.is_empty() && prefix.bytes().all(|b| b == b'$'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: &Value) -> Value {
        Value::from_json(&v.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_scalar_roundtrip() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-42),
            Value::Int(i64::MAX),
            Value::Float(3.14),
            Value::Float(21.0),
            Value::String("hello world".into()),
        ] {
            assert_eq!(roundtrip(&v), v);
        }
    }

    #[test]
    fn test_int_and_float_stay_distinct() {
        assert_eq!(Value::from_json("1").unwrap(), Value::Int(1));
        assert_eq!(Value::from_json("1.0").unwrap(), Value::Float(1.0));
        assert_eq!(Value::Float(2.0).to_json().unwrap(), "2.0");
    }

    #[test]
    fn test_bytes_roundtrip() {
        let v = Value::Bytes(vec![0x00, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(v.to_json().unwrap(), r#"{"$bytes":"00deadbeef"}"#);
        assert_eq!(roundtrip(&v), v);
    }

    #[test]
    fn test_nested_roundtrip() {
        let mut map = BTreeMap::new();
        map.insert("list".to_string(), Value::Array(vec![1.into(), 2.into(), "hello".into()]));
        map.insert("raw".to_string(), Value::Bytes(vec![1, 2, 3]));
        map.insert("none".to_string(), Value::Null);
        let v = Value::Object(map);
        assert_eq!(roundtrip(&v), v);

        // Objects that look like the bytes encoding stay objects.
        for key in ["$bytes", "$$bytes", "$$$bytes"] {
            let mut lookalike = BTreeMap::new();
            lookalike.insert(key.to_string(), Value::from("cafe"));
            let v = Value::Object(lookalike);
            assert_eq!(roundtrip(&v), v);
        }
    }

    #[test]
    fn test_bytes_lookalike_is_escaped_on_the_wire() {
        let mut map = BTreeMap::new();
        map.insert(BYTES_KEY.to_string(), Value::from("cafe"));
        assert_eq!(Value::Object(map).to_json().unwrap(), r#"{"$$bytes":"cafe"}"#);
        assert_eq!(
            Value::from_json(r#"{"$$bytes":"cafe"}"#).unwrap().get(BYTES_KEY),
            Some(&Value::from("cafe"))
        );
    }

    #[test]
    fn test_bytes_key_with_other_keys_is_object() {
        let v = Value::from_json(r#"{"$bytes":"00","x":1}"#).unwrap();
        assert!(matches!(v, Value::Object(_)));
    }

    #[test]
    fn test_invalid_bytes_hex_is_error() {
        assert!(Value::from_json(r#"{"$bytes":"zz"}"#).is_err());
    }

    #[test]
    fn test_non_finite_float_serializes_as_null() {
        assert_eq!(Value::Float(f64::NAN).to_json().unwrap(), "null");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::from(21.5).as_f64(), Some(21.5));
        assert_eq!(Value::from(7).as_f64(), Some(7.0));
        assert_eq!(Value::from("t").as_str(), Some("t"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::Null.as_i64(), None);
        assert_eq!(Value::from(vec![9u8]).type_name(), "bytes");
    }
}
