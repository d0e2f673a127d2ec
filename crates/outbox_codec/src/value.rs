//! Dynamic payload values.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// The fields of one entity, keyed by field name.
pub type Document = BTreeMap<String, Value>;

/// Builds a [`Document`] from `(name, value)` pairs.
pub fn document<I, K>(pairs: I) -> Document
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// A dynamic field value.
///
/// Values serialize as native CBOR items (a `Text` is a CBOR text string, a
/// `Map` a CBOR map with text keys), so partitions and wire messages stay
/// readable by any CBOR tool.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// Null value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// Nested document.
    Map(Document),
}

impl Value {
    /// Returns the text if this is a `Text` value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Integer` value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the boolean if this is a `Bool` value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the nested document if this is a `Map` value.
    pub fn as_map(&self) -> Option<&Document> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns true if this is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn to_cbor_value(&self) -> ciborium::Value {
        match self {
            Value::Null => ciborium::Value::Null,
            Value::Bool(b) => ciborium::Value::Bool(*b),
            Value::Integer(i) => ciborium::Value::Integer((*i).into()),
            Value::Float(f) => ciborium::Value::Float(*f),
            Value::Text(s) => ciborium::Value::Text(s.clone()),
            Value::Bytes(b) => ciborium::Value::Bytes(b.clone()),
            Value::Array(items) => {
                ciborium::Value::Array(items.iter().map(Value::to_cbor_value).collect())
            }
            Value::Map(fields) => ciborium::Value::Map(
                fields
                    .iter()
                    .map(|(k, v)| (ciborium::Value::Text(k.clone()), v.to_cbor_value()))
                    .collect(),
            ),
        }
    }

    fn from_cbor_value(value: ciborium::Value) -> CodecResult<Self> {
        Ok(match value {
            ciborium::Value::Null => Value::Null,
            ciborium::Value::Bool(b) => Value::Bool(b),
            ciborium::Value::Integer(i) => Value::Integer(
                i64::try_from(i).map_err(|_| CodecError::unsupported("integer outside i64"))?,
            ),
            ciborium::Value::Float(f) => Value::Float(f),
            ciborium::Value::Text(s) => Value::Text(s),
            ciborium::Value::Bytes(b) => Value::Bytes(b),
            ciborium::Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(Value::from_cbor_value)
                    .collect::<CodecResult<_>>()?,
            ),
            ciborium::Value::Map(pairs) => {
                let mut fields = Document::new();
                for (k, v) in pairs {
                    let ciborium::Value::Text(key) = k else {
                        return Err(CodecError::unsupported("map key that is not text"));
                    };
                    fields.insert(key, Value::from_cbor_value(v)?);
                }
                Value::Map(fields)
            }
            ciborium::Value::Tag(tag, _) => {
                return Err(CodecError::unsupported(format!("tag {tag}")));
            }
            other => return Err(CodecError::unsupported(format!("{other:?}"))),
        })
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_cbor_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = ciborium::Value::deserialize(deserializer)?;
        Value::from_cbor_value(raw).map_err(serde::de::Error::custom)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Document> for Value {
    fn from(d: Document) -> Self {
        Value::Map(d)
    }
}
