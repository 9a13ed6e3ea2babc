//! Dynamic field values and primary keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Separator between the parts of a serialized composite key.
pub const COMPOSITE_KEY_SEPARATOR: &str = "~~~";

/// A dynamic persistable value.
///
/// This is the value type of scalar fields, primary keys and foreign keys.
/// Floats are not supported: values must compare and hash exactly so that
/// snapshot diffing and identity lookups are stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text string.
    Text(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// UUID.
    Uuid(Uuid),
    /// Array of values; also the foreign-key form of a composite key.
    Array(Vec<Value>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as a UUID, if it is one.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Serializes the value for use inside an identity key.
    pub fn identity_key(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bytes(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
            Value::Uuid(u) => u.to_string(),
            Value::Array(items) => items
                .iter()
                .map(Value::identity_key)
                .collect::<Vec<_>>()
                .join(COMPOSITE_KEY_SEPARATOR),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Text(s) => write!(f, "{s:?}"),
            other => write!(f, "{}", other.identity_key()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A primary key value, possibly composite.
///
/// Parts are ordered like the primary-key field list of the entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<Value>);

impl PrimaryKey {
    /// Creates a single-column key.
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    /// Creates a composite key from its parts.
    pub fn composite(parts: Vec<Value>) -> Self {
        Self(parts)
    }

    /// Returns the key parts.
    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    /// Returns true if this key has more than one part.
    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }

    /// Returns true if every part is non-null.
    pub fn is_complete(&self) -> bool {
        !self.0.is_empty() && self.0.iter().all(|v| !v.is_null())
    }

    /// Serializes the key; composite parts are joined with `~~~`.
    pub fn serialize(&self) -> String {
        self.0
            .iter()
            .map(Value::identity_key)
            .collect::<Vec<_>>()
            .join(COMPOSITE_KEY_SEPARATOR)
    }

    /// The value stored in a foreign-key column referencing this key.
    pub fn to_value(&self) -> Value {
        match self.0.as_slice() {
            [single] => single.clone(),
            parts => Value::Array(parts.to_vec()),
        }
    }

    /// Rebuilds a key from a foreign-key column value.
    ///
    /// Returns `None` for null or a part count that does not match.
    pub fn from_value(value: &Value, parts: usize) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Array(items) if parts > 1 => {
                (items.len() == parts).then(|| Self(items.clone()))
            }
            other if parts == 1 => Some(Self(vec![other.clone()])),
            _ => None,
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}
