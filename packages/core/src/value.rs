//! Dynamic runtime value type for CRDT map entries.
//!
//! [`Value`] is a self-describing sum type covering everything a record can
//! hold: null, booleans, integers, floats, strings, byte blobs, arrays, and
//! string-keyed maps. Predicates and attribute extractors dispatch on the
//! variant; comparisons between incompatible variants fail the predicate
//! rather than panicking.
//!
//! # Dot paths
//!
//! [`Value::get_path`] walks nested maps by a dot-separated path
//! (`"address.city"`), returning `None` at any missing or non-map step.
//!
//! # Canonical JSON
//!
//! [`canonical_json`] produces a deterministic JSON string with recursively
//! sorted object keys, used for content hashing and query canonicalization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A dynamically typed record value.
///
/// `Map` uses a [`BTreeMap`] so iteration order (and therefore serialization
/// order) is deterministic without an extra canonicalization step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Explicit null. Distinct from a tombstone: a record holding
    /// `Value::Null` is live, a record holding no value at all is deleted.
    Null,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw byte blob.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// String-keyed map with deterministic key order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the value at a dot-separated path, or `None` if any step is
    /// missing or not a map.
    ///
    /// An empty path returns `self`.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for segment in path.split('.') {
            match current {
                Value::Map(map) => current = map.get(segment)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// Returns the field of a top-level map, or `None` for non-maps.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Map(map) => map.get(field),
            _ => None,
        }
    }

    /// Numeric view: `Int` and `Float` coerce to `f64`, everything else is `None`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Array view.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Map view.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Whether this value is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Variant name for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
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

/// Produces a deterministic JSON string with recursively sorted object keys.
///
/// Serializes `value` to `serde_json::Value`, recursively sorts all object
/// keys in lexicographic order, then serializes back to a JSON string. This
/// ensures identical output regardless of the internal iteration order of
/// the original type (e.g., `HashMap`-based structs).
pub fn canonical_json<V: Serialize>(value: &V) -> String {
    let json_value =
        serde_json::to_value(value).expect("V: Serialize must convert to serde_json::Value");
    let sorted = sort_json_value(json_value);
    serde_json::to_string(&sorted).expect("sorted serde_json::Value must serialize to string")
}

/// Recursively sorts object keys in a `serde_json::Value`.
fn sort_json_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> = map
                .into_iter()
                .map(|(k, v)| (k, sort_json_value(v)))
                .collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(sort_json_value).collect())
        }
        other => other,
    }
}

/// Convenience constructor for a `Value::Map` from `(key, value)` pairs.
#[must_use]
pub fn object<I, K>(fields: I) -> Value
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    Value::Map(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
}
