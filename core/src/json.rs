//! Typed, optional-returning accessors over `serde_json` trees.
//!
//! Delivery payloads are loosely typed: every lookup here answers `None`
//! for a missing key and for a value of the wrong JSON type alike.

use std::collections::HashMap;

use serde_json::Map;
use serde_json::Value;

pub type JsonObject = Map<String, Value>;

pub trait JsonExt {
    fn object(&self) -> Option<&JsonObject>;

    fn opt_value(&self, key: &str) -> Option<&Value> {
        self.object().and_then(|map| map.get(key))
    }

    fn opt_object(&self, key: &str) -> Option<&JsonObject> {
        self.opt_value(key).and_then(Value::as_object)
    }

    fn opt_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.opt_value(key).and_then(Value::as_array)
    }

    fn opt_str(&self, key: &str) -> Option<&str> {
        self.opt_value(key).and_then(Value::as_str)
    }

    fn opt_i64(&self, key: &str) -> Option<i64> {
        self.opt_value(key).and_then(Value::as_i64)
    }

    fn opt_bool(&self, key: &str) -> Option<bool> {
        self.opt_value(key).and_then(Value::as_bool)
    }

    /// String value of `key` when present and not blank.
    fn opt_non_blank(&self, key: &str) -> Option<&str> {
        non_blank(self.opt_str(key))
    }
}

impl JsonExt for Value {
    fn object(&self) -> Option<&JsonObject> {
        self.as_object()
    }
}

impl JsonExt for JsonObject {
    fn object(&self) -> Option<&JsonObject> {
        Some(self)
    }
}

pub fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

pub fn is_blank(value: Option<&str>) -> bool {
    non_blank(value).is_none()
}

/// Keeps only string-valued entries. `None` when nothing survives.
pub fn to_string_map(object: &JsonObject) -> Option<HashMap<String, String>> {
    let map: HashMap<String, String> = object
        .iter()
        .filter_map(|(key, value)| value.as_str().map(|s| (key.clone(), s.to_string())))
        .collect();
    if map.is_empty() { None } else { Some(map) }
}

/// Empty object, empty array, `null` and the empty string count as "empty JSON".
pub fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
