//! Fail-soft field extraction from generic object trees
//!
//! Objects arrive as `serde_json::Value` trees. Every accessor navigates a
//! dot-separated path through nested maps and returns the zero value of the
//! requested type when a segment is missing, is not a map, or the path is
//! empty. One malformed object must never abort a scrape.

use serde_json::{Map, Value};

/// Navigate `path` through nested maps.
pub fn lookup<'a>(obj: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    path.split('.')
        .try_fold(obj, |current, segment| current.as_object()?.get(segment))
}

/// String at `path`, or `""` when absent or not a string.
pub fn extract_string<'a>(obj: &'a Value, path: &str) -> &'a str {
    lookup(obj, path).and_then(Value::as_str).unwrap_or_default()
}

/// Numeric value at `path`, or `0.0` when absent or not convertible.
pub fn extract_float(obj: &Value, path: &str) -> f64 {
    lookup(obj, path).map(to_float).unwrap_or(0.0)
}

/// Map at `path`, or `None` when absent or not a map.
pub fn extract_map<'a>(obj: &'a Value, path: &str) -> Option<&'a Map<String, Value>> {
    lookup(obj, path).and_then(Value::as_object)
}

/// Sequence at `path`, or an empty slice when absent or not a sequence.
pub fn extract_slice<'a>(obj: &'a Value, path: &str) -> &'a [Value] {
    lookup(obj, path)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// Convert a leaf value to `f64`.
///
/// Numbers convert directly, booleans map to `1.0`/`0.0`, strings are parsed
/// best-effort. Anything else is `0.0`.
pub fn to_float(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        Value::Bool(false) => 0.0,
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Null | Value::Array(_) | Value::Object(_) => 0.0,
    }
}

/// `namespace/name` identity of an object. Cluster-scoped objects yield `/name`.
pub fn resource_key(obj: &Value) -> String {
    format!(
        "{}/{}",
        extract_string(obj, "metadata.namespace"),
        extract_string(obj, "metadata.name")
    )
}

/// Replace every character outside `[A-Za-z0-9_]` with `_` and lower-case.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
