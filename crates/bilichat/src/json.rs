//! Tolerant JSON path access.
//!
//! Payloads from the live service drift over time, so field access never
//! fails: a missing path or a value of the wrong type yields an empty default.
//! Paths are dot separated; numeric segments index into arrays
//! (`info.2.1` is `info[2][1]`).

use serde_json::Value;

pub trait JsonPath {
    /// The value at `path`, if present.
    fn path(&self, path: &str) -> Option<&Value>;

    /// String at `path`; numbers and booleans are stringified, anything else is empty.
    fn path_str(&self, path: &str) -> String {
        match self.path(path) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }

    /// Integer at `path`; floats are truncated and numeric strings parsed, otherwise 0.
    fn path_i64(&self, path: &str) -> i64 {
        match self.path(path) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Non-negative integer at `path`, otherwise 0.
    fn path_u64(&self, path: &str) -> u64 {
        u64::try_from(self.path_i64(path)).unwrap_or(0)
    }

    /// Array at `path`, or an empty slice.
    fn path_array(&self, path: &str) -> &[Value] {
        self.path(path)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn has_path(&self, path: &str) -> bool {
        self.path(path).is_some_and(|v| !v.is_null())
    }
}

impl JsonPath for Value {
    fn path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(self);
        }
        path.split('.').try_fold(self, |current, segment| match current {
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Object(map) => map.get(segment),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_indexes_objects_and_arrays() {
        let value = json!({"info": [null, "hello", [7, "alice"]]});
        assert_eq!(value.path_str("info.1"), "hello");
        assert_eq!(value.path_str("info.2.1"), "alice");
        assert_eq!(value.path_i64("info.2.0"), 7);
    }

    #[test]
    fn test_missing_paths_are_defaults() {
        let value = json!({"data": {"name": "x", "list": [1]}});
        assert_eq!(value.path_str("data.missing"), "");
        assert_eq!(value.path_str("data.list.5"), "");
        assert_eq!(value.path_str("data.name.deeper"), "");
        assert_eq!(value.path_i64("data.name"), 0);
        assert!(value.path_array("data.name").is_empty());
        assert!(!value.has_path("data.missing"));
        assert!(value.has_path("data.list"));
    }

    #[test]
    fn test_numeric_coercions() {
        let value = json!({"a": 3.9, "b": "42", "c": -5, "d": true});
        assert_eq!(value.path_i64("a"), 3);
        assert_eq!(value.path_i64("b"), 42);
        assert_eq!(value.path_u64("c"), 0);
        assert_eq!(value.path_str("c"), "-5");
        assert_eq!(value.path_str("d"), "true");
    }
}
