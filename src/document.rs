//! Dotted-path helpers over JSON documents.
//!
//! Stored documents are plain `serde_json::Value` objects. Paths use `.` as
//! the separator; numeric segments index into arrays.

use serde_json::{Map, Value};

/// Join a container path and a property name.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        prefix.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

/// Read the value at a dotted path.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(doc);
    }

    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Collect every value reachable at a dotted path, descending into arrays
/// the way document stores do for non-numeric segments.
pub fn collect_path<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').collect()
    };
    let mut out = Vec::new();
    collect_segments(doc, &segments, &mut out);
    out
}

fn collect_segments<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(*head) {
                collect_segments(child, rest, out);
            }
        }
        Value::Array(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(child) = items.get(index) {
                    collect_segments(child, rest, out);
                }
            }
            Err(_) => {
                for item in items {
                    collect_segments(item, segments, out);
                }
            }
        },
        _ => {}
    }
}

/// Write a value at a dotted path, creating intermediate objects.
///
/// Returns `false` when an intermediate segment is a non-object value.
pub fn set_path(doc: &mut Value, path: &str, value: Value) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = doc;

    while let Some(segment) = segments.next() {
        if !current.is_object() {
            if current.is_null() {
                *current = Value::Object(Map::new());
            } else {
                return false;
            }
        }
        let Some(map) = current.as_object_mut() else {
            return false;
        };

        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return true;
        }

        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    false
}

/// Remove the value at a dotted path, returning it if present.
pub fn remove_path(doc: &mut Value, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        Some((parent, leaf)) => get_path_mut(doc, parent)?.as_object_mut()?.remove(leaf),
        None => doc.as_object_mut()?.remove(path),
    }
}

/// Mutable access to the value at a dotted path.
pub fn get_path_mut<'a>(doc: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    if path.is_empty() {
        return Some(doc);
    }

    let mut current = doc;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get_mut(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Returns the JSON type name of a value, for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested_path() {
        let doc = json!({"a": {"b": [10, {"c": "x"}]}});
        assert_eq!(get_path(&doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_path(&doc, "a.b.1.c"), Some(&json!("x")));
        assert_eq!(get_path(&doc, "a.z"), None);
    }

    #[test]
    fn test_collect_descends_arrays() {
        let doc = json!({"items": [{"tag": "a"}, {"tag": "b"}, {"other": 1}]});
        let values = collect_path(&doc, "items.tag");
        assert_eq!(values, vec![&json!("a"), &json!("b")]);
    }

    #[test]
    fn test_set_and_remove_path() {
        let mut doc = json!({});
        assert!(set_path(&mut doc, "settings.theme", json!("dark")));
        assert_eq!(doc, json!({"settings": {"theme": "dark"}}));

        assert_eq!(remove_path(&mut doc, "settings.theme"), Some(json!("dark")));
        assert_eq!(doc, json!({"settings": {}}));
    }

    #[test]
    fn test_set_path_through_scalar_fails() {
        let mut doc = json!({"a": 1});
        assert!(!set_path(&mut doc, "a.b", json!(2)));
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "slug"), "slug");
        assert_eq!(join_path("settings", "theme"), "settings.theme");
    }
}
