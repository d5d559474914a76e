//! Update operator application.
//!
//! A payload whose keys all start with `$` is an operator object; any other
//! payload is shorthand for `{"$set": payload}`.

use serde_json::{Map, Value};

use super::errors::{StoreError, StoreResult};
use super::filter::FilterMatcher;
use crate::document::{get_path_mut, remove_path, set_path};

/// Operators understood by [`apply_update`]
pub const UPDATE_OPERATORS: &[&str] = &["$set", "$unset", "$inc", "$push", "$addToSet", "$pull"];

/// Normalize a payload to operator form.
pub fn normalize_update(update: &Value) -> StoreResult<Map<String, Value>> {
    let Value::Object(map) = update else {
        return Err(StoreError::InvalidUpdate("update must be an object".into()));
    };

    if map.keys().any(|k| k.starts_with('$')) {
        if let Some(unknown) = map.keys().find(|k| !UPDATE_OPERATORS.contains(&k.as_str())) {
            return Err(StoreError::InvalidUpdate(format!("unknown update operator {}", unknown)));
        }
        return Ok(map.clone());
    }

    let mut ops = Map::new();
    ops.insert("$set".to_string(), update.clone());
    Ok(ops)
}

fn fields<'a>(
    ops: &'a Map<String, Value>,
    op: &str,
) -> StoreResult<Option<&'a Map<String, Value>>> {
    match ops.get(op) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(StoreError::InvalidUpdate(format!("{} expects an object", op))),
    }
}

fn array_at<'a>(document: &'a mut Value, path: &str, op: &str) -> StoreResult<&'a mut Vec<Value>> {
    if get_path_mut(document, path).map(|v| v.is_null()).unwrap_or(true) {
        set_path(document, path, Value::Array(Vec::new()));
    }
    match get_path_mut(document, path) {
        Some(Value::Array(items)) => Ok(items),
        _ => Err(StoreError::InvalidUpdate(format!("{} target '{}' is not an array", op, path))),
    }
}

/// Apply an update payload to a document in place.
pub fn apply_update(document: &mut Value, update: &Value) -> StoreResult<()> {
    let ops = normalize_update(update)?;

    if let Some(set) = fields(&ops, "$set")? {
        for (path, value) in set {
            if !set_path(document, path, value.clone()) {
                return Err(StoreError::InvalidUpdate(format!("cannot set '{}'", path)));
            }
        }
    }

    if let Some(unset) = fields(&ops, "$unset")? {
        for path in unset.keys() {
            remove_path(document, path);
        }
    }

    if let Some(inc) = fields(&ops, "$inc")? {
        for (path, delta) in inc {
            let delta = delta.as_f64().ok_or_else(|| {
                StoreError::InvalidUpdate(format!("$inc on '{}' needs a number", path))
            })?;
            let current = match get_path_mut(document, path) {
                None | Some(Value::Null) => 0.0,
                Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
                Some(_) => {
                    return Err(StoreError::InvalidUpdate(format!(
                        "$inc target '{}' is not a number",
                        path
                    )))
                }
            };
            let next = current + delta;
            let value = if next.fract() == 0.0 && next.abs() < i64::MAX as f64 {
                Value::from(next as i64)
            } else {
                serde_json::Number::from_f64(next)
                    .map(Value::Number)
                    .ok_or_else(|| {
                        StoreError::InvalidUpdate(format!("$inc on '{}' overflowed", path))
                    })?
            };
            set_path(document, path, value);
        }
    }

    if let Some(push) = fields(&ops, "$push")? {
        for (path, value) in push {
            array_at(document, path, "$push")?.push(value.clone());
        }
    }

    if let Some(add) = fields(&ops, "$addToSet")? {
        for (path, value) in add {
            let items = array_at(document, path, "$addToSet")?;
            if !items.contains(value) {
                items.push(value.clone());
            }
        }
    }

    if let Some(pull) = fields(&ops, "$pull")? {
        for (path, condition) in pull {
            let items = array_at(document, path, "$pull")?;
            let mut kept = Vec::with_capacity(items.len());
            for item in items.drain(..) {
                let remove = match condition {
                    Value::Object(_) => {
                        let candidate = serde_json::json!({ "v": item });
                        let mut wrapped = Map::new();
                        wrapped.insert("v".to_string(), condition.clone());
                        FilterMatcher::matches(&candidate, &Value::Object(wrapped))?
                    }
                    other => item == *other,
                };
                if !remove {
                    kept.push(item);
                }
            }
            *items = kept;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_payload_is_set() {
        let mut doc = json!({"a": 1, "b": 2});
        apply_update(&mut doc, &json!({"a": 5, "c.d": true})).unwrap();
        assert_eq!(doc, json!({"a": 5, "b": 2, "c": {"d": true}}));
    }

    #[test]
    fn test_inc_and_unset() {
        let mut doc = json!({"n": 1, "gone": "x"});
        let update = json!({"$inc": {"n": 2, "m": 1.5}, "$unset": {"gone": ""}});
        apply_update(&mut doc, &update).unwrap();
        assert_eq!(doc, json!({"n": 3, "m": 1.5}));
    }

    #[test]
    fn test_array_operators() {
        let mut doc = json!({"tags": ["a"], "scores": [1, 5, 9]});
        apply_update(
            &mut doc,
            &json!({
                "$push": {"tags": "b"},
                "$addToSet": {"tags": "a"},
                "$pull": {"scores": {"$gt": 4}}
            }),
        )
        .unwrap();
        assert_eq!(doc["tags"], json!(["a", "b"]));
        assert_eq!(doc["scores"], json!([1]));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let mut doc = json!({});
        let err = apply_update(&mut doc, &json!({"$rename": {"a": "b"}})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidUpdate(_)));
    }
}
