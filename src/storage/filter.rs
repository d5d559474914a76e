//! Filter evaluation and sorting over JSON documents.
//!
//! Supports field conditions on dotted paths (with array element matching)
//! and the logical operators `$and`, `$or`, `$nor`.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Value};

use super::errors::{StoreError, StoreResult};
use crate::document::collect_path;

/// Evaluates storage filters against documents
pub struct FilterMatcher;

impl FilterMatcher {
    /// Checks if a document matches a filter. An empty filter matches all.
    pub fn matches(document: &Value, filter: &Value) -> StoreResult<bool> {
        match filter {
            Value::Null => Ok(true),
            Value::Object(map) => Self::matches_map(document, map),
            other => Err(StoreError::InvalidFilter(format!(
                "filter must be an object, got {}",
                other
            ))),
        }
    }

    fn matches_map(document: &Value, filter: &Map<String, Value>) -> StoreResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => Self::branches(condition, key)?
                    .iter()
                    .map(|f| Self::matches(document, f))
                    .collect::<StoreResult<Vec<_>>>()?
                    .into_iter()
                    .all(|m| m),
                "$or" => Self::any_branch(document, condition, key)?,
                "$nor" => !Self::any_branch(document, condition, key)?,
                op if op.starts_with('$') => {
                    return Err(StoreError::InvalidFilter(format!(
                        "unknown top-level operator {}",
                        op
                    )))
                }
                path => Self::matches_field(document, path, condition)?,
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn branches<'a>(condition: &'a Value, op: &str) -> StoreResult<&'a Vec<Value>> {
        condition
            .as_array()
            .ok_or_else(|| StoreError::InvalidFilter(format!("{} expects an array", op)))
    }

    fn any_branch(document: &Value, condition: &Value, op: &str) -> StoreResult<bool> {
        for branch in Self::branches(condition, op)? {
            if Self::matches(document, branch)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn is_operator_map(condition: &Value) -> bool {
        match condition {
            Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
            _ => false,
        }
    }

    fn matches_field(document: &Value, path: &str, condition: &Value) -> StoreResult<bool> {
        let values = collect_path(document, path);

        if !Self::is_operator_map(condition) {
            return Ok(Self::equals_any(&values, condition));
        }

        let Value::Object(ops) = condition else {
            return Ok(false);
        };
        for (op, operand) in ops {
            let matched = match op.as_str() {
                "$eq" => Self::equals_any(&values, operand),
                "$ne" => !Self::equals_any(&values, operand),
                "$gt" => Self::compare_any(&values, operand, |o| o == Ordering::Greater),
                "$gte" => Self::compare_any(&values, operand, |o| o != Ordering::Less),
                "$lt" => Self::compare_any(&values, operand, |o| o == Ordering::Less),
                "$lte" => Self::compare_any(&values, operand, |o| o != Ordering::Greater),
                "$in" => Self::in_list(&values, operand, op)?,
                "$nin" => !Self::in_list(&values, operand, op)?,
                "$exists" => {
                    let exists = values.iter().any(|v| !v.is_null());
                    exists == operand.as_bool().unwrap_or(true)
                }
                "$regex" => {
                    let pattern = operand
                        .as_str()
                        .ok_or_else(|| {
                            StoreError::InvalidFilter("$regex expects a string".into())
                        })?;
                    let regex = Regex::new(pattern)
                        .map_err(|e| StoreError::InvalidFilter(format!("invalid $regex: {}", e)))?;
                    Self::flatten(&values)
                        .iter()
                        .any(|v| v.as_str().map(|s| regex.is_match(s)).unwrap_or(false))
                }
                "$not" => {
                    let mut negated = Map::new();
                    negated.insert(path.to_string(), operand.clone());
                    !Self::matches_map(document, &negated)?
                }
                other => {
                    return Err(StoreError::InvalidFilter(format!("unknown operator {}", other)))
                }
            };
            if !matched {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Values plus the elements of array values
    fn flatten<'a>(values: &[&'a Value]) -> Vec<&'a Value> {
        let mut out = Vec::new();
        for value in values {
            out.push(*value);
            if let Value::Array(items) = value {
                out.extend(items.iter());
            }
        }
        out
    }

    fn equals_any(values: &[&Value], expected: &Value) -> bool {
        if values.is_empty() {
            return expected.is_null();
        }
        Self::flatten(values).iter().any(|v| values_equal(v, expected))
    }

    fn compare_any(values: &[&Value], bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
        Self::flatten(values).iter().any(|v| {
            same_kind(v, bound) && accept(compare_values(Some(v), Some(bound)))
        })
    }

    fn in_list(values: &[&Value], operand: &Value, op: &str) -> StoreResult<bool> {
        let list = operand
            .as_array()
            .ok_or_else(|| StoreError::InvalidFilter(format!("{} expects an array", op)))?;
        Ok(list.iter().any(|expected| Self::equals_any(values, expected)))
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

/// Compares two JSON values for sorting.
///
/// Ordering rules:
/// - missing < null < bool < number < string < array < object
/// - For same types, natural ordering
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (a, b) = match (a, b) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(a), Some(b)) => (a, b),
    };

    let type_order = |v: &Value| -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    };

    match type_order(a).cmp(&type_order(b)) {
        Ordering::Equal => {}
        other => return other,
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Sort documents by a `{ path: 1 | -1 }` sort map, keys applied in order.
///
/// Sort is stable.
pub fn sort_documents(documents: &mut [Value], sort: &Map<String, Value>) {
    if sort.is_empty() {
        return;
    }
    documents.sort_by(|a, b| {
        for (path, direction) in sort {
            let ordering = compare_values(
                crate::document::get_path(a, path),
                crate::document::get_path(b, path),
            );
            let ordering = if direction.as_i64() == Some(-1) {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
