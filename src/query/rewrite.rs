//! Locating and replacing relational filter markers.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{DataError, DataResult};

/// Marker resolving an embedded filter against the relation's target model
pub const SUBQUERY: &str = "$subquery";

/// Marker resolving an embedded filter against a model relating back
pub const LEFTQUERY: &str = "$leftquery";

const LOGICAL_OPERATORS: &[&str] = &["$and", "$or", "$nor"];

/// A filter leaf carrying a marker
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Site {
    /// JSON pointer to the leaf's operand object
    pub pointer: String,
    /// Dotted field path of the leaf
    pub path: String,
    pub marker: &'static str,
    pub argument: Value,
}

/// Argument of a `$leftquery` marker
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct LeftQuery {
    /// Model holding the relation back to the filtered model
    pub from: String,
    #[serde(default)]
    pub filter: Value,
    /// Relation path on `from`
    pub property: String,
}

fn escape(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Every leaf of `filter` carrying `marker`, in document order.
pub(crate) fn find_sites(filter: &Value, marker: &'static str) -> Vec<Site> {
    let mut sites = Vec::new();
    walk(filter, "", marker, &mut sites);
    sites
}

fn walk(value: &Value, pointer: &str, marker: &'static str, sites: &mut Vec<Site>) {
    let Value::Object(map) = value else {
        return;
    };
    for (key, operand) in map {
        let here = format!("{}/{}", pointer, escape(key));
        if LOGICAL_OPERATORS.contains(&key.as_str()) {
            if let Value::Array(clauses) = operand {
                for (i, clause) in clauses.iter().enumerate() {
                    walk(clause, &format!("{}/{}", here, i), marker, sites);
                }
            }
        } else if key.starts_with('$') {
            continue;
        } else if let Some(argument) = operand.get(marker) {
            sites.push(Site {
                pointer: here,
                path: key.clone(),
                marker,
                argument: argument.clone(),
            });
        }
    }
}

/// Replace a site's marker with `$in: values`, keeping sibling operators.
pub(crate) fn replace_with_in(
    filter: &mut Value,
    site: &Site,
    values: Vec<Value>,
) -> DataResult<()> {
    let leaf: &mut Map<String, Value> = filter
        .pointer_mut(&site.pointer)
        .and_then(Value::as_object_mut)
        .ok_or_else(|| DataError::internal(format!("filter leaf {} disappeared", site.pointer)))?;
    leaf.remove(site.marker);
    leaf.insert("$in".to_string(), Value::Array(values));
    Ok(())
}

/// Related identifiers held by a relation value: ids, records or lists of either.
pub(crate) fn related_ids(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::String(_) => {
            if !out.contains(value) {
                out.push(value.clone());
            }
        }
        Value::Object(map) => {
            if let Some(id) = map.get("_id") {
                related_ids(id, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                related_ids(item, out);
            }
        }
        _ => {}
    }
}
