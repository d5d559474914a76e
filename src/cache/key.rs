//! Deterministic cache keys.
//!
//! `<model cache key>:<sha256 of the operation signature>`. The signature
//! lists filter and option entries sorted by key, each rendered as
//! `key:value` with nested objects in sorted-key form, so input key order
//! never changes the key. The `session` option never takes part.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Option keys that never take part in a cache key
const EXCLUDED_OPTIONS: &[&str] = &["session"];

/// Render a value with every object's keys sorted.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

fn sorted_pairs(map: &Map<String, Value>, excluded: &[&str]) -> Vec<String> {
    let mut pairs: Vec<(&String, &Value)> = map
        .iter()
        .filter(|(k, _)| !excluded.contains(&k.as_str()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(k, v)| format!("{}:{}", k, canonical_json(v)))
        .collect()
}

/// Operation signature before hashing
pub fn signature(operation: &str, filter: &Value, options: &Map<String, Value>) -> String {
    let mut parts = vec![operation.to_string()];
    match filter {
        Value::Object(map) => parts.extend(sorted_pairs(map, &[])),
        Value::Null => {}
        other => parts.push(canonical_json(other)),
    }
    parts.push("|".to_string());
    parts.extend(sorted_pairs(options, EXCLUDED_OPTIONS));
    parts.join(";")
}

/// Derive the cache key of an operation on the model owning `model_key`
pub fn derive_key(
    model_key: &str,
    operation: &str,
    filter: &Value,
    options: &Map<String, Value>,
) -> String {
    let digest = Sha256::digest(signature(operation, filter, options).as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}:{}", model_key, hex)
}

/// Prefix covering every key of one model
pub fn model_prefix(model_key: &str) -> String {
    format!("{}:", model_key)
}

/// Prefix covering every key of one physical database
pub fn database_prefix(database: &str) -> String {
    format!("{}:", database)
}
