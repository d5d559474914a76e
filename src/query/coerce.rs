//! Filter operand coercion.
//!
//! Operands are serialized through the `data` format of the property
//! declared at their path, so they compare against the stored
//! representation. The pass is idempotent: coercing a coerced filter
//! changes nothing.

use serde_json::{Map, Value};

use crate::error::DataResult;
use crate::property::{Format, Property, PropertyType, SerializeContext};
use crate::schema::Model;

const LOGICAL_OPERATORS: &[&str] = &["$and", "$or", "$nor"];
const SCALAR_OPERATORS: &[&str] = &["$eq", "$ne", "$gt", "$gte", "$lt", "$lte"];
const LIST_OPERATORS: &[&str] = &["$in", "$nin"];

/// Coerce every leaf operand of `filter` against `model`.
///
/// Paths the model does not declare, and operators without a comparable
/// operand (`$exists`, `$regex`, ...), are left untouched.
pub fn coerce_filter(model: &Model, filter: &Value) -> DataResult<Value> {
    let Value::Object(map) = filter else {
        return Ok(filter.clone());
    };

    let mut out = Map::new();
    for (key, value) in map {
        let coerced = if LOGICAL_OPERATORS.contains(&key.as_str()) {
            match value {
                Value::Array(clauses) => Value::Array(
                    clauses
                        .iter()
                        .map(|clause| coerce_filter(model, clause))
                        .collect::<DataResult<Vec<_>>>()?,
                ),
                other => other.clone(),
            }
        } else if key.starts_with('$') {
            value.clone()
        } else {
            match model.property(key) {
                Some(property) => coerce_operand(&property, value)?,
                None => value.clone(),
            }
        };
        out.insert(key.clone(), coerced);
    }
    Ok(Value::Object(out))
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .map_or(false, |map| !map.is_empty() && map.keys().all(|k| k.starts_with('$')))
}

fn coerce_operand(property: &Property, operand: &Value) -> DataResult<Value> {
    if !is_operator_object(operand) {
        return coerce_value(property, operand);
    }

    let mut out = Map::new();
    if let Value::Object(map) = operand {
        for (op, argument) in map {
            let coerced = if SCALAR_OPERATORS.contains(&op.as_str()) {
                coerce_value(property, argument)?
            } else if LIST_OPERATORS.contains(&op.as_str()) {
                match argument {
                    Value::Array(items) => Value::Array(
                        items
                            .iter()
                            .map(|item| coerce_value(property, item))
                            .collect::<DataResult<Vec<_>>>()?,
                    ),
                    other => other.clone(),
                }
            } else if op == "$not" {
                coerce_operand(property, argument)?
            } else {
                argument.clone()
            };
            out.insert(op.clone(), coerced);
        }
    }
    Ok(Value::Object(out))
}

fn coerce_value(property: &Property, value: &Value) -> DataResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    // A scalar against an array matches elements
    let target = match property.items() {
        Some(items) if !value.is_array() => items,
        _ => property,
    };
    let nested_objects = target.property_type() == PropertyType::Object
        || target
            .items()
            .map_or(false, |items| items.property_type() == PropertyType::Object);
    if nested_objects {
        return Ok(value.clone());
    }

    let coerced = target.serialize_value(value, Format::Data, &SerializeContext::new())?;
    // Values the type filters out (e.g. enum non-members) stay as given
    if coerced.is_null() {
        return Ok(value.clone());
    }
    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropertyDef, PropertyKinds};
    use crate::schema::ModelConfig;
    use serde_json::json;

    fn model() -> Model {
        Model::bind(
            ModelConfig::new("posts")
                .property("views", PropertyDef::integer())
                .property("published", PropertyDef::boolean())
                .property("publishedAt", PropertyDef::date())
                .property("tags", PropertyDef::array(PropertyDef::relation("tags")))
                .property("status", PropertyDef::enumeration(&["draft", "live"]))
                .property("meta", PropertyDef::object([("score", PropertyDef::number())])),
            &PropertyKinds::builtin(),
        )
        .unwrap()
    }

    #[test]
    fn test_leaf_operands_are_coerced() {
        let filter = json!({
            "views": {"$gte": "10"},
            "published": "false",
            "publishedAt": {"$lt": "2024-01-01"},
            "meta.score": {"$in": ["1.5", 2]},
            "tags": "507f1f77bcf86cd799439011"
        });
        let coerced = coerce_filter(&model(), &filter).unwrap();
        assert_eq!(
            coerced,
            json!({
                "views": {"$gte": 10},
                "published": false,
                "publishedAt": {"$lt": "2024-01-01T00:00:00.000Z"},
                "meta.score": {"$in": [1.5, 2]},
                "tags": "507f1f77bcf86cd799439011"
            })
        );
    }

    #[test]
    fn test_logical_clauses_and_unknown_paths() {
        let filter = json!({
            "$or": [{"views": "3"}, {"ghost": "3"}],
            "status": {"$exists": true, "$ne": "archived"}
        });
        let coerced = coerce_filter(&model(), &filter).unwrap();
        assert_eq!(coerced["$or"], json!([{"views": 3}, {"ghost": "3"}]));
        assert_eq!(coerced["status"], json!({"$exists": true, "$ne": "archived"}));
    }

    #[test]
    fn test_coercion_is_idempotent() {
        let filter = json!({
            "views": {"$gte": "10", "$not": {"$eq": "12"}},
            "publishedAt": "2024-03-01T10:00:00+02:00",
            "$and": [{"published": 1}, {"tags": {"$in": ["a", "b"]}}],
            "meta": {"score": "1"}
        });
        let model = model();
        let once = coerce_filter(&model, &filter).unwrap();
        let twice = coerce_filter(&model, &once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once["publishedAt"], "2024-03-01T08:00:00.000Z");
        assert_eq!(once["meta"], json!({"score": "1"}));
    }
}
