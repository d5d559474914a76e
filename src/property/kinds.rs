//! Built-in property type implementations.
//!
//! Each type is a [`FormatTable`] of plain serializer functions plus a batch
//! shape check. Tables are built once per [`BuiltinKind`] and are
//! inspectable through [`PropertyKind::formats`].

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Number, Value};

use super::errors::{PropertyError, PropertyResult};
use super::format::{Format, FormatTable, Formatted, SerializeContext};
use super::identifier::is_identifier;
use super::object::{materialize, LazyRecord};
use super::relation::{
    RelationDescriptor, RelationHandle, RelationListDescriptor, RelationListHandle, RelationQuery,
};
use super::{Property, PropertyKind, PropertyType};
use crate::document::json_type_name;

type CheckFn = fn(&Property, &[&Value]) -> Result<(), String>;

/// Built-in implementation of one property type
pub struct BuiltinKind {
    property_type: PropertyType,
    formats: FormatTable,
    check: CheckFn,
}

impl BuiltinKind {
    /// Built-in implementation for `property_type`
    pub fn new(property_type: PropertyType) -> Self {
        let (formats, check): (FormatTable, CheckFn) = match property_type {
            PropertyType::Identifier => (FormatTable::new(identifier), check_identifier),
            PropertyType::Identity => (FormatTable::new(identity), check_string),
            PropertyType::Text => (FormatTable::new(text), check_text),
            PropertyType::Enum => (FormatTable::new(text), check_enum),
            PropertyType::Number => (FormatTable::new(number), check_number),
            PropertyType::Integer => (FormatTable::new(integer), check_integer),
            PropertyType::Boolean => (FormatTable::new(boolean), check_boolean),
            PropertyType::Date => (
                FormatTable::new(date_string).with(Format::Object, date_value),
                check_date,
            ),
            PropertyType::Relation => (
                FormatTable::new(relation_id).with(Format::Object, relation_handle),
                check_relation,
            ),
            PropertyType::Array => (
                FormatTable::new(array).with(Format::Object, array_object),
                check_array,
            ),
            PropertyType::Object => (
                FormatTable::new(object).with(Format::Object, object_record),
                check_object,
            ),
            PropertyType::Default => (FormatTable::new(passthrough), check_any),
        };

        Self {
            property_type,
            formats,
            check,
        }
    }

    /// One implementation per property type
    pub fn all() -> Vec<Self> {
        [
            PropertyType::Identifier,
            PropertyType::Text,
            PropertyType::Number,
            PropertyType::Integer,
            PropertyType::Boolean,
            PropertyType::Date,
            PropertyType::Identity,
            PropertyType::Relation,
            PropertyType::Object,
            PropertyType::Array,
            PropertyType::Enum,
            PropertyType::Default,
        ]
        .into_iter()
        .map(Self::new)
        .collect()
    }
}

impl PropertyKind for BuiltinKind {
    fn property_type(&self) -> PropertyType {
        self.property_type
    }

    fn formats(&self) -> &FormatTable {
        &self.formats
    }

    fn validate(&self, property: &Property, values: &[&Value]) -> Result<(), String> {
        (self.check)(property, values)
    }
}

// ==================
// Scalars
// ==================

fn stringify(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(_) => value.clone(),
        Value::Bool(b) => Value::String(b.to_string()),
        other => Value::String(other.to_string()),
    }
}

fn passthrough(
    _: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    Ok(Formatted::Value(value.clone()))
}

fn identifier(
    _: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    Ok(Formatted::Value(stringify(value)))
}

fn identity(
    _: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    let value = match value {
        Value::Object(map) => map.get("_id").map(stringify).unwrap_or(Value::Null),
        other => stringify(other),
    };
    Ok(Formatted::Value(value))
}

fn text(
    property: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    let value = match value {
        Value::Array(items) => items.first().map(stringify).unwrap_or(Value::Null),
        other => stringify(other),
    };

    // Values outside a declared enum are dropped.
    let value = match &property.options().enum_values {
        Some(allowed) if !value.is_null() && !allowed.contains(&value) => Value::Null,
        _ => value,
    };
    Ok(Formatted::Value(value))
}

fn to_number(property: &Property, value: &Value) -> PropertyResult<Value> {
    let invalid = || PropertyError::InvalidNumber {
        path: property.path().to_string(),
        value: value.to_string(),
    };

    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(_) => Ok(value.clone()),
        Value::Bool(b) => Ok(Value::from(u8::from(*b))),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(Value::Null);
            }
            if let Ok(n) = trimmed.parse::<i64>() {
                return Ok(Value::from(n));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}

fn number(
    property: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    to_number(property, value).map(Formatted::Value)
}

fn integer(
    property: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    let value = match to_number(property, value)? {
        Value::Number(n) if n.as_i64().is_none() && n.as_u64().is_none() => {
            let truncated = n.as_f64().unwrap_or_default().trunc();
            Value::from(truncated as i64)
        }
        other => other,
    };
    Ok(Formatted::Value(value))
}

fn boolean(
    _: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    let value = match value {
        Value::Null => Value::Null,
        Value::Bool(_) => value.clone(),
        Value::String(s) => Value::Bool(!matches!(s.as_str(), "" | "false" | "0")),
        Value::Number(n) => Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(true)),
        Value::Array(_) | Value::Object(_) => Value::Bool(true),
    };
    Ok(Formatted::Value(value))
}

// ==================
// Dates
// ==================

/// Parse a stored or submitted date: RFC 3339, a bare `YYYY-MM-DD`, or
/// milliseconds since the epoch.
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|d| d.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn to_date(property: &Property, value: &Value) -> PropertyResult<Option<DateTime<Utc>>> {
    if value.is_null() {
        return Ok(None);
    }
    parse_date(value)
        .map(Some)
        .ok_or_else(|| PropertyError::InvalidDate {
            path: property.path().to_string(),
            value: value.to_string(),
        })
}

fn date_string(
    property: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    Ok(match to_date(property, value)? {
        Some(date) => Formatted::Value(Value::String(super::format_date(&date))),
        None => Formatted::null(),
    })
}

fn date_value(
    property: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    Ok(to_date(property, value)?
        .map(Formatted::Date)
        .unwrap_or_else(Formatted::null))
}

// ==================
// Relations
// ==================

fn relation_query(property: &Property, value: &Value) -> PropertyResult<Option<RelationQuery>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(RelationQuery::Id(s.clone()))),
        Value::Number(n) => Ok(Some(RelationQuery::Id(n.to_string()))),
        Value::Object(map) => Ok(Some(match map.get("_id") {
            Some(Value::String(id)) => RelationQuery::Id(id.clone()),
            _ => RelationQuery::Filter(value.clone()),
        })),
        other => Err(PropertyError::InvalidRelation {
            path: property.path().to_string(),
            reason: format!("expected an id or a record, got {}", json_type_name(other)),
        }),
    }
}

fn relation_id(
    property: &Property,
    value: &Value,
    _: Format,
    _: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    Ok(Formatted::Value(
        relation_query(property, value)?
            .map(|q| q.to_json())
            .unwrap_or(Value::Null),
    ))
}

fn relation_handle(
    property: &Property,
    value: &Value,
    _: Format,
    ctx: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    let Some(query) = relation_query(property, value)? else {
        return Ok(Formatted::null());
    };
    let model = property.relation_target().unwrap_or_default().to_string();
    Ok(Formatted::Relation(RelationHandle::new(
        RelationDescriptor { model, query },
        ctx.resolver.clone(),
    )))
}

// ==================
// Arrays
// ==================

fn elements(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn item_property(property: &Property) -> PropertyResult<&Property> {
    property
        .items()
        .ok_or_else(|| PropertyError::MissingItems(property.path().to_string()))
}

fn array(
    property: &Property,
    value: &Value,
    format: Format,
    ctx: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    if value.is_null() {
        return Ok(Formatted::null());
    }
    let items = item_property(property)?;
    elements(value)
        .into_iter()
        .map(|item| items.serialize_value(item, format, ctx))
        .collect::<PropertyResult<Vec<_>>>()
        .map(|values| Formatted::Value(Value::Array(values)))
}

fn array_object(
    property: &Property,
    value: &Value,
    format: Format,
    ctx: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    if value.is_null() {
        return Ok(Formatted::null());
    }
    let items = item_property(property)?;

    if items.property_type() == PropertyType::Relation {
        let model = items.relation_target().unwrap_or_default().to_string();
        let single = ctx
            .resolver
            .as_ref()
            .map(|r| r.is_single_instance(&model))
            .unwrap_or(false);

        if !single {
            let mut ids = Vec::new();
            for item in elements(value) {
                if let Some(RelationQuery::Id(id)) = relation_query(items, item)? {
                    ids.push(id);
                }
            }
            return Ok(Formatted::RelationList(RelationListHandle::new(
                RelationListDescriptor { model, ids },
                ctx.resolver.clone(),
            )));
        }
    }

    elements(value)
        .into_iter()
        .map(|item| items.serialize(item, format, ctx))
        .collect::<PropertyResult<Vec<_>>>()
        .map(Formatted::Array)
}

// ==================
// Objects
// ==================

fn object(
    property: &Property,
    value: &Value,
    format: Format,
    ctx: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    match value {
        Value::Object(map) => materialize(property, map, format, ctx).map(Formatted::Value),
        other => Ok(Formatted::Value(other.clone())),
    }
}

fn object_record(
    property: &Property,
    value: &Value,
    _: Format,
    ctx: &SerializeContext<'_>,
) -> PropertyResult<Formatted> {
    match value {
        Value::Object(map) => Ok(Formatted::Record(LazyRecord::new(property, map.clone(), ctx))),
        other => Ok(Formatted::Value(other.clone())),
    }
}

// ==================
// Batch checks
// ==================

fn all_match(
    property: &Property,
    values: &[&Value],
    expected: &str,
    ok: impl Fn(&Value) -> bool,
) -> Result<(), String> {
    match values.iter().find(|v| !ok(**v)) {
        None => Ok(()),
        Some(bad) => Err(format!(
            "'{}' must be {}, got {}",
            property.path(),
            expected,
            json_type_name(bad)
        )),
    }
}

fn check_any(_: &Property, _: &[&Value]) -> Result<(), String> {
    Ok(())
}

fn check_identifier(property: &Property, values: &[&Value]) -> Result<(), String> {
    all_match(property, values, "an identifier", |v| {
        v.as_str().map(is_identifier).unwrap_or(false)
    })
}

fn check_string(property: &Property, values: &[&Value]) -> Result<(), String> {
    all_match(property, values, "a string", Value::is_string)
}

fn in_enum(property: &Property, values: &[&Value]) -> Result<(), String> {
    let Some(allowed) = &property.options().enum_values else {
        return Ok(());
    };
    match values.iter().find(|v| !allowed.contains(**v)) {
        None => Ok(()),
        Some(bad) => Err(format!("'{}' does not allow the value {}", property.path(), bad)),
    }
}

fn check_text(property: &Property, values: &[&Value]) -> Result<(), String> {
    check_string(property, values)?;
    in_enum(property, values)
}

fn check_enum(property: &Property, values: &[&Value]) -> Result<(), String> {
    in_enum(property, values)
}

fn check_number(property: &Property, values: &[&Value]) -> Result<(), String> {
    all_match(property, values, "a number", Value::is_number)
}

fn check_integer(property: &Property, values: &[&Value]) -> Result<(), String> {
    all_match(property, values, "an integer", |v| v.is_i64() || v.is_u64())
}

fn check_boolean(property: &Property, values: &[&Value]) -> Result<(), String> {
    all_match(property, values, "a boolean", Value::is_boolean)
}

fn check_date(property: &Property, values: &[&Value]) -> Result<(), String> {
    all_match(property, values, "a date", |v| parse_date(v).is_some())
}

fn check_relation(property: &Property, values: &[&Value]) -> Result<(), String> {
    all_match(property, values, "a relation id", |v| v.is_string() || v.is_object())
}

fn check_object(property: &Property, values: &[&Value]) -> Result<(), String> {
    all_match(property, values, "an object", Value::is_object)
}

fn check_array(property: &Property, values: &[&Value]) -> Result<(), String> {
    all_match(property, values, "an array", Value::is_array)?;
    let Some(items) = property.items() else {
        return Ok(());
    };
    let elements: Vec<&Value> = values
        .iter()
        .filter_map(|v| v.as_array())
        .flatten()
        .collect();
    items.validate(&elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropertyDef, PropertyKinds};
    use serde_json::json;

    fn prop(def: PropertyDef) -> Property {
        Property::bind("field", &def, &PropertyKinds::builtin()).unwrap()
    }

    fn json_of(def: PropertyDef, value: Value) -> Value {
        prop(def)
            .serialize_value(&value, Format::Json, &SerializeContext::new())
            .unwrap()
    }

    #[test]
    fn test_text_takes_first_array_element() {
        assert_eq!(json_of(PropertyDef::text(), json!(["a", "b"])), json!("a"));
        assert_eq!(json_of(PropertyDef::text(), json!(12)), json!("12"));
    }

    #[test]
    fn test_text_enum_filters_unknown_values() {
        let def = PropertyDef::text().with_enum(&["draft", "live"]);
        assert_eq!(json_of(def.clone(), json!("live")), json!("live"));
        assert_eq!(json_of(def, json!("gone")), Value::Null);
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(json_of(PropertyDef::number(), json!("42")), json!(42));
        assert_eq!(json_of(PropertyDef::number(), json!("1.5")), json!(1.5));
        assert_eq!(json_of(PropertyDef::integer(), json!(3.9)), json!(3));

        let err = prop(PropertyDef::number())
            .serialize(&json!("abc"), Format::Data, &SerializeContext::new())
            .unwrap_err();
        assert!(matches!(err, PropertyError::InvalidNumber { .. }));
    }

    #[test]
    fn test_boolean_coercion() {
        assert_eq!(json_of(PropertyDef::boolean(), json!("false")), json!(false));
        assert_eq!(json_of(PropertyDef::boolean(), json!("yes")), json!(true));
        assert_eq!(json_of(PropertyDef::boolean(), json!(0)), json!(false));
    }

    #[test]
    fn test_date_formats() {
        let property = prop(PropertyDef::date());
        let ctx = SerializeContext::new();

        let wire = property
            .serialize_value(&json!("2024-05-01"), Format::Json, &ctx)
            .unwrap();
        assert_eq!(wire, json!("2024-05-01T00:00:00.000Z"));

        let rich = property.serialize(&json!(0), Format::Object, &ctx).unwrap();
        assert!(matches!(rich, Formatted::Date(_)));
    }

    #[test]
    fn test_unparsable_date_is_an_error() {
        let err = prop(PropertyDef::date())
            .serialize(&json!("not a date"), Format::Json, &SerializeContext::new())
            .unwrap_err();
        assert!(matches!(err, PropertyError::InvalidDate { .. }));
    }

    #[test]
    fn test_relation_extracts_id() {
        let def = PropertyDef::relation("accounts");
        assert_eq!(json_of(def.clone(), json!({"_id": "abc", "name": "x"})), json!("abc"));

        let handle = prop(def)
            .serialize(&json!("abc"), Format::Object, &SerializeContext::new())
            .unwrap();
        let handle = handle.as_relation().unwrap();
        assert_eq!(handle.descriptor.model, "accounts");
        assert_eq!(handle.id(), Some("abc"));
    }

    #[test]
    fn test_array_wraps_scalars() {
        let def = PropertyDef::array(PropertyDef::integer());
        assert_eq!(json_of(def.clone(), json!(["1", 2])), json!([1, 2]));
        assert_eq!(json_of(def, json!("7")), json!([7]));
    }

    #[test]
    fn test_serialized_json_passes_validation() {
        let cases = vec![
            (PropertyDef::text(), json!(5)),
            (PropertyDef::number(), json!("2.5")),
            (PropertyDef::integer(), json!("8")),
            (PropertyDef::boolean(), json!("1")),
            (PropertyDef::date(), json!("2024-01-02")),
            (PropertyDef::array(PropertyDef::number()), json!(["1", "2"])),
            (PropertyDef::relation("accounts"), json!({"_id": "x"})),
        ];

        for (def, value) in cases {
            let property = prop(def);
            let out = property
                .serialize_value(&value, Format::Json, &SerializeContext::new())
                .unwrap();
            assert!(property.validate(&[&out]).is_ok(), "{:?} -> {}", property, out);
        }
    }

    #[test]
    fn test_array_check_descends_into_items() {
        let property = prop(PropertyDef::array(PropertyDef::integer()));
        assert!(property.validate(&[&json!([1, 2])]).is_ok());
        assert!(property.validate(&[&json!([1, "x"])]).is_err());
    }
}
