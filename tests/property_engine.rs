//! Property engine behavior through the public API

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use vaultbase::property::{
    ConditionalProperties, Format, Formatted, Property, PropertyDef, PropertyKinds, RelationQuery,
    RelationResolver, SerializeContext,
};
use vaultbase::DataResult;

const TAG_ID: &str = "507f1f77bcf86cd799439011";

fn bind(path: &str, def: PropertyDef) -> Property {
    Property::bind(path, &def, &PropertyKinds::builtin()).unwrap()
}

/// Resolves tags from a fixed list
struct Tags(Vec<Value>);

impl RelationResolver for Tags {
    fn fetch_one<'a>(
        &'a self,
        _model: &'a str,
        query: &'a RelationQuery,
    ) -> BoxFuture<'a, DataResult<Option<Value>>> {
        async move {
            Ok(match query {
                RelationQuery::Id(id) => self.0.iter().find(|t| t["_id"] == id.as_str()).cloned(),
                RelationQuery::Filter(_) => None,
            })
        }
        .boxed()
    }

    fn fetch_many<'a>(
        &'a self,
        _model: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, DataResult<Vec<Value>>> {
        async move {
            Ok(ids
                .iter()
                .filter_map(|id| self.0.iter().find(|t| t["_id"] == id.as_str()).cloned())
                .collect())
        }
        .boxed()
    }
}

#[test]
fn strict_object_drops_undeclared_keys() {
    let property = bind(
        "",
        PropertyDef::object([("a", PropertyDef::text()), ("b", PropertyDef::number())]).strict(),
    );
    let value = property
        .serialize_value(&json!({"a": "x", "c": 1}), Format::Json, &SerializeContext::new())
        .unwrap();
    assert_eq!(value, json!({"a": "x"}));
}

#[test]
fn loose_object_keeps_undeclared_keys() {
    let property = bind("", PropertyDef::object([("a", PropertyDef::text())]));
    let value = property
        .serialize_value(&json!({"a": 1, "c": 1}), Format::Json, &SerializeContext::new())
        .unwrap();
    assert_eq!(value, json!({"a": "1", "c": 1}));
}

#[tokio::test]
async fn relation_array_becomes_deferred_list() {
    let property = bind("tags", PropertyDef::array(PropertyDef::relation("tags")));
    let resolver = Arc::new(Tags(vec![json!({"_id": TAG_ID, "label": "rust"})]));
    let ctx = SerializeContext::new().with_resolver(resolver);

    let formatted = property.serialize(&json!([TAG_ID]), Format::Object, &ctx).unwrap();
    let Formatted::RelationList(handle) = formatted else {
        panic!("expected a relation list handle");
    };
    assert_eq!(handle.ids(), &[TAG_ID.to_string()]);
    assert_eq!(handle.descriptor.model, "tags");

    let resolved = handle.resolve().await.unwrap();
    assert_eq!(resolved, vec![json!({"_id": TAG_ID, "label": "rust"})]);
}

#[test]
fn relation_array_in_json_is_plain_ids() {
    let property = bind("tags", PropertyDef::array(PropertyDef::relation("tags")));
    let value = property
        .serialize_value(&json!([{"_id": TAG_ID}]), Format::Json, &SerializeContext::new())
        .unwrap();
    assert_eq!(value, json!([TAG_ID]));
}

#[test]
fn conditional_properties_hide_siblings() {
    let property = bind(
        "channel",
        PropertyDef::object([
            ("kind", PropertyDef::text()),
            ("address", PropertyDef::text()),
            ("phone", PropertyDef::text()),
        ])
        .with_conditional(
            ConditionalProperties::new("$.kind")
                .when("email", &["address"])
                .when("sms", &["phone"]),
        ),
    );
    let raw = json!({"kind": "sms", "address": "a@b.c", "phone": "555"});
    let value = property
        .serialize_value(&raw, Format::Json, &SerializeContext::new())
        .unwrap();
    assert_eq!(value, json!({"kind": "sms", "phone": "555"}));

    let formatted = property.serialize(&raw, Format::Object, &SerializeContext::new()).unwrap();
    let record = formatted.as_record().unwrap();
    assert!(record.get("address").unwrap().is_none());
    assert_eq!(record.raw()["address"], "a@b.c");
}

#[test]
fn null_date_serializes_to_null() {
    let property = bind("publishedAt", PropertyDef::date());
    for format in [Format::Json, Format::Data, Format::Validation] {
        let value = property
            .serialize_value(&Value::Null, format, &SerializeContext::new())
            .unwrap();
        assert_eq!(value, Value::Null);
    }
}
