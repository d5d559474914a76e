//! Write validation through the adapter

use std::sync::Arc;

use serde_json::json;
use vaultbase::validation::ValidationError;
use vaultbase::{
    Adapter, DataConfig, DataError, InMemoryStore, ModelConfig, PropertyDef, Query, RequestContext,
    ValidatorDef,
};

fn adapter() -> Adapter {
    let adapter = Adapter::new(Arc::new(InMemoryStore::new()), DataConfig::default());
    adapter
        .define(
            ModelConfig::new("pages")
                .property("slug", PropertyDef::text())
                .property("title", PropertyDef::text())
                .validator(ValidatorDef::required("slug"))
                .validator(ValidatorDef::unique("slug")),
        )
        .unwrap();
    adapter
}

#[tokio::test]
async fn duplicate_slug_fails_unique_only() {
    let adapter = adapter();
    let ctx = RequestContext::new();
    adapter
        .create_one(&ctx, "pages", json!({"slug": "foo"}))
        .await
        .unwrap();

    let err = adapter
        .create_one(&ctx, "pages", json!({"slug": "foo"}))
        .await
        .unwrap_err();
    let DataError::Validation(failure) = err else {
        panic!("expected a validation error, got {:?}", err);
    };
    assert!(failure.properties.is_empty());
    assert_eq!(failure.validators.len(), 1);
    assert_eq!(failure.validators[0].validator.property, "slug");
    assert_eq!(failure.validators[0].validator.kind, "unique");

    // The rejected write was rolled back
    assert_eq!(adapter.count(&ctx, "pages", Query::new()).await.unwrap(), 1);
    assert_eq!(adapter.metrics().snapshot().validation_failures, 1);
}

#[tokio::test]
async fn duplicates_inside_one_batch_are_caught() {
    let adapter = adapter();
    let ctx = RequestContext::new();
    let err = adapter
        .create_multiple(&ctx, "pages", vec![json!({"slug": "a"}), json!({"slug": "a"})])
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::Validation(_)));
    assert_eq!(adapter.count(&ctx, "pages", Query::new()).await.unwrap(), 0);
}

#[tokio::test]
async fn updating_into_a_taken_slug_fails() {
    let adapter = adapter();
    let ctx = RequestContext::new();
    adapter
        .create_multiple(&ctx, "pages", vec![json!({"slug": "a"}), json!({"slug": "b"})])
        .await
        .unwrap();

    let err = adapter
        .update_one(&ctx, "pages", Query::filter(json!({"slug": "b"})), json!({"slug": "a"}))
        .await
        .unwrap_err();
    assert!(matches!(err, DataError::Validation(_)));

    // Updating a record to its own value is fine
    adapter
        .update_one(&ctx, "pages", Query::filter(json!({"slug": "b"})), json!({"title": "B"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn validation_can_be_disabled() {
    let config = DataConfig::from_json_str(r#"{"validateOnWrite": false}"#).unwrap();
    let adapter = Adapter::new(Arc::new(InMemoryStore::new()), config);
    adapter
        .define(
            ModelConfig::new("pages")
                .property("slug", PropertyDef::text())
                .validator(ValidatorDef::required("slug")),
        )
        .unwrap();

    let ctx = RequestContext::new();
    adapter.create_one(&ctx, "pages", json!({})).await.unwrap();
}

#[test]
fn validation_error_survives_json() {
    let mut error = ValidationError::new();
    error.push_property("pages", "slug", "'slug' must be a string");
    let json = error.to_json();
    assert_eq!(ValidationError::from_json(&json).unwrap(), error);
    assert_eq!(DataError::Validation(error).code(), "VALIDATION_FAILED");
}
