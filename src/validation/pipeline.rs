//! Model-level validation pass.
//!
//! Runs every property's batch check, then every declared validator
//! (model-level and property-scoped), collecting all failures into one
//! [`ValidationError`].

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::definition::ValidatorDef;
use super::errors::ValidationError;
use super::kinds::ValidatorKinds;
use crate::document::collect_path;
use crate::error::{DataError, DataResult};
use crate::property::{Property, PropertyKinds};

/// Store access needed by validators that look beyond the batch.
pub trait RecordLookup: Send + Sync {
    /// Count records of `model` matching a storage filter
    fn count<'a>(&'a self, model: &'a str, filter: Value) -> BoxFuture<'a, DataResult<u64>>;
}

/// Registries and store access shared by every validator of one pass
#[derive(Clone, Copy)]
pub struct ValidationEnv<'a> {
    pub property_kinds: &'a PropertyKinds,
    pub validator_kinds: &'a ValidatorKinds,
    pub lookup: Option<&'a dyn RecordLookup>,
}

/// What gets validated: one model's bound properties and validators
#[derive(Clone, Copy)]
pub struct ValidationTarget<'a> {
    pub slug: &'a str,
    pub root: &'a Property,
    /// Model-level validators, relative to the model root
    pub validators: &'a [ValidatorDef],
}

/// Input of one validator run
#[derive(Clone)]
pub struct ValidatorInput<'a> {
    pub slug: &'a str,
    pub def: &'a ValidatorDef,
    /// Full dotted path of the target property
    pub path: String,
    pub root: &'a Property,
    /// Batch in `validation` format
    pub instances: &'a [Value],
    pub env: &'a ValidationEnv<'a>,
}

/// Collect every failure of the batch without raising.
pub async fn collect_failures(
    target: ValidationTarget<'_>,
    env: &ValidationEnv<'_>,
    instances: &[Value],
) -> DataResult<ValidationError> {
    let mut errors = ValidationError::new();
    let properties = target.root.flatten();

    for property in &properties {
        let values: Vec<&Value> = instances
            .iter()
            .flat_map(|instance| collect_path(instance, property.path()))
            .collect();
        if let Err(message) = property.validate(&values) {
            errors.push_property(target.slug, property.path(), message);
        }
    }

    let mut scoped: Vec<(&ValidatorDef, String)> = target
        .validators
        .iter()
        .map(|def| (def, def.path_in("")))
        .collect();
    for property in &properties {
        for def in &property.options().validators {
            scoped.push((def, def.path_in(property.path())));
        }
    }

    for (def, path) in scoped {
        let kind = env
            .validator_kinds
            .get(&def.kind)
            .ok_or_else(|| {
                DataError::schema(format!("validator '{}' is not registered", def.kind))
            })?;
        let input = ValidatorInput {
            slug: target.slug,
            def,
            path,
            root: target.root,
            instances,
            env,
        };
        for failure in kind.validate(&input).await? {
            errors.push_validator(failure);
        }
    }

    Ok(errors)
}

/// Validate a batch, raising the aggregate when anything failed.
pub async fn validate(
    target: ValidationTarget<'_>,
    env: &ValidationEnv<'_>,
    instances: &[Value],
) -> DataResult<()> {
    let errors = collect_failures(target, env, instances).await?;
    if !errors.is_empty() {
        debug!(
            target: "vaultbase::validation",
            model = target.slug,
            paths = ?errors.paths(),
            "validation rejected batch"
        );
    }
    errors.into_result().map_err(DataError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyDef;
    use futures_util::FutureExt;
    use serde_json::json;

    struct Taken(Vec<Value>);

    impl RecordLookup for Taken {
        fn count<'a>(&'a self, _model: &'a str, filter: Value) -> BoxFuture<'a, DataResult<u64>> {
            async move {
                let slug = &filter["slug"];
                Ok(self.0.iter().filter(|v| *v == slug).count() as u64)
            }
            .boxed()
        }
    }

    fn root() -> Property {
        let def = PropertyDef::object([
            ("slug", PropertyDef::text()),
            ("price", PropertyDef::number()),
            (
                "address",
                PropertyDef::object([("street", PropertyDef::text())])
                    .with_validator(ValidatorDef::required("street")),
            ),
        ]);
        Property::bind("", &def, &PropertyKinds::builtin()).unwrap()
    }

    async fn run(
        validators: &[ValidatorDef],
        instances: &[Value],
        lookup: Option<&dyn RecordLookup>,
    ) -> ValidationError {
        let root = root();
        let property_kinds = PropertyKinds::builtin();
        let validator_kinds = ValidatorKinds::builtin();
        let env = ValidationEnv {
            property_kinds: &property_kinds,
            validator_kinds: &validator_kinds,
            lookup,
        };
        let target = ValidationTarget {
            slug: "products",
            root: &root,
            validators,
        };
        collect_failures(target, &env, instances).await.unwrap()
    }

    #[tokio::test]
    async fn test_failures_do_not_short_circuit() {
        let validators = vec![
            ValidatorDef::required("slug"),
            ValidatorDef::regex("slug", "^[a-z]+$"),
        ];
        let errors = run(
            &validators,
            &[
                json!({"price": "cheap", "address": {"street": "x"}}),
                json!({"slug": "A1", "address": {}}),
            ],
            None,
        )
        .await;

        assert_eq!(errors.properties.len(), 1);
        assert_eq!(errors.properties[0].property, "price");
        let kinds: Vec<&str> = errors
            .validators
            .iter()
            .map(|v| v.validator.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["required", "regex", "required"]);
        assert_eq!(errors.paths(), vec!["price", "slug", "address.street"]);
    }

    #[tokio::test]
    async fn test_unique_consults_batch_and_store() {
        let lookup = Taken(vec![json!("taken")]);
        let validators = vec![ValidatorDef::unique("slug")];
        let errors = run(
            &validators,
            &[json!({"slug": "a"}), json!({"slug": "a"}), json!({"slug": "taken"})],
            Some(&lookup),
        )
        .await;

        let values: Vec<&Value> = errors.validators.iter().map(|v| &v.value).collect();
        assert_eq!(values, vec![&json!("a"), &json!("taken")]);
    }

    #[tokio::test]
    async fn test_key_property_composite() {
        let lookup = Taken(Vec::new());
        let validators = vec![ValidatorDef::key_property("slug")];

        let ok = run(&validators, &[json!({"slug": "good-slug"})], Some(&lookup)).await;
        assert!(ok.is_empty());

        let bad = run(&validators, &[json!({"slug": "Bad Slug"})], Some(&lookup)).await;
        assert_eq!(bad.validators.len(), 1);
        assert_eq!(bad.validators[0].validator.kind, "keyProperty");
        assert!(bad.validators[0].message.starts_with("regex:"));
    }

    #[tokio::test]
    async fn test_length_and_boundaries() {
        let validators = vec![
            ValidatorDef::length("slug", Some(2), Some(4)),
            ValidatorDef::boundaries("price", Some(0.0), None),
        ];
        let errors = run(&validators, &[json!({"slug": "abcdef", "price": -1})], None).await;
        let kinds: Vec<&str> = errors
            .validators
            .iter()
            .map(|v| v.validator.kind.as_str())
            .collect();
        assert_eq!(kinds, vec!["length", "boundaries"]);
    }

    #[tokio::test]
    async fn test_datamodel_shape() {
        let validators = vec![ValidatorDef::datamodel("slug")];
        let errors = run(
            &validators,
            &[
                json!({"slug": {"title": {"type": "text"}}}),
                json!({"slug": {"tags": {"type": "array"}}}),
            ],
            None,
        )
        .await;
        // The text-typed slug property also rejects both objects.
        assert_eq!(errors.validators.len(), 1);
        assert_eq!(errors.validators[0].value, json!({"tags": {"type": "array"}}));
    }

    #[tokio::test]
    async fn test_unknown_validator_is_a_schema_error() {
        let root = root();
        let property_kinds = PropertyKinds::builtin();
        let validator_kinds = ValidatorKinds::builtin();
        let env = ValidationEnv {
            property_kinds: &property_kinds,
            validator_kinds: &validator_kinds,
            lookup: None,
        };
        let validators = vec![ValidatorDef::new("palindrome", "slug")];
        let target = ValidationTarget {
            slug: "products",
            root: &root,
            validators: &validators,
        };
        let err = validate(target, &env, &[json!({})]).await.unwrap_err();
        assert!(matches!(err, DataError::Schema(_)));
    }
}
