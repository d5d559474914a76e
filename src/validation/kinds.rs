//! Built-in validator implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use indexmap::IndexMap;
use regex::RegexBuilder;
use serde_json::{json, Value};

use super::definition::ValidatorDef;
use super::errors::ValidatorFailure;
use super::pipeline::{ValidationEnv, ValidatorInput};
use crate::document::{collect_path, get_path};
use crate::error::{DataError, DataResult};
use crate::property::{Property, PropertyDef};

/// Slug pattern enforced on key properties
pub const KEY_PATTERN: &str = "^[a-z0-9]+(?:[-_][a-z0-9]+)*$";

/// Implementation of one validator type.
pub trait ValidatorKind: Send + Sync {
    /// Name used in `{ "type": ... }`
    fn validator_type(&self) -> &'static str;

    /// Check every instance of the batch; an empty list means success.
    ///
    /// Storage failures are returned as errors, never as validation failures.
    fn validate<'a>(
        &'a self,
        input: &'a ValidatorInput<'a>,
    ) -> BoxFuture<'a, DataResult<Vec<ValidatorFailure>>>;
}

/// Registry of validator implementations
#[derive(Clone)]
pub struct ValidatorKinds {
    kinds: HashMap<String, Arc<dyn ValidatorKind>>,
}

impl ValidatorKinds {
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut kinds = Self::empty();
        kinds.register(Arc::new(Required));
        kinds.register(Arc::new(Unique));
        kinds.register(Arc::new(Pattern));
        kinds.register(Arc::new(Length));
        kinds.register(Arc::new(Boundaries));
        kinds.register(Arc::new(KeyProperty));
        kinds.register(Arc::new(DataModelShape));
        kinds.register(Arc::new(Exists));
        kinds
    }

    pub fn register(&mut self, kind: Arc<dyn ValidatorKind>) {
        self.kinds.insert(kind.validator_type().to_string(), kind);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ValidatorKind>> {
        self.kinds.get(kind).cloned()
    }
}

impl Default for ValidatorKinds {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for ValidatorKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.kinds.keys().collect();
        names.sort();
        f.debug_struct("ValidatorKinds").field("types", &names).finish()
    }
}

/// Present, non-null values at the input path for one instance
fn present<'v>(instance: &'v Value, path: &str) -> Vec<&'v Value> {
    collect_path(instance, path)
        .into_iter()
        .filter(|v| !v.is_null())
        .collect()
}

fn param_f64(def: &ValidatorDef, key: &str) -> DataResult<Option<f64>> {
    match def.param(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            DataError::schema(format!("validator '{}' expects a numeric '{}'", def.kind, key))
        }),
    }
}

// ==================
// required
// ==================

struct Required;

impl ValidatorKind for Required {
    fn validator_type(&self) -> &'static str {
        "required"
    }

    fn validate<'a>(
        &'a self,
        input: &'a ValidatorInput<'a>,
    ) -> BoxFuture<'a, DataResult<Vec<ValidatorFailure>>> {
        async move {
            let failures = input
                .instances
                .iter()
                .filter(|instance| {
                    let values = present(instance, &input.path);
                    values.is_empty() || values.iter().all(|v| v.as_str() == Some(""))
                })
                .map(|_| {
                    ValidatorFailure::new(
                        "required",
                        input.path.clone(),
                        Value::Null,
                        format!("'{}' is required", input.path),
                    )
                })
                .collect();
            Ok(failures)
        }
        .boxed()
    }
}

// ==================
// unique
// ==================

struct Unique;

impl ValidatorKind for Unique {
    fn validator_type(&self) -> &'static str {
        "unique"
    }

    fn validate<'a>(
        &'a self,
        input: &'a ValidatorInput<'a>,
    ) -> BoxFuture<'a, DataResult<Vec<ValidatorFailure>>> {
        async move {
            let batch_ids: Vec<Value> = input
                .instances
                .iter()
                .filter_map(|i| i.get("_id").cloned())
                .collect();

            let mut seen: Vec<&Value> = Vec::new();
            let mut failures = Vec::new();

            for instance in input.instances {
                let Some(value) = get_path(instance, &input.path).filter(|v| !v.is_null()) else {
                    continue;
                };

                let taken = if seen.contains(&value) {
                    true
                } else {
                    seen.push(value);
                    match input.env.lookup {
                        Some(lookup) => {
                            let filter = json!({
                                input.path.clone(): value,
                                "_id": {"$nin": batch_ids},
                            });
                            lookup.count(input.slug, filter).await? > 0
                        }
                        None => false,
                    }
                };

                if taken {
                    failures.push(ValidatorFailure::new(
                        "unique",
                        input.path.clone(),
                        value.clone(),
                        format!("'{}' must be unique, {} is already taken", input.path, value),
                    ));
                }
            }
            Ok(failures)
        }
        .boxed()
    }
}

// ==================
// regex
// ==================

struct Pattern;

impl ValidatorKind for Pattern {
    fn validator_type(&self) -> &'static str {
        "regex"
    }

    fn validate<'a>(
        &'a self,
        input: &'a ValidatorInput<'a>,
    ) -> BoxFuture<'a, DataResult<Vec<ValidatorFailure>>> {
        async move {
            let pattern = input
                .def
                .param("pattern")
                .and_then(Value::as_str)
                .ok_or_else(|| DataError::schema("regex validator requires a 'pattern'"))?;
            let flags = input.def.param("flags").and_then(Value::as_str).unwrap_or("");
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(flags.contains('i'))
                .multi_line(flags.contains('m'))
                .build()
                .map_err(|e| DataError::schema(format!("invalid regex '{}': {}", pattern, e)))?;

            let mut failures = Vec::new();
            for instance in input.instances {
                for value in present(instance, &input.path) {
                    let matched = value.as_str().map(|s| regex.is_match(s)).unwrap_or(false);
                    if !matched {
                        failures.push(ValidatorFailure::new(
                            input.def.kind.clone(),
                            input.path.clone(),
                            value.clone(),
                            format!("'{}' must match {}", input.path, pattern),
                        ));
                    }
                }
            }
            Ok(failures)
        }
        .boxed()
    }
}

// ==================
// length
// ==================

struct Length;

impl ValidatorKind for Length {
    fn validator_type(&self) -> &'static str {
        "length"
    }

    fn validate<'a>(
        &'a self,
        input: &'a ValidatorInput<'a>,
    ) -> BoxFuture<'a, DataResult<Vec<ValidatorFailure>>> {
        async move {
            let min = param_f64(input.def, "min")?;
            let max = param_f64(input.def, "max")?;

            let mut failures = Vec::new();
            for instance in input.instances {
                for value in present(instance, &input.path) {
                    let len = match value {
                        Value::String(s) => s.chars().count(),
                        Value::Array(items) => items.len(),
                        _ => continue,
                    };
                    let len = len as f64;

                    let too_short = min.map(|m| len < m).unwrap_or(false);
                    let too_long = max.map(|m| len > m).unwrap_or(false);
                    if too_short || too_long {
                        failures.push(ValidatorFailure::new(
                            "length",
                            input.path.clone(),
                            value.clone(),
                            format!(
                                "'{}' length {} is outside [{}, {}]",
                                input.path,
                                len,
                                min.map(|m| m.to_string()).unwrap_or_default(),
                                max.map(|m| m.to_string()).unwrap_or_default()
                            ),
                        ));
                    }
                }
            }
            Ok(failures)
        }
        .boxed()
    }
}

// ==================
// boundaries
// ==================

struct Boundaries;

impl ValidatorKind for Boundaries {
    fn validator_type(&self) -> &'static str {
        "boundaries"
    }

    fn validate<'a>(
        &'a self,
        input: &'a ValidatorInput<'a>,
    ) -> BoxFuture<'a, DataResult<Vec<ValidatorFailure>>> {
        async move {
            let min = param_f64(input.def, "min")?;
            let max = param_f64(input.def, "max")?;

            let mut failures = Vec::new();
            for instance in input.instances {
                for value in present(instance, &input.path) {
                    let Some(n) = value.as_f64() else {
                        continue;
                    };
                    if min.map(|m| n < m).unwrap_or(false) || max.map(|m| n > m).unwrap_or(false) {
                        failures.push(ValidatorFailure::new(
                            "boundaries",
                            input.path.clone(),
                            value.clone(),
                            format!("'{}' is out of bounds", input.path),
                        ));
                    }
                }
            }
            Ok(failures)
        }
        .boxed()
    }
}

// ==================
// keyProperty
// ==================

struct KeyProperty;

impl ValidatorKind for KeyProperty {
    fn validator_type(&self) -> &'static str {
        "keyProperty"
    }

    fn validate<'a>(
        &'a self,
        input: &'a ValidatorInput<'a>,
    ) -> BoxFuture<'a, DataResult<Vec<ValidatorFailure>>> {
        async move {
            let delegates = [
                ValidatorDef::regex(input.def.property.clone(), KEY_PATTERN),
                ValidatorDef::required(input.def.property.clone()),
                ValidatorDef::unique(input.def.property.clone()),
            ];

            let mut failures = Vec::new();
            for def in &delegates {
                let kind = input
                    .env
                    .validator_kinds
                    .get(&def.kind)
                    .ok_or_else(|| {
                        DataError::schema(format!("validator '{}' is not registered", def.kind))
                    })?;
                let delegated = ValidatorInput {
                    def,
                    ..input.clone()
                };
                for failure in kind.validate(&delegated).await? {
                    failures.push(ValidatorFailure::new(
                        "keyProperty",
                        failure.validator.property,
                        failure.value,
                        format!("{}: {}", def.kind, failure.message),
                    ));
                }
            }
            Ok(failures)
        }
        .boxed()
    }
}

// ==================
// datamodel
// ==================

struct DataModelShape;

impl ValidatorKind for DataModelShape {
    fn validator_type(&self) -> &'static str {
        "datamodel"
    }

    fn validate<'a>(
        &'a self,
        input: &'a ValidatorInput<'a>,
    ) -> BoxFuture<'a, DataResult<Vec<ValidatorFailure>>> {
        async move {
            let mut failures = Vec::new();
            for instance in input.instances {
                for value in present(instance, &input.path) {
                    if let Err(reason) = check_property_map(value, input.env) {
                        failures.push(ValidatorFailure::new(
                            "datamodel",
                            input.path.clone(),
                            value.clone(),
                            format!("'{}' is not a valid property map: {}", input.path, reason),
                        ));
                    }
                }
            }
            Ok(failures)
        }
        .boxed()
    }
}

fn check_property_map(value: &Value, env: &ValidationEnv<'_>) -> Result<(), String> {
    let properties: IndexMap<String, PropertyDef> =
        serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
    for (key, def) in &properties {
        Property::bind(key, def, env.property_kinds).map_err(|e| e.to_string())?;
    }
    Ok(())
}

// ==================
// exists
// ==================

struct Exists;

impl ValidatorKind for Exists {
    fn validator_type(&self) -> &'static str {
        "exists"
    }

    fn validate<'a>(
        &'a self,
        input: &'a ValidatorInput<'a>,
    ) -> BoxFuture<'a, DataResult<Vec<ValidatorFailure>>> {
        async move {
            let model = match input.def.param("model").and_then(Value::as_str) {
                Some(model) => model.to_string(),
                None => input
                    .root
                    .lookup(&input.path)
                    .and_then(|p| p.relation_target().map(str::to_string))
                    .ok_or_else(|| {
                        DataError::schema(format!(
                            "exists validator on '{}' needs a relation or a 'model'",
                            input.path
                        ))
                    })?,
            };
            let Some(lookup) = input.env.lookup else {
                return Ok(Vec::new());
            };

            let mut failures = Vec::new();
            for instance in input.instances {
                for value in present(instance, &input.path) {
                    let ids: Vec<Value> = match value {
                        Value::Array(items) => items.clone(),
                        other => vec![other.clone()],
                    };
                    if ids.is_empty() {
                        continue;
                    }
                    let found = lookup.count(&model, json!({"_id": {"$in": ids}})).await?;
                    if found < ids.len() as u64 {
                        failures.push(ValidatorFailure::new(
                            "exists",
                            input.path.clone(),
                            value.clone(),
                            format!("'{}' references a missing {} record", input.path, model),
                        ));
                    }
                }
            }
            Ok(failures)
        }
        .boxed()
    }
}
