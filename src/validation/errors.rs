//! # Validation Errors
//!
//! Aggregate of every property and validator failure found in one pass.
//! Nothing short-circuits: the error always lists every failing path.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A property rejected the values stored at its path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFailure {
    /// Model slug
    pub slug: String,
    /// Dotted property path
    pub property: String,
    pub message: String,
}

/// Identity of a failing validator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRef {
    #[serde(rename = "type")]
    pub kind: String,
    /// Full dotted path the validator targets
    pub property: String,
}

/// A validator rejected one value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorFailure {
    pub validator: ValidatorRef,
    /// Offending value (null when absent)
    #[serde(default)]
    pub value: Value,
    pub message: String,
}

impl ValidatorFailure {
    pub fn new(
        kind: impl Into<String>,
        property: impl Into<String>,
        value: Value,
        message: impl Into<String>,
    ) -> Self {
        Self {
            validator: ValidatorRef {
                kind: kind.into(),
                property: property.into(),
            },
            value,
            message: message.into(),
        }
    }
}

/// Aggregate validation error
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(default)]
    pub properties: Vec<PropertyFailure>,
    #[serde(default)]
    pub validators: Vec<ValidatorFailure>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.validators.is_empty()
    }

    pub fn push_property(
        &mut self,
        slug: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.properties.push(PropertyFailure {
            slug: slug.into(),
            property: property.into(),
            message: message.into(),
        });
    }

    pub fn push_validator(&mut self, failure: ValidatorFailure) {
        self.validators.push(failure);
    }

    pub fn merge(&mut self, other: ValidationError) {
        self.properties.extend(other.properties);
        self.validators.extend(other.validators);
    }

    /// `Ok(())` when nothing failed
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Every failing path, first occurrence order, without duplicates.
    pub fn paths(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.properties
            .iter()
            .map(|p| p.property.as_str())
            .chain(self.validators.iter().map(|v| v.validator.property.as_str()))
            .filter(|path| seen.insert(*path))
            .map(str::to_string)
            .collect()
    }

    /// Failures touching exactly `path`
    pub fn on_path(&self, path: &str) -> ValidationError {
        ValidationError {
            properties: self
                .properties
                .iter()
                .filter(|p| p.property == path)
                .cloned()
                .collect(),
            validators: self
                .validators
                .iter()
                .filter(|v| v.validator.property == path)
                .cloned()
                .collect(),
        }
    }

    /// Summary enumerating failure counts per class.
    pub fn message(&self) -> String {
        let mut parts = Vec::new();

        if !self.properties.is_empty() {
            let mut paths: Vec<&str> =
                self.properties.iter().map(|p| p.property.as_str()).collect();
            paths.dedup();
            parts.push(format!(
                "{} invalid propert{} ({})",
                self.properties.len(),
                if self.properties.len() == 1 { "y" } else { "ies" },
                paths.join(", ")
            ));
        }

        if !self.validators.is_empty() {
            let mut kinds: Vec<String> = Vec::new();
            for failure in &self.validators {
                let label = format!("{} on {}", failure.validator.kind, failure.validator.property);
                if !kinds.contains(&label) {
                    kinds.push(label);
                }
            }
            parts.push(format!(
                "{} failed validator{} ({})",
                self.validators.len(),
                if self.validators.len() == 1 { "" } else { "s" },
                kinds.join(", ")
            ));
        }

        if parts.is_empty() {
            "Validation failed".to_string()
        } else {
            format!("Validation failed: {}", parts.join("; "))
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ValidationError {}
