//! Validator definitions: `{ type, property, ...params }`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::join_path;

/// Declared validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorDef {
    #[serde(rename = "type")]
    pub kind: String,
    /// Target property, relative to the declaring container
    #[serde(default)]
    pub property: String,
    /// Type-specific parameters
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ValidatorDef {
    pub fn new(kind: impl Into<String>, property: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            property: property.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn required(property: impl Into<String>) -> Self {
        Self::new("required", property)
    }

    pub fn unique(property: impl Into<String>) -> Self {
        Self::new("unique", property)
    }

    pub fn regex(property: impl Into<String>, pattern: &str) -> Self {
        Self::new("regex", property).with_param("pattern", pattern)
    }

    pub fn length(property: impl Into<String>, min: Option<u64>, max: Option<u64>) -> Self {
        let mut def = Self::new("length", property);
        if let Some(min) = min {
            def = def.with_param("min", min);
        }
        if let Some(max) = max {
            def = def.with_param("max", max);
        }
        def
    }

    pub fn boundaries(property: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        let mut def = Self::new("boundaries", property);
        if let Some(min) = min {
            def = def.with_param("min", min);
        }
        if let Some(max) = max {
            def = def.with_param("max", max);
        }
        def
    }

    pub fn key_property(property: impl Into<String>) -> Self {
        Self::new("keyProperty", property)
    }

    pub fn datamodel(property: impl Into<String>) -> Self {
        Self::new("datamodel", property)
    }

    pub fn exists(property: impl Into<String>) -> Self {
        Self::new("exists", property)
    }

    /// Full dotted path once declared inside `container`
    pub fn path_in(&self, container: &str) -> String {
        join_path(container, &self.property)
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}
