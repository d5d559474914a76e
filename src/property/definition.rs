//! Property definitions: the `{ type, options }` schema shape.
//!
//! Definitions are the persisted/wire form of a schema slot. They are plain
//! data and never change once built; binding a definition to a path produces
//! a [`Property`](super::Property).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::ValidatorDef;

/// Supported property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    /// 24-hex document identifier
    Identifier,
    /// UTF-8 text
    Text,
    /// Floating point or integral number
    Number,
    /// Integral number
    Integer,
    /// Boolean
    Boolean,
    /// Point in time
    Date,
    /// Account identity reference
    Identity,
    /// Reference to a record of another model
    Relation,
    /// Nested object with its own property map
    Object,
    /// Homogeneous array of an item property
    Array,
    /// Text restricted to declared values
    Enum,
    /// Untyped pass-through value
    Default,
}

impl PropertyType {
    /// Returns the type name for error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Identifier => "identifier",
            PropertyType::Text => "text",
            PropertyType::Number => "number",
            PropertyType::Integer => "integer",
            PropertyType::Boolean => "boolean",
            PropertyType::Date => "date",
            PropertyType::Identity => "identity",
            PropertyType::Relation => "relation",
            PropertyType::Object => "object",
            PropertyType::Array => "array",
            PropertyType::Enum => "enum",
            PropertyType::Default => "default",
        }
    }
}

/// Conditional visibility of an object's keys.
///
/// `depends_on` names the discriminant path; a leading `$` stands for the
/// path of the object that declares the condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalProperties {
    pub depends_on: String,
    /// Discriminant value -> visible key subset
    #[serde(default)]
    pub mapping: IndexMap<String, Vec<String>>,
    /// Subset used when the discriminant value is not mapped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Vec<String>>,
}

impl ConditionalProperties {
    pub fn new(depends_on: impl Into<String>) -> Self {
        Self {
            depends_on: depends_on.into(),
            mapping: IndexMap::new(),
            default: None,
        }
    }

    pub fn when(mut self, value: impl Into<String>, keys: &[&str]) -> Self {
        self.mapping
            .insert(value.into(), keys.iter().map(|k| k.to_string()).collect());
        self
    }

    pub fn otherwise(mut self, keys: &[&str]) -> Self {
        self.default = Some(keys.iter().map(|k| k.to_string()).collect());
        self
    }
}

/// Type-dependent options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyOptions {
    /// Value applied when the stored value is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values (text and enum)
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    /// Target model slug (relation)
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Item definition (array)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertyDef>>,

    /// Declared keys (object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<IndexMap<String, PropertyDef>>,

    /// Serializer for undeclared keys (object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Box<PropertyDef>>,

    /// Drop undeclared keys (object)
    #[serde(default, skip_serializing_if = "is_false")]
    pub strict: bool,

    /// Discriminant-driven key visibility (object)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional_properties: Option<ConditionalProperties>,

    /// Validators scoped to this property's path
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<ValidatorDef>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl PropertyOptions {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Property definition as persisted by the schema collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    #[serde(rename = "type")]
    pub kind: PropertyType,
    #[serde(default, skip_serializing_if = "PropertyOptions::is_empty")]
    pub options: PropertyOptions,
}

impl PropertyDef {
    /// Create a definition with empty options
    pub fn new(kind: PropertyType) -> Self {
        Self {
            kind,
            options: PropertyOptions::default(),
        }
    }

    pub fn identifier() -> Self {
        Self::new(PropertyType::Identifier)
    }

    pub fn text() -> Self {
        Self::new(PropertyType::Text)
    }

    pub fn number() -> Self {
        Self::new(PropertyType::Number)
    }

    pub fn integer() -> Self {
        Self::new(PropertyType::Integer)
    }

    pub fn boolean() -> Self {
        Self::new(PropertyType::Boolean)
    }

    pub fn date() -> Self {
        Self::new(PropertyType::Date)
    }

    pub fn identity() -> Self {
        Self::new(PropertyType::Identity)
    }

    pub fn any() -> Self {
        Self::new(PropertyType::Default)
    }

    /// Relation to records of `model`
    pub fn relation(model: impl Into<String>) -> Self {
        let mut def = Self::new(PropertyType::Relation);
        def.options.reference = Some(model.into());
        def
    }

    /// Array of `items`
    pub fn array(items: PropertyDef) -> Self {
        let mut def = Self::new(PropertyType::Array);
        def.options.items = Some(Box::new(items));
        def
    }

    /// Object with declared keys, in declaration order
    pub fn object<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, PropertyDef)>,
        K: Into<String>,
    {
        let mut def = Self::new(PropertyType::Object);
        def.options.properties = Some(
            properties
                .into_iter()
                .map(|(k, v)| (k.into(), v))
                .collect(),
        );
        def
    }

    /// Enum over the given values
    pub fn enumeration(values: &[&str]) -> Self {
        Self::new(PropertyType::Enum).with_enum(values)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.options.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: &[&str]) -> Self {
        self.options.enum_values = Some(values.iter().map(|v| Value::from(*v)).collect());
        self
    }

    pub fn strict(mut self) -> Self {
        self.options.strict = true;
        self
    }

    pub fn with_additional(mut self, def: PropertyDef) -> Self {
        self.options.additional_properties = Some(Box::new(def));
        self
    }

    pub fn with_conditional(mut self, conditional: ConditionalProperties) -> Self {
        self.options.conditional_properties = Some(conditional);
        self
    }

    pub fn with_validator(mut self, validator: ValidatorDef) -> Self {
        self.options.validators.push(validator);
        self
    }

    /// Target model of a relation, or of an array of relations.
    pub fn relation_target(&self) -> Option<&str> {
        match self.kind {
            PropertyType::Relation => self.options.reference.as_deref(),
            PropertyType::Array => self
                .options
                .items
                .as_ref()
                .filter(|items| items.kind == PropertyType::Relation)
                .and_then(|items| items.options.reference.as_deref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_json_shape() {
        let def: PropertyDef = serde_json::from_value(json!({
            "type": "array",
            "options": {"items": {"type": "relation", "options": {"ref": "tags"}}}
        }))
        .unwrap();

        assert_eq!(def.kind, PropertyType::Array);
        assert_eq!(def.relation_target(), Some("tags"));
    }

    #[test]
    fn test_object_definition_keeps_declaration_order() {
        let def: PropertyDef = serde_json::from_value(json!({
            "type": "object",
            "options": {
                "strict": true,
                "properties": {"z": {"type": "text"}, "a": {"type": "number"}}
            }
        }))
        .unwrap();

        let keys: Vec<&String> = def.options.properties.as_ref().unwrap().keys().collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert!(def.options.strict);
    }

    #[test]
    fn test_empty_options_are_omitted() {
        let value = serde_json::to_value(PropertyDef::text()).unwrap();
        assert_eq!(value, json!({"type": "text"}));
    }

    #[test]
    fn test_conditional_round_trip() {
        let def = PropertyDef::object([("kind", PropertyDef::text())]).with_conditional(
            ConditionalProperties::new("$.kind")
                .when("email", &["address"])
                .otherwise(&[]),
        );
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["options"]["conditionalProperties"]["dependsOn"], "$.kind");

        let back: PropertyDef = serde_json::from_value(value).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn test_type_names() {
        assert_eq!(PropertyType::Identifier.as_str(), "identifier");
        assert_eq!(PropertyType::Default.as_str(), "default");
    }
}
