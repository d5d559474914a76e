//! Model configuration and bound models.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{DataError, DataResult};
use crate::property::{Property, PropertyDef, PropertyKinds, PropertyType};
use crate::storage::Namespace;
use crate::validation::{ValidationTarget, ValidatorDef};

/// Backing collection shared by every single-instance model
pub const SINGLETON_COLLECTION: &str = "_singletons";

/// Hidden field segmenting the singleton collection by model slug
pub const SINGLETON_FIELD: &str = "_model";

/// System properties every model declares
pub const SYSTEM_PROPERTIES: &[(&str, PropertyType)] = &[
    ("_id", PropertyType::Identifier),
    ("_createdAt", PropertyType::Date),
    ("_createdBy", PropertyType::Identity),
    ("_updatedAt", PropertyType::Date),
];

fn default_key_property() -> String {
    "_id".to_string()
}

/// Static configuration of a model, as persisted by the schema collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub slug: String,

    /// Declared properties, in declaration order
    #[serde(default)]
    pub properties: IndexMap<String, PropertyDef>,

    /// Model-level validators
    #[serde(default)]
    pub validators: Vec<ValidatorDef>,

    /// Property used for string-shorthand lookups
    #[serde(default = "default_key_property")]
    pub key_property: String,

    /// Stored in `<database>-<environment>` when the request names one
    #[serde(default)]
    pub environment_scoped: bool,

    #[serde(default)]
    pub realtime: bool,

    /// One record per model, kept in the shared singleton collection
    #[serde(default)]
    pub single_instance: bool,

    #[serde(default)]
    pub connectable: bool,

    /// Physical database overriding the adapter's base database
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl ModelConfig {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            properties: IndexMap::new(),
            validators: Vec::new(),
            key_property: default_key_property(),
            environment_scoped: false,
            realtime: false,
            single_instance: false,
            connectable: false,
            database: None,
        }
    }

    pub fn property(mut self, name: impl Into<String>, def: PropertyDef) -> Self {
        self.properties.insert(name.into(), def);
        self
    }

    pub fn validator(mut self, def: ValidatorDef) -> Self {
        self.validators.push(def);
        self
    }

    pub fn key_property(mut self, name: impl Into<String>) -> Self {
        self.key_property = name.into();
        self
    }

    pub fn environment_scoped(mut self) -> Self {
        self.environment_scoped = true;
        self
    }

    pub fn single_instance(mut self) -> Self {
        self.single_instance = true;
        self
    }

    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// A model configuration bound to property implementations.
#[derive(Debug)]
pub struct Model {
    config: ModelConfig,
    root: Property,
}

impl Model {
    /// Bind a configuration. System properties are added unless declared.
    pub fn bind(config: ModelConfig, kinds: &PropertyKinds) -> DataResult<Self> {
        if config.slug.is_empty() {
            return Err(DataError::schema("model slug must not be empty"));
        }

        let mut properties: IndexMap<String, PropertyDef> = SYSTEM_PROPERTIES
            .iter()
            .filter(|(name, _)| !config.properties.contains_key(*name))
            .map(|(name, kind)| (name.to_string(), PropertyDef::new(*kind)))
            .collect();
        properties.extend(config.properties.clone());

        if !properties.contains_key(&config.key_property) {
            return Err(DataError::schema(format!(
                "model '{}' declares key property '{}' but no such property",
                config.slug, config.key_property
            )));
        }

        let root = Property::bind("", &PropertyDef::object(properties).strict(), kinds)?;
        Ok(Self { config, root })
    }

    pub fn slug(&self) -> &str {
        &self.config.slug
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Strict root object property
    pub fn root(&self) -> &Property {
        &self.root
    }

    /// Property declared at a dotted path
    pub fn property(&self, path: &str) -> Option<Property> {
        if path.is_empty() {
            return None;
        }
        self.root.lookup(path)
    }

    pub fn key_property(&self) -> &str {
        &self.config.key_property
    }

    pub fn is_single_instance(&self) -> bool {
        self.config.single_instance
    }

    pub fn collection(&self) -> &str {
        if self.config.single_instance {
            SINGLETON_COLLECTION
        } else {
            &self.config.slug
        }
    }

    /// Physical location for a request in `environment`
    pub fn namespace(&self, base_database: &str, environment: Option<&str>) -> Namespace {
        let database = self.config.database.as_deref().unwrap_or(base_database);
        let database = match environment {
            Some(env) if self.config.environment_scoped && !env.is_empty() => {
                format!("{}-{}", database, env)
            }
            _ => database.to_string(),
        };
        Namespace::new(database, self.collection())
    }

    /// Cache prefix owned by this model in `ns`
    pub fn cache_key(&self, ns: &Namespace) -> String {
        if self.config.single_instance {
            format!("{}:{}:{}", ns.database, ns.collection, self.config.slug)
        } else {
            format!("{}:{}", ns.database, ns.collection)
        }
    }

    /// Restrict a storage filter to this model's records
    pub fn scope_filter(&self, filter: Value) -> Value {
        if !self.config.single_instance {
            return filter;
        }
        let mut scope = Map::new();
        scope.insert(SINGLETON_FIELD.to_string(), Value::String(self.config.slug.clone()));

        match filter {
            Value::Object(mut map) if !map.contains_key(SINGLETON_FIELD) => {
                map.extend(scope);
                Value::Object(map)
            }
            Value::Object(map) => json!({"$and": [map, scope]}),
            _ => Value::Object(scope),
        }
    }

    /// Tag a document about to be stored
    pub fn scope_document(&self, document: &mut Value) {
        if !self.config.single_instance {
            return;
        }
        if let Value::Object(map) = document {
            map.insert(
                SINGLETON_FIELD.to_string(),
                Value::String(self.config.slug.clone()),
            );
        }
    }

    /// Every relation path with its target model
    pub fn relations(&self) -> Vec<(String, String)> {
        self.root
            .flatten()
            .iter()
            .filter_map(|p| {
                p.relation_target()
                    .map(|target| (p.path().to_string(), target.to_string()))
            })
            .collect()
    }

    pub fn validation_target(&self) -> ValidationTarget<'_> {
        ValidationTarget {
            slug: &self.config.slug,
            root: &self.root,
            validators: &self.config.validators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kinds() -> PropertyKinds {
        PropertyKinds::builtin()
    }

    #[test]
    fn test_system_properties_are_declared() {
        let model = Model::bind(
            ModelConfig::new("posts").property("title", PropertyDef::text()),
            &kinds(),
        )
        .unwrap();
        let keys: Vec<&String> = model.root().children().keys().collect();
        assert_eq!(keys, vec!["_id", "_createdAt", "_createdBy", "_updatedAt", "title"]);
        assert!(model.root().options().strict);
    }

    #[test]
    fn test_config_json_shape() {
        let config: ModelConfig = serde_json::from_value(json!({
            "slug": "roles",
            "keyProperty": "name",
            "environmentScoped": true,
            "properties": {"name": {"type": "text"}}
        }))
        .unwrap();
        assert_eq!(config.key_property, "name");
        assert!(config.environment_scoped);
        assert!(Model::bind(config, &kinds()).is_ok());
    }

    #[test]
    fn test_undeclared_key_property_is_rejected() {
        let err =
            Model::bind(ModelConfig::new("roles").key_property("name"), &kinds()).unwrap_err();
        assert!(matches!(err, DataError::Schema(_)));
    }

    #[test]
    fn test_environment_scoped_namespace() {
        let model = Model::bind(ModelConfig::new("logs").environment_scoped(), &kinds()).unwrap();
        assert_eq!(model.namespace("app", Some("staging")).database, "app-staging");
        assert_eq!(model.namespace("app", None).database, "app");

        let plain = Model::bind(ModelConfig::new("users"), &kinds()).unwrap();
        assert_eq!(plain.namespace("app", Some("staging")).database, "app");
    }

    #[test]
    fn test_single_instance_scoping() {
        let model = Model::bind(ModelConfig::new("settings").single_instance(), &kinds()).unwrap();
        let ns = model.namespace("app", None);
        assert_eq!(ns.collection, SINGLETON_COLLECTION);
        assert_eq!(model.cache_key(&ns), "app:_singletons:settings");
        assert_eq!(model.scope_filter(json!({})), json!({"_model": "settings"}));

        let mut doc = json!({"theme": "dark"});
        model.scope_document(&mut doc);
        assert_eq!(doc["_model"], "settings");
    }

    #[test]
    fn test_relations_are_listed() {
        let model = Model::bind(
            ModelConfig::new("posts")
                .property("author", PropertyDef::relation("accounts"))
                .property("tags", PropertyDef::array(PropertyDef::relation("tags"))),
            &kinds(),
        )
        .unwrap();
        let relations = model.relations();
        assert!(relations.contains(&("author".to_string(), "accounts".to_string())));
        assert!(relations.contains(&("tags".to_string(), "tags".to_string())));
    }
}
