//! # Property Engine
//!
//! Typed schema slots bound to dotted paths inside a model, with one
//! serializer table per property type and batch-scale shape validation.
//!
//! A [`PropertyDef`] is plain data. Binding it against a [`PropertyKinds`]
//! registry yields a [`Property`] tree: every node knows its path, its
//! definition and the kind implementing its formats.

mod definition;
mod errors;
mod format;
mod identifier;
mod kinds;
mod object;
mod relation;

pub use definition::{ConditionalProperties, PropertyDef, PropertyOptions, PropertyType};
pub use errors::{PropertyError, PropertyResult};
pub use format::{format_date, Format, FormatTable, Formatted, SerializeContext, SerializeFn};
pub use identifier::{generate_identifier, is_identifier};
pub use kinds::{parse_date, BuiltinKind};
pub use object::LazyRecord;
pub(crate) use object::Visibility;
pub use relation::{
    RelationDescriptor, RelationHandle, RelationListDescriptor, RelationListHandle, RelationQuery,
    RelationResolver,
};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::document::join_path;

/// Implementation of one property type.
///
/// The adapter holds one implementation per [`PropertyType`]; deployments may
/// replace any of them through [`PropertyKinds::register`].
pub trait PropertyKind: Send + Sync {
    /// Type this implementation serves
    fn property_type(&self) -> PropertyType;

    /// Serializer table
    fn formats(&self) -> &FormatTable;

    /// Check every raw value stored at one path across a batch of instances.
    ///
    /// Null values are never passed in.
    fn validate(&self, _property: &Property, _values: &[&Value]) -> Result<(), String> {
        Ok(())
    }
}

/// Registry of property type implementations
#[derive(Clone)]
pub struct PropertyKinds {
    kinds: HashMap<PropertyType, Arc<dyn PropertyKind>>,
}

impl PropertyKinds {
    /// Empty registry
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Registry holding the built-in implementation of every type
    pub fn builtin() -> Self {
        let mut kinds = Self::empty();
        for kind in BuiltinKind::all() {
            kinds.register(Arc::new(kind));
        }
        kinds
    }

    /// Register (or replace) the implementation of a type
    pub fn register(&mut self, kind: Arc<dyn PropertyKind>) {
        self.kinds.insert(kind.property_type(), kind);
    }

    pub fn get(&self, property_type: PropertyType) -> Option<Arc<dyn PropertyKind>> {
        self.kinds.get(&property_type).cloned()
    }
}

impl Default for PropertyKinds {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for PropertyKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&PropertyType> = self.kinds.keys().collect();
        types.sort();
        f.debug_struct("PropertyKinds").field("types", &types).finish()
    }
}

struct PropertyNode {
    path: String,
    name: String,
    def: PropertyDef,
    kind: Arc<dyn PropertyKind>,
    children: IndexMap<String, Property>,
    items: Option<Property>,
    additional: Option<Property>,
}

/// A property definition bound to a dotted path.
///
/// Cheap to clone; the tree is shared.
#[derive(Clone)]
pub struct Property(Arc<PropertyNode>);

impl Property {
    /// Bind `def` at `path`, recursively binding nested definitions.
    pub fn bind(path: &str, def: &PropertyDef, kinds: &PropertyKinds) -> PropertyResult<Self> {
        let kind = kinds
            .get(def.kind)
            .ok_or_else(|| PropertyError::UnknownType(def.kind.as_str().to_string()))?;

        let name = path.rsplit('.').next().unwrap_or_default().to_string();
        let mut children = IndexMap::new();
        let mut items = None;
        let mut additional = None;

        match def.kind {
            PropertyType::Array => {
                let item_def = def
                    .options
                    .items
                    .as_ref()
                    .ok_or_else(|| PropertyError::MissingItems(path.to_string()))?;
                // Items share the array's path: stored elements are addressed
                // by the array path itself.
                items = Some(Self::bind(path, item_def, kinds)?);
            }
            PropertyType::Relation => {
                if def.options.reference.is_none() {
                    return Err(PropertyError::MissingRef(path.to_string()));
                }
            }
            PropertyType::Object => {
                if let Some(properties) = &def.options.properties {
                    for (key, child) in properties {
                        let bound = Self::bind(&join_path(path, key), child, kinds)?;
                        children.insert(key.clone(), bound);
                    }
                }
                if let Some(extra) = &def.options.additional_properties {
                    additional = Some(Self::bind(path, extra, kinds)?);
                }
            }
            _ => {}
        }

        Ok(Self(Arc::new(PropertyNode {
            path: path.to_string(),
            name,
            def: def.clone(),
            kind,
            children,
            items,
            additional,
        })))
    }

    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn def(&self) -> &PropertyDef {
        &self.0.def
    }

    pub fn property_type(&self) -> PropertyType {
        self.0.def.kind
    }

    pub fn options(&self) -> &PropertyOptions {
        &self.0.def.options
    }

    /// Declared keys of an object property
    pub fn children(&self) -> &IndexMap<String, Property> {
        &self.0.children
    }

    pub fn child(&self, key: &str) -> Option<&Property> {
        self.0.children.get(key)
    }

    /// Item property of an array
    pub fn items(&self) -> Option<&Property> {
        self.0.items.as_ref()
    }

    /// Serializer for undeclared keys of an object
    pub fn additional(&self) -> Option<&Property> {
        self.0.additional.as_ref()
    }

    /// Target model of a relation or array of relations
    pub fn relation_target(&self) -> Option<&str> {
        self.0.def.relation_target()
    }

    /// Serialize a raw value into `format`.
    ///
    /// Dispatches to the kind's entry for `format`, or its fallback entry.
    pub fn serialize(
        &self,
        value: &Value,
        format: Format,
        ctx: &SerializeContext<'_>,
    ) -> PropertyResult<Formatted> {
        let serializer = self.0.kind.formats().get(format);
        serializer(self, value, format, ctx)
    }

    /// Serialize and collapse to plain JSON
    pub fn serialize_value(
        &self,
        value: &Value,
        format: Format,
        ctx: &SerializeContext<'_>,
    ) -> PropertyResult<Value> {
        self.serialize(value, format, ctx)?.into_json()
    }

    /// Run the kind's batch check over the non-null values.
    pub fn validate(&self, values: &[&Value]) -> Result<(), String> {
        let present: Vec<&Value> = values.iter().copied().filter(|v| !v.is_null()).collect();
        if present.is_empty() {
            return Ok(());
        }
        self.0.kind.validate(self, &present)
    }

    /// Look up the property declared at a path relative to this one.
    ///
    /// Numeric segments step through arrays; array items are entered
    /// transparently.
    pub fn lookup(&self, path: &str) -> Option<Property> {
        if path.is_empty() {
            return Some(self.clone());
        }
        let mut current = self.clone();
        for segment in path.split('.') {
            if segment.parse::<usize>().is_ok() {
                current = current.items()?.clone();
                continue;
            }
            while current.property_type() == PropertyType::Array {
                current = current.items()?.clone();
            }
            current = current.child(segment)?.clone();
        }
        Some(current)
    }

    /// Every node with its own path: this one and all declared descendants.
    ///
    /// Array items are skipped (they share the array's path) but their
    /// nested keys are included.
    pub fn flatten(&self) -> Vec<Property> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<Property>) {
        out.push(self.clone());
        self.flatten_descendants(out);
    }

    fn flatten_descendants(&self, out: &mut Vec<Property>) {
        for child in self.0.children.values() {
            child.flatten_into(out);
        }
        if let Some(items) = &self.0.items {
            items.flatten_descendants(out);
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("path", &self.0.path)
            .field("type", &self.0.def.kind)
            .field("children", &self.0.children.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bind(def: PropertyDef) -> Property {
        Property::bind("", &def, &PropertyKinds::builtin()).unwrap()
    }

    #[test]
    fn test_bind_assigns_paths() {
        let root = bind(PropertyDef::object([
            ("title", PropertyDef::text()),
            (
                "meta",
                PropertyDef::object([("views", PropertyDef::integer())]),
            ),
        ]));

        let views = root.lookup("meta.views").unwrap();
        assert_eq!(views.path(), "meta.views");
        assert_eq!(views.name(), "views");
        assert_eq!(views.property_type(), PropertyType::Integer);
    }

    #[test]
    fn test_bind_rejects_array_without_items() {
        let def = PropertyDef::new(PropertyType::Array);
        let err = Property::bind("tags", &def, &PropertyKinds::builtin()).unwrap_err();
        assert_eq!(err, PropertyError::MissingItems("tags".into()));
    }

    #[test]
    fn test_bind_rejects_relation_without_ref() {
        let def = PropertyDef::new(PropertyType::Relation);
        assert!(matches!(
            Property::bind("owner", &def, &PropertyKinds::builtin()),
            Err(PropertyError::MissingRef(_))
        ));
    }

    #[test]
    fn test_unknown_type_without_registration() {
        let err = Property::bind("x", &PropertyDef::text(), &PropertyKinds::empty()).unwrap_err();
        assert_eq!(err, PropertyError::UnknownType("text".into()));
    }

    #[test]
    fn test_lookup_through_arrays() {
        let root = bind(PropertyDef::object([(
            "lines",
            PropertyDef::array(PropertyDef::object([("qty", PropertyDef::integer())])),
        )]));

        assert_eq!(root.lookup("lines.qty").unwrap().path(), "lines.qty");
        assert_eq!(root.lookup("lines.0.qty").unwrap().path(), "lines.qty");
        assert!(root.lookup("lines.price").is_none());
    }

    #[test]
    fn test_flatten_skips_item_nodes() {
        let root = bind(PropertyDef::object([
            ("tags", PropertyDef::array(PropertyDef::text())),
            (
                "lines",
                PropertyDef::array(PropertyDef::object([("qty", PropertyDef::integer())])),
            ),
        ]));

        let paths: Vec<String> = root.flatten().iter().map(|p| p.path().to_string()).collect();
        assert_eq!(paths, vec!["", "tags", "lines", "lines.qty"]);
    }

    #[test]
    fn test_validate_ignores_nulls() {
        let prop = Property::bind("n", &PropertyDef::number(), &PropertyKinds::builtin()).unwrap();
        assert!(prop.validate(&[&json!(null)]).is_ok());
        assert!(prop.validate(&[&json!(1), &json!("x")]).is_err());
    }
}
