//! Nested object properties: conditional visibility, eager materialization
//! and the read-through [`LazyRecord`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::errors::PropertyResult;
use super::format::{Format, Formatted, SerializeContext};
use super::relation::RelationResolver;
use super::Property;
use crate::document::{get_path, join_path};

/// Key visibility of one object, derived from its conditional declaration.
pub(crate) enum Visibility {
    All,
    Conditional {
        mentioned: HashSet<String>,
        active: HashSet<String>,
    },
}

impl Visibility {
    pub(crate) fn resolve(
        property: &Property,
        raw: &Map<String, Value>,
        ctx: &SerializeContext<'_>,
    ) -> Self {
        let Some(conditional) = &property.options().conditional_properties else {
            return Visibility::All;
        };

        let mut mentioned: HashSet<String> = conditional
            .mapping
            .values()
            .flatten()
            .cloned()
            .collect();
        if let Some(default) = &conditional.default {
            mentioned.extend(default.iter().cloned());
        }

        let discriminant = discriminant(property, &conditional.depends_on, raw, ctx);
        let subset = discriminant
            .and_then(|value| conditional.mapping.get(&discriminant_key(&value)))
            .or(conditional.default.as_ref());

        Visibility::Conditional {
            mentioned,
            active: subset.map(|keys| keys.iter().cloned().collect()).unwrap_or_default(),
        }
    }

    pub(crate) fn is_visible(&self, key: &str) -> bool {
        match self {
            Visibility::All => true,
            Visibility::Conditional { mentioned, active } => {
                !mentioned.contains(key) || active.contains(key)
            }
        }
    }
}

/// Read the discriminant: pending overrides first, then the owning
/// instance, then (for `$`-relative paths) the object's own raw map.
fn discriminant(
    property: &Property,
    depends_on: &str,
    raw: &Map<String, Value>,
    ctx: &SerializeContext<'_>,
) -> Option<Value> {
    let relative = depends_on
        .strip_prefix("$.")
        .or_else(|| (depends_on == "$").then_some(""));
    let absolute = match relative {
        Some(rest) => join_path(property.path(), rest),
        None => depends_on.to_string(),
    };

    let from_root = |doc: Option<&Value>| doc.and_then(|d| get_path(d, &absolute)).cloned();
    from_root(ctx.overrides)
        .or_else(|| from_root(ctx.instance))
        .or_else(|| {
            let rest = relative?;
            get_path(&Value::Object(raw.clone()), rest).cloned()
        })
}

fn discriminant_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Value of one declared key: stored value, else the declared default.
fn declared_value<'a>(
    child: &'a Property,
    raw: &'a Map<String, Value>,
    key: &str,
) -> Option<&'a Value> {
    raw.get(key).or(child.options().default.as_ref())
}

/// Eagerly build the plain keyed container for `json`/`data`/`validation`.
pub(crate) fn materialize(
    property: &Property,
    raw: &Map<String, Value>,
    format: Format,
    ctx: &SerializeContext<'_>,
) -> PropertyResult<Value> {
    let visibility = Visibility::resolve(property, raw, ctx);
    let mut out = Map::new();

    for (key, child) in property.children() {
        if !visibility.is_visible(key) {
            continue;
        }
        if let Some(value) = declared_value(child, raw, key) {
            out.insert(key.clone(), child.serialize_value(value, format, ctx)?);
        }
    }

    if property.options().strict {
        return Ok(Value::Object(out));
    }

    for (key, value) in raw {
        if property.child(key).is_some() || !visibility.is_visible(key) {
            continue;
        }
        let value = match property.additional() {
            Some(extra) => extra.serialize_value(value, format, ctx)?,
            None => value.clone(),
        };
        out.insert(key.clone(), value);
    }

    Ok(Value::Object(out))
}

/// Read-through view over a stored object.
///
/// Each `get` computes the key's value on demand from the raw map and the
/// nested property map; nothing is cached and the raw map is never mutated.
#[derive(Clone)]
pub struct LazyRecord {
    property: Property,
    raw: Map<String, Value>,
    instance: Option<Arc<Value>>,
    overrides: Option<Arc<Value>>,
    resolver: Option<Arc<dyn RelationResolver>>,
}

impl LazyRecord {
    pub(crate) fn new(
        property: &Property,
        raw: Map<String, Value>,
        ctx: &SerializeContext<'_>,
    ) -> Self {
        Self {
            property: property.clone(),
            raw,
            instance: ctx.instance.map(|v| Arc::new(v.clone())),
            overrides: ctx.overrides.map(|v| Arc::new(v.clone())),
            resolver: ctx.resolver.clone(),
        }
    }

    fn context(&self) -> SerializeContext<'_> {
        SerializeContext {
            instance: self.instance.as_deref(),
            overrides: self.overrides.as_deref(),
            resolver: self.resolver.clone(),
        }
    }

    pub fn property(&self) -> &Property {
        &self.property
    }

    /// Stored map, untouched by visibility or defaults
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// Compute one key; `None` when absent or hidden.
    pub fn get(&self, key: &str) -> PropertyResult<Option<Formatted>> {
        let ctx = self.context();
        if !Visibility::resolve(&self.property, &self.raw, &ctx).is_visible(key) {
            return Ok(None);
        }

        if let Some(child) = self.property.child(key) {
            return declared_value(child, &self.raw, key)
                .map(|value| child.serialize(value, Format::Object, &ctx))
                .transpose();
        }

        if self.property.options().strict {
            return Ok(None);
        }
        match (self.raw.get(key), self.property.additional()) {
            (Some(value), Some(extra)) => extra.serialize(value, Format::Object, &ctx).map(Some),
            (Some(value), None) => Ok(Some(Formatted::Value(value.clone()))),
            (None, _) => Ok(None),
        }
    }

    /// Visible keys with a value, declared keys first
    pub fn keys(&self) -> Vec<String> {
        let ctx = self.context();
        let visibility = Visibility::resolve(&self.property, &self.raw, &ctx);
        let mut keys: Vec<String> = self
            .property
            .children()
            .iter()
            .filter(|(key, child)| {
                visibility.is_visible(key) && declared_value(child, &self.raw, key).is_some()
            })
            .map(|(key, _)| key.clone())
            .collect();

        if !self.property.options().strict {
            keys.extend(
                self.raw
                    .keys()
                    .filter(|key| self.property.child(key).is_none() && visibility.is_visible(key))
                    .cloned(),
            );
        }
        keys
    }

    /// Full plain snapshot in wire form
    pub fn materialize(&self) -> PropertyResult<Value> {
        materialize(&self.property, &self.raw, Format::Json, &self.context())
    }
}

impl fmt::Debug for LazyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRecord")
            .field("path", &self.property.path())
            .field("raw", &self.raw)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{ConditionalProperties, PropertyDef, PropertyKinds};
    use serde_json::json;

    fn channel() -> Property {
        let def = PropertyDef::object([
            ("kind", PropertyDef::text()),
            ("address", PropertyDef::text()),
            ("phone", PropertyDef::text()),
            ("label", PropertyDef::text()),
        ])
        .with_conditional(
            ConditionalProperties::new("$.kind")
                .when("email", &["address"])
                .when("sms", &["phone"]),
        );
        Property::bind("channel", &def, &PropertyKinds::builtin()).unwrap()
    }

    fn record(raw: Value) -> LazyRecord {
        let Value::Object(map) = raw else { unreachable!() };
        LazyRecord::new(&channel(), map, &SerializeContext::new())
    }

    #[test]
    fn test_hidden_key_reads_as_absent() {
        let rec = record(json!({"kind": "email", "address": "a@b.c", "phone": "555"}));
        assert!(rec.get("address").unwrap().is_some());
        assert!(rec.get("phone").unwrap().is_none());
        // Unmentioned keys stay visible.
        assert!(rec.get("kind").unwrap().is_some());
        assert_eq!(rec.raw()["phone"], "555");
    }

    #[test]
    fn test_overrides_switch_visible_keys() {
        let property = channel();
        let instance = json!({"channel": {"kind": "email", "address": "a@b.c", "phone": "555"}});
        let pending = json!({"channel": {"kind": "sms"}});
        let raw = instance["channel"].as_object().unwrap().clone();
        let ctx = SerializeContext::new()
            .with_instance(&instance)
            .with_overrides(&pending);

        let value = materialize(&property, &raw, Format::Json, &ctx).unwrap();
        assert_eq!(value, json!({"kind": "email", "phone": "555"}));
    }

    #[test]
    fn test_keys_follow_declaration_order() {
        let rec = record(json!({"label": "x", "kind": "sms", "phone": "555", "extra": 1}));
        assert_eq!(rec.keys(), vec!["kind", "phone", "label", "extra"]);
    }

    #[test]
    fn test_defaults_fill_absent_keys() {
        let def = PropertyDef::object([
            ("status", PropertyDef::text().with_default(json!("draft"))),
            ("title", PropertyDef::text()),
        ]);
        let property = Property::bind("", &def, &PropertyKinds::builtin()).unwrap();
        let raw = json!({"title": "t"}).as_object().unwrap().clone();

        let value = materialize(&property, &raw, Format::Json, &SerializeContext::new()).unwrap();
        assert_eq!(value, json!({"status": "draft", "title": "t"}));
    }
}
