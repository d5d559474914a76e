//! Output formats and per-type serializer tables.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::PropertyResult;
use super::object::LazyRecord;
use super::relation::{RelationHandle, RelationListHandle, RelationResolver};
use super::Property;

/// Output representation a property can be serialized into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Wire representation
    Json,
    /// Rich in-memory representation with lazy relations
    Object,
    /// Input handed to validators
    Validation,
    /// Write-time coercion to the on-disk representation
    Data,
}

impl Format {
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Object => "object",
            Format::Validation => "validation",
            Format::Data => "data",
        }
    }
}

/// Signature of one serializer entry.
pub type SerializeFn =
    fn(&Property, &Value, Format, &SerializeContext<'_>) -> PropertyResult<Formatted>;

/// Serializer table of one property type: an optional entry per format and
/// one fallback used for every format without its own entry.
#[derive(Clone, Copy)]
pub struct FormatTable {
    json: Option<SerializeFn>,
    object: Option<SerializeFn>,
    validation: Option<SerializeFn>,
    data: Option<SerializeFn>,
    fallback: SerializeFn,
}

impl FormatTable {
    /// Table where every format uses `fallback`
    pub fn new(fallback: SerializeFn) -> Self {
        Self {
            json: None,
            object: None,
            validation: None,
            data: None,
            fallback,
        }
    }

    /// Declare a dedicated entry for one format
    pub fn with(mut self, format: Format, f: SerializeFn) -> Self {
        match format {
            Format::Json => self.json = Some(f),
            Format::Object => self.object = Some(f),
            Format::Validation => self.validation = Some(f),
            Format::Data => self.data = Some(f),
        }
        self
    }

    /// Whether the table has a dedicated entry for `format`
    pub fn declares(&self, format: Format) -> bool {
        self.entry(format).is_some()
    }

    /// Resolve the entry for `format`, falling back to the reserved entry
    pub fn get(&self, format: Format) -> SerializeFn {
        self.entry(format).unwrap_or(self.fallback)
    }

    fn entry(&self, format: Format) -> Option<SerializeFn> {
        match format {
            Format::Json => self.json,
            Format::Object => self.object,
            Format::Validation => self.validation,
            Format::Data => self.data,
        }
    }
}

impl fmt::Debug for FormatTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatTable")
            .field("json", &self.json.is_some())
            .field("object", &self.object.is_some())
            .field("validation", &self.validation.is_some())
            .field("data", &self.data.is_some())
            .finish()
    }
}

/// Ambient inputs of one serialization call.
#[derive(Clone, Default)]
pub struct SerializeContext<'a> {
    /// Raw document owning the value (conditional discriminants resolve here)
    pub instance: Option<&'a Value>,
    /// Pending data consulted before `instance` (e.g. an update payload)
    pub overrides: Option<&'a Value>,
    /// Resolver attached to relation handles
    pub resolver: Option<Arc<dyn RelationResolver>>,
}

impl<'a> SerializeContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance: &'a Value) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn with_overrides(mut self, overrides: &'a Value) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn RelationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }
}

/// A serialized value.
///
/// `json`, `data` and `validation` produce `Value`; `object` may produce the
/// richer variants.
#[derive(Debug, Clone)]
pub enum Formatted {
    Value(Value),
    Date(DateTime<Utc>),
    Relation(RelationHandle),
    RelationList(RelationListHandle),
    Array(Vec<Formatted>),
    Record(LazyRecord),
}

impl Formatted {
    pub fn null() -> Self {
        Formatted::Value(Value::Null)
    }

    /// Borrow the plain value, if this is one
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Formatted::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&LazyRecord> {
        match self {
            Formatted::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_relation(&self) -> Option<&RelationHandle> {
        match self {
            Formatted::Relation(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_relation_list(&self) -> Option<&RelationListHandle> {
        match self {
            Formatted::RelationList(r) => Some(r),
            _ => None,
        }
    }

    /// Collapse into a plain JSON value, materializing rich variants.
    pub fn into_json(self) -> PropertyResult<Value> {
        match self {
            Formatted::Value(v) => Ok(v),
            Formatted::Date(d) => Ok(Value::String(format_date(&d))),
            Formatted::Relation(r) => Ok(r.descriptor.query.to_json()),
            Formatted::RelationList(r) => Ok(Value::Array(
                r.descriptor.ids.into_iter().map(Value::String).collect(),
            )),
            Formatted::Array(items) => items
                .into_iter()
                .map(Formatted::into_json)
                .collect::<PropertyResult<Vec<_>>>()
                .map(Value::Array),
            Formatted::Record(r) => r.materialize(),
        }
    }
}

/// Canonical on-disk/wire form of a date: RFC 3339, millisecond precision, UTC.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}
