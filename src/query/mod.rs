//! # Query Parser & Relational Sub-resolution
//!
//! Turns a declarative [`Query`] into a storage filter and read options.
//!
//! # Passes
//!
//! 1. Shorthand: a string filter becomes an equality on `_id` (identifiers)
//!    or on the model's key property, with `limit = 1`
//! 2. `ids`: ANDed with the filter as a separate `$in` clause
//! 3. `$subquery`: relation leaves carrying an embedded filter become an
//!    `$in` list of the matching target ids
//! 4. `$leftquery`: leaves whose embedded filter runs against a model
//!    relating back to this one become an `$in` list of the related values
//! 5. Coercion: every leaf operand goes through the `data` format of the
//!    property declared at its path

mod coerce;
mod parser;
mod rewrite;

pub use coerce::coerce_filter;
pub use parser::QueryParser;
pub use rewrite::{LEFTQUERY, SUBQUERY};
pub(crate) use rewrite::related_ids;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DataResult;
use crate::schema::Model;
use crate::storage::FindOptions;

/// Declarative query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    /// Filter document, or a string shorthand
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub filter: Value,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub sort: Map<String, Value>,

    /// Allow-list of identifiers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,

    /// 1-based page number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u64>,

    /// Relation paths to embed in returned documents
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub populate: Vec<String>,

    /// Answer with the match count instead of documents, see
    /// [`Adapter::query`](crate::Adapter::query)
    #[serde(default)]
    pub count: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(filter: Value) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    /// Shorthand lookup by identifier or key property
    pub fn by_key(key: impl Into<String>) -> Self {
        Self::filter(Value::String(key.into()))
    }

    pub fn by_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().with_ids(ids)
    }

    pub fn with_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_page(mut self, page: u64, page_size: u64) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// Sort by `path`, ascending for `1`, descending for `-1`
    pub fn sort_by(mut self, path: impl Into<String>, direction: i64) -> Self {
        self.sort.insert(path.into(), Value::from(direction));
        self
    }

    pub fn populate(mut self, path: impl Into<String>) -> Self {
        self.populate.push(path.into());
        self
    }

    pub fn count_only(mut self) -> Self {
        self.count = true;
        self
    }
}

/// Storage-ready form of a [`Query`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedQuery {
    pub filter: Value,
    pub options: FindOptions,
    /// Response-level warnings (e.g. a capped limit)
    pub warnings: Vec<String>,
    /// The filter was a string shorthand addressing one record
    pub single: bool,
}

impl ParsedQuery {
    /// Options as a plain map, for cache-key derivation
    pub fn options_map(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.options) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Cross-model reads needed by the relational passes.
pub trait QuerySource: Send + Sync {
    /// Records of `model` matching a filter already resolved against it
    fn find<'a>(&'a self, model: &'a Model, filter: Value) -> BoxFuture<'a, DataResult<Vec<Value>>>;
}
