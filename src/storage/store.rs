//! The document-store contract.
//!
//! The data layer never talks to a concrete database; it talks to a
//! [`DocumentStore`]. Every call may carry a session handle binding it to
//! one transaction on one physical database.

use std::fmt;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::errors::StoreResult;

/// Physical location of a collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.database, self.collection)
    }
}

/// Handle to one open transaction on one physical database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub id: Uuid,
    pub database: String,
}

impl SessionHandle {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            database: database.into(),
        }
    }
}

/// Read options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindOptions {
    /// `{ path: 1 | -1 }`, applied in key order
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub sort: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default)]
    pub skip: u64,
}

impl FindOptions {
    pub fn limit(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

/// Document-store collaborator.
///
/// Implementations classify transaction failures through
/// [`StoreError::is_retryable`](super::StoreError::is_retryable).
pub trait DocumentStore: Send + Sync {
    /// Open a transaction on `database`
    fn start_session<'a>(&'a self, database: &'a str) -> BoxFuture<'a, StoreResult<SessionHandle>>;

    /// Commit and close a transaction
    fn commit<'a>(&'a self, session: &'a SessionHandle) -> BoxFuture<'a, StoreResult<()>>;

    /// Discard and close a transaction
    fn abort<'a>(&'a self, session: &'a SessionHandle) -> BoxFuture<'a, StoreResult<()>>;

    fn count<'a>(
        &'a self,
        ns: &'a Namespace,
        filter: &'a Value,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<u64>>;

    fn find<'a>(
        &'a self,
        ns: &'a Namespace,
        filter: &'a Value,
        options: &'a FindOptions,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>>;

    /// Insert documents, returning them as stored
    fn insert_many<'a>(
        &'a self,
        ns: &'a Namespace,
        documents: Vec<Value>,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>>;

    /// Apply an update payload to every match, returning the match count
    fn update_many<'a>(
        &'a self,
        ns: &'a Namespace,
        filter: &'a Value,
        update: &'a Value,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<u64>>;

    /// Delete every match, returning the deleted count
    fn delete_many<'a>(
        &'a self,
        ns: &'a Namespace,
        filter: &'a Value,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<u64>>;
}
