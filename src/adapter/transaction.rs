//! Attempt record and primitive results.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::action::Action;
use crate::cache::CachedResult;
use crate::error::DataError;
use crate::query::{ParsedQuery, Query};
use crate::schema::Model;
use crate::session::SessionManager;
use crate::storage::{FindOptions, Namespace, SessionHandle};

/// Arguments of one primitive call, shared by every attempt
#[derive(Debug, Clone)]
pub struct Request {
    pub action: Action,
    pub query: Query,
    /// Documents to create
    pub data: Vec<Value>,
    /// Update payload
    pub update: Value,
}

impl Request {
    pub fn read(action: Action, query: Query) -> Self {
        Self {
            action,
            query,
            data: Vec::new(),
            update: Value::Null,
        }
    }

    pub fn create(action: Action, data: Vec<Value>) -> Self {
        Self {
            action,
            query: Query::default(),
            data,
            update: Value::Null,
        }
    }

    pub fn update(action: Action, query: Query, update: Value) -> Self {
        Self {
            action,
            query,
            data: Vec::new(),
            update,
        }
    }
}

/// Result of a primitive, in stored form until rendered
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    Count(u64),
    One(Option<Value>),
    List(Vec<Value>),
    /// Number of records an update or delete touched
    Affected(u64),
}

impl OperationResult {
    pub fn to_cached(&self) -> CachedResult {
        match self {
            OperationResult::Count(n) | OperationResult::Affected(n) => {
                CachedResult::One(Value::from(*n))
            }
            OperationResult::One(None) => CachedResult::Empty,
            OperationResult::One(Some(doc)) => CachedResult::One(doc.clone()),
            OperationResult::List(docs) => CachedResult::List(docs.clone()),
        }
    }

    /// Rebuild the result of `action` from a cache entry.
    ///
    /// `None` when the entry does not fit the action.
    pub fn from_cached(action: Action, cached: CachedResult) -> Option<Self> {
        match (action, cached) {
            (Action::Count, CachedResult::One(n)) => n.as_u64().map(OperationResult::Count),
            (Action::Get, CachedResult::Empty) => Some(OperationResult::One(None)),
            (Action::Get, CachedResult::One(doc)) => Some(OperationResult::One(Some(doc))),
            (Action::GetList, CachedResult::Empty) => Some(OperationResult::List(Vec::new())),
            (Action::GetList, CachedResult::List(docs)) => Some(OperationResult::List(docs)),
            _ => None,
        }
    }
}

/// One attempt of one primitive call.
///
/// Hooks read and fill it in phase order; a fresh record is built for every
/// attempt.
pub struct Transaction {
    pub id: Uuid,
    pub model: Arc<Model>,
    pub action: Action,
    /// 1-based attempt number
    pub attempt: u32,
    pub namespace: Namespace,
    pub query: Query,
    pub data: Vec<Value>,
    pub update: Value,
    /// Set by the query-resolution hook
    pub parsed: Option<ParsedQuery>,
    pub manager: Option<Arc<SessionManager>>,
    pub session: Option<SessionHandle>,
    pub cache_key: Option<String>,
    /// The result was served by the cache
    pub from_cache: bool,
    pub result: Option<OperationResult>,
    /// Documents as stored after a create or update
    pub written: Vec<Value>,
    pub warnings: Vec<String>,
    pub error: Option<DataError>,
}

impl Transaction {
    pub fn new(model: Arc<Model>, namespace: Namespace, request: &Request, attempt: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            model,
            action: request.action,
            attempt,
            namespace,
            query: request.query.clone(),
            data: request.data.clone(),
            update: request.update.clone(),
            parsed: None,
            manager: None,
            session: None,
            cache_key: None,
            from_cache: false,
            result: None,
            written: Vec::new(),
            warnings: Vec::new(),
            error: None,
        }
    }

    pub fn failed(&self) -> bool {
        self.error.is_some()
    }

    /// Record a failure; the first one wins
    pub fn fail(&mut self, err: DataError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    /// Resolved filter restricted to the model's records
    pub fn filter(&self) -> Value {
        let filter = self
            .parsed
            .as_ref()
            .map(|p| p.filter.clone())
            .unwrap_or_else(|| Value::Object(Map::new()));
        self.model.scope_filter(filter)
    }

    pub fn options(&self) -> FindOptions {
        self.parsed
            .as_ref()
            .map(|p| p.options.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cached_round_trip_keeps_empty_distinct() {
        let none = OperationResult::One(None);
        assert_eq!(none.to_cached(), CachedResult::Empty);
        assert_eq!(OperationResult::from_cached(Action::Get, CachedResult::Empty), Some(none));

        let count = OperationResult::Count(4);
        assert_eq!(OperationResult::from_cached(Action::Count, count.to_cached()), Some(count));

        let list = OperationResult::List(vec![json!({"_id": "a"})]);
        assert_eq!(OperationResult::from_cached(Action::GetList, list.to_cached()), Some(list));
    }

    #[test]
    fn test_mismatched_entry_is_rejected() {
        assert_eq!(
            OperationResult::from_cached(Action::Count, CachedResult::List(vec![])),
            None
        );
        assert_eq!(
            OperationResult::from_cached(Action::Get, CachedResult::List(vec![])),
            None
        );
    }
}
