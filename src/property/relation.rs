//! Deferred relation handles.
//!
//! A handle is a descriptor readable before resolution plus an asynchronous
//! `resolve()` that goes through a [`RelationResolver`].

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use super::errors::PropertyError;
use crate::error::DataResult;

/// How a single related record is addressed
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RelationQuery {
    /// By identifier
    Id(String),
    /// By an arbitrary filter over the target model
    Filter(Value),
}

impl RelationQuery {
    pub fn to_json(&self) -> Value {
        match self {
            RelationQuery::Id(id) => Value::String(id.clone()),
            RelationQuery::Filter(filter) => filter.clone(),
        }
    }
}

/// Target of a single-record relation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationDescriptor {
    pub model: String,
    pub query: RelationQuery,
}

/// Target of a many-record relation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationListDescriptor {
    pub model: String,
    pub ids: Vec<String>,
}

/// Looks up related records on behalf of relation handles.
pub trait RelationResolver: Send + Sync {
    /// Fetch one record of `model`
    fn fetch_one<'a>(
        &'a self,
        model: &'a str,
        query: &'a RelationQuery,
    ) -> BoxFuture<'a, DataResult<Option<Value>>>;

    /// Fetch the records of `model` with the given ids, in id order
    fn fetch_many<'a>(
        &'a self,
        model: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, DataResult<Vec<Value>>>;

    /// Whether `model` is a single-instance model
    fn is_single_instance(&self, _model: &str) -> bool {
        false
    }
}

/// Deferred handle to one related record
#[derive(Clone)]
pub struct RelationHandle {
    pub descriptor: RelationDescriptor,
    resolver: Option<Arc<dyn RelationResolver>>,
}

impl RelationHandle {
    pub fn new(
        descriptor: RelationDescriptor,
        resolver: Option<Arc<dyn RelationResolver>>,
    ) -> Self {
        Self {
            descriptor,
            resolver,
        }
    }

    /// Identifier of the target, when addressed by id
    pub fn id(&self) -> Option<&str> {
        match &self.descriptor.query {
            RelationQuery::Id(id) => Some(id),
            RelationQuery::Filter(_) => None,
        }
    }

    /// Load the related record
    pub async fn resolve(&self) -> DataResult<Option<Value>> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| PropertyError::Unresolvable(self.descriptor.model.clone()))?;
        resolver
            .fetch_one(&self.descriptor.model, &self.descriptor.query)
            .await
    }
}

impl fmt::Debug for RelationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationHandle")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Deferred handle to a list of related records
#[derive(Clone)]
pub struct RelationListHandle {
    pub descriptor: RelationListDescriptor,
    resolver: Option<Arc<dyn RelationResolver>>,
}

impl RelationListHandle {
    pub fn new(
        descriptor: RelationListDescriptor,
        resolver: Option<Arc<dyn RelationResolver>>,
    ) -> Self {
        Self {
            descriptor,
            resolver,
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.descriptor.ids
    }

    /// Load every related record
    pub async fn resolve(&self) -> DataResult<Vec<Value>> {
        if self.descriptor.ids.is_empty() {
            return Ok(Vec::new());
        }
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| PropertyError::Unresolvable(self.descriptor.model.clone()))?;
        resolver
            .fetch_many(&self.descriptor.model, &self.descriptor.ids)
            .await
    }
}

impl fmt::Debug for RelationListHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationListHandle")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use serde_json::json;

    struct Fixed;

    impl RelationResolver for Fixed {
        fn fetch_one<'a>(
            &'a self,
            model: &'a str,
            query: &'a RelationQuery,
        ) -> BoxFuture<'a, DataResult<Option<Value>>> {
            async move { Ok(Some(json!({"model": model, "_id": query.to_json()}))) }.boxed()
        }

        fn fetch_many<'a>(
            &'a self,
            _model: &'a str,
            ids: &'a [String],
        ) -> BoxFuture<'a, DataResult<Vec<Value>>> {
            async move { Ok(ids.iter().map(|id| json!({"_id": id})).collect()) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_handle_resolves_through_resolver() {
        let handle = RelationHandle::new(
            RelationDescriptor {
                model: "accounts".into(),
                query: RelationQuery::Id("a1".into()),
            },
            Some(Arc::new(Fixed)),
        );
        assert_eq!(handle.id(), Some("a1"));
        let doc = handle.resolve().await.unwrap().unwrap();
        assert_eq!(doc["_id"], "a1");
    }

    #[tokio::test]
    async fn test_handle_without_resolver_fails() {
        let handle = RelationHandle::new(
            RelationDescriptor {
                model: "accounts".into(),
                query: RelationQuery::Id("a1".into()),
            },
            None,
        );
        assert!(handle.resolve().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_list_resolves_without_resolver() {
        let handle = RelationListHandle::new(
            RelationListDescriptor {
                model: "tags".into(),
                ids: Vec::new(),
            },
            None,
        );
        assert!(handle.resolve().await.unwrap().is_empty());
    }
}
