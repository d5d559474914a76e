//! Cross-model store reads on behalf of a request.
//!
//! The reader backs relational query rewriting, validator lookups and
//! relation handles. Bound to a session manager, it reads inside the
//! request's transaction; unbound, it reads committed data.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};

use crate::config::DataConfig;
use crate::error::{DataError, DataResult};
use crate::property::{Format, RelationQuery, RelationResolver, SerializeContext};
use crate::query::QuerySource;
use crate::schema::{Model, ModelRegistry};
use crate::session::SessionManager;
use crate::storage::{DocumentStore, FindOptions, SessionHandle, StoreError, StoreResult};
use crate::validation::RecordLookup;

/// Run one storage call under the configured execution limit.
///
/// Expiry is reported as [`StoreError::Timeout`], which is retryable.
pub async fn timed<T, F>(limit: Duration, call: F) -> DataResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(DataError::from),
        Err(_) => Err(StoreError::Timeout(limit.as_millis() as u64).into()),
    }
}

/// Wire form of a stored document
pub fn render(model: &Model, document: &Value) -> DataResult<Value> {
    let ctx = SerializeContext::new().with_instance(document);
    Ok(model.root().serialize_value(document, Format::Json, &ctx)?)
}

/// Store reader scoped to one request
#[derive(Clone)]
pub struct StoreReader {
    registry: Arc<ModelRegistry>,
    store: Arc<dyn DocumentStore>,
    config: Arc<DataConfig>,
    environment: Option<String>,
    manager: Option<Arc<SessionManager>>,
}

impl StoreReader {
    pub fn new(
        registry: Arc<ModelRegistry>,
        store: Arc<dyn DocumentStore>,
        config: Arc<DataConfig>,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            environment: None,
            manager: None,
        }
    }

    pub fn with_environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    /// Read inside the transaction of `manager`
    pub fn with_session(mut self, manager: Option<Arc<SessionManager>>) -> Self {
        self.manager = manager;
        self
    }

    async fn session(&self, database: &str) -> DataResult<Option<SessionHandle>> {
        match &self.manager {
            Some(manager) => Ok(Some(manager.session_for(database).await?)),
            None => Ok(None),
        }
    }

    /// Stored documents of `model` matching `filter`
    pub async fn find_raw(
        &self,
        model: &Model,
        filter: Value,
        options: &FindOptions,
    ) -> DataResult<Vec<Value>> {
        let ns = model.namespace(&self.config.database, self.environment.as_deref());
        let filter = model.scope_filter(filter);
        let session = self.session(&ns.database).await?;
        timed(
            self.config.max_execution(),
            self.store.find(&ns, &filter, options, session.as_ref()),
        )
        .await
    }

    pub async fn count_raw(&self, model: &Model, filter: Value) -> DataResult<u64> {
        let ns = model.namespace(&self.config.database, self.environment.as_deref());
        let filter = model.scope_filter(filter);
        let session = self.session(&ns.database).await?;
        timed(
            self.config.max_execution(),
            self.store.count(&ns, &filter, session.as_ref()),
        )
        .await
    }

    /// Wire-form documents of `model` with the given ids, in id order
    pub async fn by_ids(&self, model: &Model, ids: &[String]) -> DataResult<Vec<Value>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let found = self
            .find_raw(model, json!({ "_id": { "$in": ids } }), &FindOptions::default())
            .await?;
        let mut by_id: HashMap<String, Value> = HashMap::new();
        for doc in found {
            if let Some(id) = doc.get("_id").and_then(Value::as_str) {
                by_id.insert(id.to_string(), doc.clone());
            }
        }
        ids.iter()
            .filter_map(|id| by_id.get(id))
            .map(|doc| render(model, doc))
            .collect()
    }
}

impl QuerySource for StoreReader {
    fn find<'a>(
        &'a self,
        model: &'a Model,
        filter: Value,
    ) -> BoxFuture<'a, DataResult<Vec<Value>>> {
        async move { self.find_raw(model, filter, &FindOptions::default()).await }.boxed()
    }
}

impl RecordLookup for StoreReader {
    fn count<'a>(&'a self, model: &'a str, filter: Value) -> BoxFuture<'a, DataResult<u64>> {
        async move {
            let model = self.registry.get(model)?;
            self.count_raw(&model, filter).await
        }
        .boxed()
    }
}

impl RelationResolver for StoreReader {
    fn fetch_one<'a>(
        &'a self,
        model: &'a str,
        query: &'a RelationQuery,
    ) -> BoxFuture<'a, DataResult<Option<Value>>> {
        async move {
            let model = self.registry.get(model)?;
            let filter = match query {
                RelationQuery::Id(id) => json!({ "_id": id }),
                RelationQuery::Filter(filter) => filter.clone(),
            };
            let found = self.find_raw(&model, filter, &FindOptions::limit(1)).await?;
            found.first().map(|doc| render(&model, doc)).transpose()
        }
        .boxed()
    }

    fn fetch_many<'a>(
        &'a self,
        model: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, DataResult<Vec<Value>>> {
        async move {
            let model = self.registry.get(model)?;
            self.by_ids(&model, ids).await
        }
        .boxed()
    }

    fn is_single_instance(&self, model: &str) -> bool {
        matches!(self.registry.find(model), Ok(Some(m)) if m.is_single_instance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropertyDef, PropertyKinds};
    use crate::schema::ModelConfig;
    use crate::storage::{InMemoryStore, Namespace};

    async fn fixture() -> (StoreReader, Arc<InMemoryStore>) {
        let kinds = PropertyKinds::builtin();
        let registry = Arc::new(ModelRegistry::new());
        registry
            .define(
                Model::bind(ModelConfig::new("tags").property("label", PropertyDef::text()), &kinds)
                    .unwrap(),
            )
            .unwrap();
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_many(
                &Namespace::new("vaultbase", "tags"),
                vec![
                    json!({"_id": "t1", "label": "rust"}),
                    json!({"_id": "t2", "label": "go"}),
                ],
                None,
            )
            .await
            .unwrap();
        let reader = StoreReader::new(registry, store.clone(), Arc::new(DataConfig::default()));
        (reader, store)
    }

    #[tokio::test]
    async fn test_fetch_many_keeps_id_order() {
        let (reader, _) = fixture().await;
        let ids = vec!["t2".to_string(), "missing".to_string(), "t1".to_string()];
        let docs = reader.fetch_many("tags", &ids).await.unwrap();
        let labels: Vec<&str> = docs.iter().map(|d| d["label"].as_str().unwrap()).collect();
        assert_eq!(labels, vec!["go", "rust"]);
    }

    #[tokio::test]
    async fn test_fetch_one_by_filter() {
        let (reader, _) = fixture().await;
        let doc = reader
            .fetch_one("tags", &RelationQuery::Filter(json!({"label": "go"})))
            .await
            .unwrap();
        assert_eq!(doc.unwrap()["_id"], "t2");
        assert!(reader.fetch_one("ghosts", &RelationQuery::Id("x".into())).await.is_err());
    }

    #[tokio::test]
    async fn test_lookup_counts_inside_session() {
        let (reader, store) = fixture().await;
        let manager = Arc::new(SessionManager::new(store.clone()));
        let reader = reader.with_session(Some(manager.clone()));

        let session = manager.session_for("vaultbase").await.unwrap();
        store
            .insert_many(
                &Namespace::new("vaultbase", "tags"),
                vec![json!({"_id": "t3", "label": "rust"})],
                Some(&session),
            )
            .await
            .unwrap();

        let count = RecordLookup::count(&reader, "tags", json!({"label": "rust"}))
            .await
            .unwrap();
        assert_eq!(count, 2);
        manager.end().await.unwrap();
    }

    #[tokio::test]
    async fn test_timed_call_expires() {
        let store = InMemoryStore::new();
        store.set_latency(Some(Duration::from_millis(50))).unwrap();
        let ns = Namespace::new("vaultbase", "tags");
        let err = timed(Duration::from_millis(5), store.count(&ns, &json!({}), None))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "STORAGE_TIMEOUT");
    }
}
