//! The adapter: registries, collaborators and the fetch primitives.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use super::action::Action;
use super::builtin::register_builtin;
use super::hooks::HookPipeline;
use super::reader::StoreReader;
use super::transaction::{OperationResult, Request};
use crate::cache::{CacheLayer, CacheStore, InMemoryCache};
use crate::config::DataConfig;
use crate::context::RequestContext;
use crate::error::{DataError, DataResult};
use crate::observability::MetricsRegistry;
use crate::property::{Format, LazyRecord, PropertyKinds, SerializeContext};
use crate::query::Query;
use crate::schema::{Model, ModelConfig, ModelRegistry, SchemaLoader};
use crate::session::SessionManager;
use crate::storage::DocumentStore;
use crate::validation::ValidatorKinds;

/// Data-layer adapter bound to one document store
pub struct Adapter {
    property_kinds: Arc<PropertyKinds>,
    validator_kinds: Arc<ValidatorKinds>,
    registry: Arc<ModelRegistry>,
    store: Arc<dyn DocumentStore>,
    cache: CacheLayer,
    hooks: HookPipeline,
    config: Arc<DataConfig>,
    metrics: Arc<MetricsRegistry>,
    initialized: AtomicBool,
}

impl Adapter {
    /// Create an adapter with the built-in kinds, an empty registry and a
    /// process-local cache
    pub fn new(store: Arc<dyn DocumentStore>, config: DataConfig) -> Self {
        let cache = CacheLayer::new(Arc::new(InMemoryCache::new()), config.cache.enabled);
        Self {
            property_kinds: Arc::new(PropertyKinds::builtin()),
            validator_kinds: Arc::new(ValidatorKinds::builtin()),
            registry: Arc::new(ModelRegistry::new()),
            store,
            cache,
            hooks: HookPipeline::new(),
            config: Arc::new(config),
            metrics: Arc::new(MetricsRegistry::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_cache(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = CacheLayer::new(store, self.config.cache.enabled);
        self
    }

    pub fn with_property_kinds(mut self, kinds: PropertyKinds) -> Self {
        self.property_kinds = Arc::new(kinds);
        self
    }

    pub fn with_validator_kinds(mut self, kinds: ValidatorKinds) -> Self {
        self.validator_kinds = Arc::new(kinds);
        self
    }

    /// Use `registry`, e.g. one chained to a parent adapter's registry
    pub fn with_registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    // ==================
    // Accessors
    // ==================

    pub fn property_kinds(&self) -> &PropertyKinds {
        &self.property_kinds
    }

    pub fn validator_kinds(&self) -> &ValidatorKinds {
        &self.validator_kinds
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Shared handle to the registry, for chaining child registries
    pub fn registry_handle(&self) -> Arc<ModelRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn hooks(&self) -> &HookPipeline {
        &self.hooks
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub(crate) fn new_session_manager(&self) -> SessionManager {
        SessionManager::new(Arc::clone(&self.store)).with_metrics(Arc::clone(&self.metrics))
    }

    /// Store reader for `ctx`, reading inside `manager`'s transaction when given
    pub fn reader(
        &self,
        ctx: &RequestContext,
        manager: Option<Arc<SessionManager>>,
    ) -> StoreReader {
        StoreReader::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.store),
            Arc::clone(&self.config),
        )
        .with_environment(ctx.environment.clone())
        .with_session(manager)
    }

    // ==================
    // Models
    // ==================

    /// Bind and register a model.
    ///
    /// Once the adapter is initialized, relation targets must already resolve.
    pub fn define(&self, config: ModelConfig) -> DataResult<Arc<Model>> {
        let model = Model::bind(config, &self.property_kinds)?;
        if self.initialized.load(Ordering::SeqCst) {
            self.verify_model_relations(&model)?;
        }
        self.registry.define(model)
    }

    /// Define every model found in `dir`, returning how many were defined
    pub fn load_schema(&self, dir: impl AsRef<Path>) -> DataResult<usize> {
        let configs = SchemaLoader::new(dir.as_ref()).load_all()?;
        let count = configs.len();
        for config in configs {
            self.define(config)?;
        }
        info!(
            target: "vaultbase::adapter",
            dir = %dir.as_ref().display(),
            models = count,
            "schema loaded"
        );
        Ok(count)
    }

    pub fn model(&self, slug: &str) -> DataResult<Arc<Model>> {
        self.registry.get(slug)
    }

    /// Register the built-in hooks and check every relation target resolves.
    ///
    /// Runs once; the primitives call it on first use.
    pub fn initialize(&self) -> DataResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.verify_relations()?;
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        register_builtin(&self.hooks)?;
        info!(
            target: "vaultbase::adapter",
            models = self.registry.slugs()?.len(),
            "adapter initialized"
        );
        Ok(())
    }

    fn verify_relations(&self) -> DataResult<()> {
        for model in self.registry.models()? {
            self.verify_model_relations(&model)?;
        }
        Ok(())
    }

    fn verify_model_relations(&self, model: &Model) -> DataResult<()> {
        for (path, target) in model.relations() {
            if target != model.slug() && !self.registry.contains(&target) {
                return Err(DataError::schema(format!(
                    "'{}.{}' relates to unknown model '{}'",
                    model.slug(),
                    path,
                    target
                )));
            }
        }
        Ok(())
    }

    /// Rich view of a stored document: lazy nested objects, deferred relations
    pub fn to_object(
        &self,
        ctx: &RequestContext,
        slug: &str,
        document: &Value,
    ) -> DataResult<LazyRecord> {
        let model = self.registry.get(slug)?;
        let scope = SerializeContext::new()
            .with_instance(document)
            .with_resolver(Arc::new(self.reader(ctx, ctx.current_session())));
        let formatted = model.root().serialize(document, Format::Object, &scope)?;
        formatted
            .as_record()
            .cloned()
            .ok_or_else(|| {
                DataError::internal(format!("model '{}' did not produce a record", slug))
            })
    }

    // ==================
    // Fetch primitives
    // ==================

    pub async fn count(&self, ctx: &RequestContext, slug: &str, query: Query) -> DataResult<u64> {
        match self.execute(ctx, slug, Request::read(Action::Count, query)).await? {
            OperationResult::Count(n) => Ok(n),
            other => Err(unexpected(Action::Count, &other)),
        }
    }

    pub async fn get(
        &self,
        ctx: &RequestContext,
        slug: &str,
        query: Query,
    ) -> DataResult<Option<Value>> {
        match self.execute(ctx, slug, Request::read(Action::Get, query)).await? {
            OperationResult::One(doc) => Ok(doc),
            other => Err(unexpected(Action::Get, &other)),
        }
    }

    pub async fn get_list(
        &self,
        ctx: &RequestContext,
        slug: &str,
        query: Query,
    ) -> DataResult<Vec<Value>> {
        match self.execute(ctx, slug, Request::read(Action::GetList, query)).await? {
            OperationResult::List(docs) => Ok(docs),
            other => Err(unexpected(Action::GetList, &other)),
        }
    }

    /// Declarative read: the match count when `query.count` is set,
    /// otherwise the matching documents as an array.
    pub async fn query(&self, ctx: &RequestContext, slug: &str, query: Query) -> DataResult<Value> {
        if query.count {
            let n = self.count(ctx, slug, query).await?;
            return Ok(Value::from(n));
        }
        let docs = self.get_list(ctx, slug, query).await?;
        Ok(Value::Array(docs))
    }

    pub async fn create_one(
        &self,
        ctx: &RequestContext,
        slug: &str,
        data: Value,
    ) -> DataResult<Value> {
        match self
            .execute(ctx, slug, Request::create(Action::CreateOne, vec![data]))
            .await?
        {
            OperationResult::One(Some(doc)) => Ok(doc),
            other => Err(unexpected(Action::CreateOne, &other)),
        }
    }

    pub async fn create_multiple(
        &self,
        ctx: &RequestContext,
        slug: &str,
        data: Vec<Value>,
    ) -> DataResult<Vec<Value>> {
        match self
            .execute(ctx, slug, Request::create(Action::CreateMultiple, data))
            .await?
        {
            OperationResult::List(docs) => Ok(docs),
            other => Err(unexpected(Action::CreateMultiple, &other)),
        }
    }

    /// Update the first match, returning it as updated
    pub async fn update_one(
        &self,
        ctx: &RequestContext,
        slug: &str,
        query: Query,
        update: Value,
    ) -> DataResult<Option<Value>> {
        match self
            .execute(ctx, slug, Request::update(Action::UpdateOne, query, update))
            .await?
        {
            OperationResult::One(doc) => Ok(doc),
            other => Err(unexpected(Action::UpdateOne, &other)),
        }
    }

    /// Update every match, returning how many matched
    pub async fn update_multiple(
        &self,
        ctx: &RequestContext,
        slug: &str,
        query: Query,
        update: Value,
    ) -> DataResult<u64> {
        match self
            .execute(ctx, slug, Request::update(Action::UpdateMultiple, query, update))
            .await?
        {
            OperationResult::Affected(n) => Ok(n),
            other => Err(unexpected(Action::UpdateMultiple, &other)),
        }
    }

    /// Delete the first match, returning it
    pub async fn delete_one(
        &self,
        ctx: &RequestContext,
        slug: &str,
        query: Query,
    ) -> DataResult<Option<Value>> {
        match self.execute(ctx, slug, Request::read(Action::DeleteOne, query)).await? {
            OperationResult::One(doc) => Ok(doc),
            other => Err(unexpected(Action::DeleteOne, &other)),
        }
    }

    pub async fn delete_multiple(
        &self,
        ctx: &RequestContext,
        slug: &str,
        query: Query,
    ) -> DataResult<u64> {
        match self
            .execute(ctx, slug, Request::read(Action::DeleteMultiple, query))
            .await?
        {
            OperationResult::Affected(n) => Ok(n),
            other => Err(unexpected(Action::DeleteMultiple, &other)),
        }
    }
}

fn unexpected(action: Action, result: &OperationResult) -> DataError {
    DataError::internal(format!("{} produced {:?}", action.name(), result))
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("database", &self.config.database)
            .field("registry", &self.registry)
            .field("hooks", &self.hooks)
            .finish()
    }
}
