//! Built-in hooks registered by [`Adapter::initialize`](super::Adapter::initialize).
//!
//! Before phase:
//! - `session.open` (0): bind the attempt to the request's session
//! - `stamp` (10): system fields on creates, `_updatedAt` on updates
//! - `coerce` (20): payload through the `data` format
//! - `query.resolve` (30): declarative query into filter and options
//! - `cache.lookup` (40): serve reads from the cache
//!
//! After phase:
//! - `validate` (0): full validation of written documents
//! - `cache.fill` (10): store read results
//! - `cache.invalidate` (20): drop the model's entries after writes
//! - `session.settle` (100, handles errors): commit, abort or retry

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::action::Action;
use super::hooks::{Hook, HookOutcome, HookPipeline, Phase};
use super::transaction::{OperationResult, Transaction};
use super::Adapter;
use crate::context::RequestContext;
use crate::document::set_path;
use crate::error::{DataError, DataResult};
use crate::property::{format_date, generate_identifier, Format, SerializeContext};
use crate::query::QueryParser;
use crate::session::LifecycleEvent;
use crate::storage::normalize_update;
use crate::validation::{validate, ValidationEnv};

pub const SESSION_OPEN_ORDER: i32 = 0;
pub const STAMP_ORDER: i32 = 10;
pub const COERCE_ORDER: i32 = 20;
pub const RESOLVE_ORDER: i32 = 30;
pub const CACHE_LOOKUP_ORDER: i32 = 40;

pub const VALIDATE_ORDER: i32 = 0;
pub const CACHE_FILL_ORDER: i32 = 10;
pub const CACHE_INVALIDATE_ORDER: i32 = 20;
pub const SESSION_SETTLE_ORDER: i32 = 100;

/// Lifecycle group of cache invalidation on commit
const INVALIDATE_GROUP: i32 = 0;

pub(crate) fn register_builtin(pipeline: &HookPipeline) -> DataResult<()> {
    pipeline.register(Phase::Before, SESSION_OPEN_ORDER, Arc::new(SessionOpen))?;
    pipeline.register(Phase::Before, STAMP_ORDER, Arc::new(StampSystemFields))?;
    pipeline.register(Phase::Before, COERCE_ORDER, Arc::new(CoercePayload))?;
    pipeline.register(Phase::Before, RESOLVE_ORDER, Arc::new(ResolveQuery))?;
    pipeline.register(Phase::Before, CACHE_LOOKUP_ORDER, Arc::new(CacheLookup))?;
    pipeline.register(Phase::After, VALIDATE_ORDER, Arc::new(ValidateWrite))?;
    pipeline.register(Phase::After, CACHE_FILL_ORDER, Arc::new(CacheFill))?;
    pipeline.register(Phase::After, CACHE_INVALIDATE_ORDER, Arc::new(CacheInvalidate))?;
    pipeline.register(Phase::After, SESSION_SETTLE_ORDER, Arc::new(SessionSettle))?;
    Ok(())
}

/// Cache participation is limited to autocommit requests: inside an open
/// transaction the cache cannot see staged writes.
fn cache_applies(adapter: &Adapter, ctx: &RequestContext) -> bool {
    adapter.cache().is_enabled() && ctx.is_autocommit()
}

// ==================
// Session
// ==================

struct SessionOpen;

impl Hook for SessionOpen {
    fn name(&self) -> &str {
        "session.open"
    }

    fn run<'a>(
        &'a self,
        adapter: &'a Adapter,
        ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>> {
        async move {
            let manager = ctx.session_manager(|| adapter.new_session_manager())?;
            tx.manager = Some(Arc::clone(&manager));
            match manager.session_for(&tx.namespace.database).await {
                Ok(handle) => {
                    tx.session = Some(handle);
                    Ok(HookOutcome::Continue)
                }
                Err(err) if err.is_retryable() && ctx.is_autocommit() => {
                    manager.reset().await?;
                    Ok(HookOutcome::Retry(err))
                }
                Err(err) => Err(err),
            }
        }
        .boxed()
    }
}

struct SessionSettle;

impl Hook for SessionSettle {
    fn name(&self) -> &str {
        "session.settle"
    }

    fn handles_errors(&self) -> bool {
        true
    }

    fn run<'a>(
        &'a self,
        _adapter: &'a Adapter,
        ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>> {
        async move {
            let Some(manager) = tx.manager.clone() else {
                return Ok(HookOutcome::Continue);
            };

            if !ctx.is_autocommit() {
                // The owner settles the transaction through `finish`
                if tx.failed() {
                    manager.mark_abort();
                }
                return Ok(HookOutcome::Continue);
            }

            if let Some(err) = tx.error.clone() {
                if err.is_retryable() {
                    manager.reset().await?;
                    return Ok(HookOutcome::Retry(err));
                }
                manager.mark_abort();
                ctx.take_session();
                if let Err(end_err) = manager.end().await {
                    warn!(
                        target: "vaultbase::adapter",
                        model = tx.model.slug(),
                        error = %end_err,
                        "ending aborted session failed"
                    );
                }
                ctx.add_warnings(manager.warnings());
                return Ok(HookOutcome::Continue);
            }

            match manager.end().await {
                Ok(_) => {
                    ctx.take_session();
                    ctx.add_warnings(manager.warnings());
                    Ok(HookOutcome::Continue)
                }
                Err(err) if err.is_retryable() => {
                    manager.reset().await?;
                    Ok(HookOutcome::Retry(err))
                }
                Err(err) => {
                    ctx.take_session();
                    ctx.add_warnings(manager.warnings());
                    Err(err)
                }
            }
        }
        .boxed()
    }
}

// ==================
// Payload
// ==================

struct StampSystemFields;

impl Hook for StampSystemFields {
    fn name(&self) -> &str {
        "stamp"
    }

    fn applies_to(&self, action: Action) -> bool {
        action.is_create() || action.is_update()
    }

    fn run<'a>(
        &'a self,
        _adapter: &'a Adapter,
        ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>> {
        async move {
            let now = Value::String(format_date(&Utc::now()));

            if tx.action.is_update() {
                let mut ops = normalize_update(&tx.update)?;
                let set = ops
                    .entry("$set".to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(set) = set {
                    set.insert("_updatedAt".to_string(), now);
                }
                tx.update = Value::Object(ops);
                return Ok(HookOutcome::Continue);
            }

            for doc in &mut tx.data {
                let Value::Object(map) = doc else {
                    return Err(DataError::query("documents to create must be objects"));
                };
                if map.get("_id").map_or(true, Value::is_null) {
                    map.insert("_id".to_string(), Value::String(generate_identifier()));
                }
                map.entry("_createdAt").or_insert_with(|| now.clone());
                if let Some(account) = &ctx.account {
                    map.entry("_createdBy")
                        .or_insert_with(|| Value::String(account.clone()));
                }
                map.insert("_updatedAt".to_string(), now.clone());
            }
            Ok(HookOutcome::Continue)
        }
        .boxed()
    }
}

struct CoercePayload;

impl Hook for CoercePayload {
    fn name(&self) -> &str {
        "coerce"
    }

    fn applies_to(&self, action: Action) -> bool {
        action.is_create() || action.is_update()
    }

    fn run<'a>(
        &'a self,
        _adapter: &'a Adapter,
        _ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>> {
        async move {
            let root = tx.model.root().clone();

            if tx.action.is_create() {
                let mut coerced = Vec::with_capacity(tx.data.len());
                for doc in &tx.data {
                    let ctx = SerializeContext::new().with_instance(doc);
                    coerced.push(root.serialize_value(doc, Format::Data, &ctx)?);
                }
                tx.data = coerced;
                return Ok(HookOutcome::Continue);
            }

            let Some(Value::Object(set)) = tx.update.get("$set").cloned() else {
                return Ok(HookOutcome::Continue);
            };
            let pending = pending_view(&set);
            let mut coerced = Map::new();
            for (path, value) in set {
                let value = match tx.model.property(&path) {
                    Some(property) => {
                        let ctx = SerializeContext::new().with_overrides(&pending);
                        property.serialize_value(&value, Format::Data, &ctx)?
                    }
                    None => value,
                };
                coerced.insert(path, value);
            }
            if let Value::Object(ops) = &mut tx.update {
                ops.insert("$set".to_string(), Value::Object(coerced));
            }
            Ok(HookOutcome::Continue)
        }
        .boxed()
    }
}

/// Nested view of a flat `$set` map, so dotted keys resolve as paths.
pub(crate) fn pending_view(set: &Map<String, Value>) -> Value {
    let mut view = Value::Object(Map::new());
    for (path, value) in set {
        set_path(&mut view, path, value.clone());
    }
    view
}

// ==================
// Query
// ==================

struct ResolveQuery;

impl Hook for ResolveQuery {
    fn name(&self) -> &str {
        "query.resolve"
    }

    fn applies_to(&self, action: Action) -> bool {
        action.selects()
    }

    fn run<'a>(
        &'a self,
        adapter: &'a Adapter,
        ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>> {
        async move {
            let reader = adapter.reader(ctx, tx.manager.clone());
            let parser =
                QueryParser::new(adapter.registry(), adapter.config()).with_source(&reader);
            let parsed = parser.parse(&tx.model, &tx.query).await?;
            tx.warnings.extend(parsed.warnings.iter().cloned());
            tx.parsed = Some(parsed);
            Ok(HookOutcome::Continue)
        }
        .boxed()
    }
}

// ==================
// Cache
// ==================

struct CacheLookup;

impl Hook for CacheLookup {
    fn name(&self) -> &str {
        "cache.lookup"
    }

    fn applies_to(&self, action: Action) -> bool {
        action.is_read()
    }

    fn run<'a>(
        &'a self,
        adapter: &'a Adapter,
        ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>> {
        async move {
            if !cache_applies(adapter, ctx) {
                return Ok(HookOutcome::Continue);
            }
            let Some(parsed) = &tx.parsed else {
                return Ok(HookOutcome::Continue);
            };
            let model_key = tx.model.cache_key(&tx.namespace);
            let key = adapter
                .cache()
                .key(&model_key, tx.action.name(), &parsed.filter, &parsed.options_map());

            let hit = match adapter.cache().get(&key).await {
                Some(cached) => OperationResult::from_cached(tx.action, cached),
                None => None,
            };
            match hit {
                Some(result) => {
                    adapter.metrics().increment_cache_hits();
                    debug!(target: "vaultbase::cache", model = tx.model.slug(), %key, "cache hit");
                    tx.result = Some(result);
                    tx.from_cache = true;
                }
                None => adapter.metrics().increment_cache_misses(),
            }
            tx.cache_key = Some(key);
            Ok(HookOutcome::Continue)
        }
        .boxed()
    }
}

struct CacheFill;

impl Hook for CacheFill {
    fn name(&self) -> &str {
        "cache.fill"
    }

    fn applies_to(&self, action: Action) -> bool {
        action.is_read()
    }

    fn run<'a>(
        &'a self,
        adapter: &'a Adapter,
        _ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>> {
        async move {
            if tx.from_cache {
                return Ok(HookOutcome::Continue);
            }
            if let (Some(key), Some(result)) = (&tx.cache_key, &tx.result) {
                adapter.cache().put(key, &result.to_cached()).await;
            }
            Ok(HookOutcome::Continue)
        }
        .boxed()
    }
}

struct CacheInvalidate;

impl Hook for CacheInvalidate {
    fn name(&self) -> &str {
        "cache.invalidate"
    }

    fn applies_to(&self, action: Action) -> bool {
        action.is_write()
    }

    fn run<'a>(
        &'a self,
        adapter: &'a Adapter,
        _ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>> {
        async move {
            let cache = adapter.cache().clone();
            if !cache.is_enabled() {
                return Ok(HookOutcome::Continue);
            }
            let model_key = tx.model.cache_key(&tx.namespace);
            cache.invalidate_model(&model_key).await?;

            // Entries cached between the write and its commit go too
            if let Some(manager) = &tx.manager {
                let key = format!("cache:{}", model_key);
                manager.on(LifecycleEvent::Commit, INVALIDATE_GROUP, key, move || async move {
                    cache.invalidate_model(&model_key).await.map(|_| ())
                })?;
            }
            Ok(HookOutcome::Continue)
        }
        .boxed()
    }
}

// ==================
// Validation
// ==================

struct ValidateWrite;

impl Hook for ValidateWrite {
    fn name(&self) -> &str {
        "validate"
    }

    fn applies_to(&self, action: Action) -> bool {
        action.is_create() || action.is_update()
    }

    fn run<'a>(
        &'a self,
        adapter: &'a Adapter,
        ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>> {
        async move {
            if !adapter.config().validate_on_write || tx.written.is_empty() {
                return Ok(HookOutcome::Continue);
            }

            let root = tx.model.root();
            let mut instances = Vec::with_capacity(tx.written.len());
            for doc in &tx.written {
                let scope = SerializeContext::new().with_instance(doc);
                instances.push(root.serialize_value(doc, Format::Validation, &scope)?);
            }

            let reader = adapter.reader(ctx, tx.manager.clone());
            let env = ValidationEnv {
                property_kinds: adapter.property_kinds(),
                validator_kinds: adapter.validator_kinds(),
                lookup: Some(&reader),
            };
            if let Err(err) = validate(tx.model.validation_target(), &env, &instances).await {
                if matches!(err, DataError::Validation(_)) {
                    adapter.metrics().increment_validation_failures();
                }
                return Err(err);
            }
            Ok(HookOutcome::Continue)
        }
        .boxed()
    }
}
