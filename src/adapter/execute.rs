//! Attempt orchestration and storage execution of the primitives.
//!
//! Flow of one attempt:
//! 1. Before hooks
//! 2. Storage call, unless a hook already produced the result or failed
//! 3. After hooks, which always run
//!
//! The retry loop replays attempts that report [`Outcome::Retry`].

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::action::Action;
use super::builtin::pending_view;
use super::hooks::Phase;
use super::reader::{render, timed};
use super::transaction::{OperationResult, Request, Transaction};
use super::Adapter;
use crate::context::RequestContext;
use crate::document::{get_path, set_path};
use crate::error::{DataError, DataResult};
use crate::property::{SerializeContext, Visibility};
use crate::query::related_ids;
use crate::schema::Model;
use crate::session::{run_with_retry, Outcome};
use crate::storage::FindOptions;

impl Adapter {
    /// Run one primitive call to completion, replaying retryable attempts.
    pub(crate) async fn execute(
        &self,
        ctx: &RequestContext,
        slug: &str,
        request: Request,
    ) -> DataResult<OperationResult> {
        self.initialize()?;
        let model = self.registry().get(slug)?;
        self.metrics().increment_operations();

        let outcome = run_with_retry(
            &self.config().retry,
            Some(self.metrics().as_ref()),
            request.action.name(),
            |attempt| self.attempt(ctx, &model, &request, attempt),
        )
        .await;

        let (result, warnings) = match outcome {
            Ok(settled) => settled,
            Err(err) => {
                self.metrics().increment_failures();
                warn!(
                    target: "vaultbase::adapter",
                    model = model.slug(),
                    action = request.action.name(),
                    code = err.code(),
                    error = %err,
                    "operation failed"
                );
                return Err(err);
            }
        };
        ctx.add_warnings(warnings);

        let result = self.render_result(&model, result)?;
        if request.query.populate.is_empty() {
            return Ok(result);
        }
        self.populate(ctx, &model, &request.query.populate, result).await
    }

    async fn attempt(
        &self,
        ctx: &RequestContext,
        model: &Arc<Model>,
        request: &Request,
        attempt: u32,
    ) -> Outcome<(OperationResult, Vec<String>)> {
        let namespace = model.namespace(&self.config().database, ctx.environment.as_deref());
        let mut tx = Transaction::new(Arc::clone(model), namespace, request, attempt);
        debug!(
            target: "vaultbase::adapter",
            model = model.slug(),
            action = tx.action.name(),
            attempt,
            transaction = %tx.id,
            "attempt started"
        );

        if let Some(err) = self.hooks().run(Phase::Before, self, ctx, &mut tx).await {
            return Outcome::Retry(err);
        }

        if !tx.failed() && tx.result.is_none() {
            match self.perform(&mut tx).await {
                Ok(result) => tx.result = Some(result),
                Err(err) => tx.fail(err),
            }
        }

        if let Some(err) = self.hooks().run(Phase::After, self, ctx, &mut tx).await {
            return Outcome::Retry(err);
        }

        match (tx.error.take(), tx.result.take()) {
            (Some(DataError::Aborted(reason)), _) => Outcome::Abort(reason),
            (Some(err), _) => Outcome::Error(err),
            (None, Some(result)) => Outcome::Ok((result, tx.warnings)),
            (None, None) => Outcome::Error(DataError::internal(format!(
                "{} settled without a result",
                tx.action.name()
            ))),
        }
    }

    /// Storage call of the primitive, in stored form
    async fn perform(&self, tx: &mut Transaction) -> DataResult<OperationResult> {
        let limit = self.config().max_execution();
        let store = self.store();
        let ns = tx.namespace.clone();
        let session = tx.session.clone();
        let session = session.as_ref();
        let filter = tx.filter();

        match tx.action {
            Action::Count => {
                let n = timed(limit, store.count(&ns, &filter, session)).await?;
                Ok(OperationResult::Count(n.min(self.config().max_total_count)))
            }
            Action::Get => {
                let options = FindOptions {
                    limit: Some(1),
                    ..tx.options()
                };
                let docs = timed(limit, store.find(&ns, &filter, &options, session)).await?;
                Ok(OperationResult::One(docs.into_iter().next()))
            }
            Action::GetList => {
                let options = tx.options();
                let docs = timed(limit, store.find(&ns, &filter, &options, session)).await?;
                Ok(OperationResult::List(docs))
            }
            Action::CreateOne | Action::CreateMultiple => {
                let mut docs = std::mem::take(&mut tx.data);
                if docs.is_empty() {
                    return match tx.action {
                        Action::CreateOne => Err(DataError::query("nothing to create")),
                        _ => Ok(OperationResult::List(Vec::new())),
                    };
                }
                for doc in &mut docs {
                    tx.model.scope_document(doc);
                }
                let stored = timed(limit, store.insert_many(&ns, docs, session)).await?;
                tx.written = stored.clone();
                Ok(match tx.action {
                    Action::CreateOne => OperationResult::One(stored.into_iter().next()),
                    _ => OperationResult::List(stored),
                })
            }
            Action::UpdateOne | Action::UpdateMultiple => {
                let first = tx.action == Action::UpdateOne;
                let options = FindOptions {
                    sort: tx.options().sort,
                    limit: if first { Some(1) } else { None },
                    skip: 0,
                };
                let matched = timed(limit, store.find(&ns, &filter, &options, session)).await?;
                let ids = document_ids(&matched);
                if ids.is_empty() {
                    return Ok(if first {
                        OperationResult::One(None)
                    } else {
                        OperationResult::Affected(0)
                    });
                }

                let by_id = tx.model.scope_filter(json!({ "_id": { "$in": ids } }));
                let restricted: Vec<Value> = matched
                    .iter()
                    .map(|doc| visible_update(&tx.model, &tx.update, doc))
                    .collect();
                let touched = if restricted.iter().all(|update| *update == tx.update) {
                    timed(limit, store.update_many(&ns, &by_id, &tx.update, session)).await?
                } else {
                    // A target was dropped for some document: write each one separately
                    let mut touched = 0;
                    for (doc, update) in matched.iter().zip(&restricted) {
                        let one = tx.model.scope_filter(by_own_id(doc));
                        touched +=
                            timed(limit, store.update_many(&ns, &one, update, session)).await?;
                    }
                    touched
                };
                let updated = timed(
                    limit,
                    store.find(&ns, &by_id, &FindOptions::default(), session),
                )
                .await?;
                tx.written = updated.clone();
                Ok(if first {
                    OperationResult::One(updated.into_iter().next())
                } else {
                    OperationResult::Affected(touched)
                })
            }
            Action::DeleteOne => {
                let options = FindOptions {
                    limit: Some(1),
                    ..tx.options()
                };
                let matched = timed(limit, store.find(&ns, &filter, &options, session)).await?;
                let Some(doc) = matched.into_iter().next() else {
                    return Ok(OperationResult::One(None));
                };
                let by_id = tx.model.scope_filter(by_own_id(&doc));
                timed(limit, store.delete_many(&ns, &by_id, session)).await?;
                Ok(OperationResult::One(Some(doc)))
            }
            Action::DeleteMultiple => {
                let deleted = timed(limit, store.delete_many(&ns, &filter, session)).await?;
                Ok(OperationResult::Affected(deleted))
            }
        }
    }

    /// Convert stored documents to wire form
    fn render_result(&self, model: &Model, result: OperationResult) -> DataResult<OperationResult> {
        Ok(match result {
            OperationResult::One(Some(doc)) => OperationResult::One(Some(render(model, &doc)?)),
            OperationResult::List(docs) => OperationResult::List(
                docs.iter()
                    .map(|doc| render(model, doc))
                    .collect::<DataResult<Vec<_>>>()?,
            ),
            other => other,
        })
    }

    /// Embed related documents at each `populate` path, one level deep.
    async fn populate(
        &self,
        ctx: &RequestContext,
        model: &Model,
        paths: &[String],
        result: OperationResult,
    ) -> DataResult<OperationResult> {
        let (mut docs, single) = match result {
            OperationResult::One(Some(doc)) => (vec![doc], true),
            OperationResult::List(docs) => (docs, false),
            other => return Ok(other),
        };
        let reader = self.reader(ctx, ctx.current_session());

        for path in paths {
            let property = model.property(path).ok_or_else(|| {
                DataError::query(format!("cannot populate unknown path '{}'", path))
            })?;
            let target = property.relation_target().ok_or_else(|| {
                DataError::query(format!("cannot populate '{}': not a relation", path))
            })?;
            let target = self.registry().get(target)?;
            let many = property.items().is_some();

            let mut ids = Vec::new();
            for doc in &docs {
                if let Some(value) = get_path(doc, path) {
                    related_ids(value, &mut ids);
                }
            }
            let ids: Vec<String> = ids
                .into_iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            let related = reader.by_ids(&target, &ids).await?;

            for doc in &mut docs {
                let Some(value) = get_path(doc, path).cloned() else {
                    continue;
                };
                let mut wanted = Vec::new();
                related_ids(&value, &mut wanted);
                let mut embedded: Vec<Value> = wanted
                    .iter()
                    .filter_map(|id| related.iter().find(|r| r.get("_id") == Some(id)).cloned())
                    .collect();
                let replacement = if many {
                    Value::Array(embedded)
                } else if embedded.is_empty() {
                    Value::Null
                } else {
                    embedded.swap_remove(0)
                };
                set_path(doc, path, replacement);
            }
        }

        Ok(if single {
            OperationResult::One(docs.pop())
        } else {
            OperationResult::List(docs)
        })
    }
}

fn document_ids(docs: &[Value]) -> Vec<Value> {
    docs.iter().filter_map(|doc| doc.get("_id").cloned()).collect()
}

fn by_own_id(doc: &Value) -> Value {
    json!({ "_id": doc.get("_id").cloned().unwrap_or(Value::Null) })
}

/// Operators whose targets write a value under the path
const WRITING_OPERATORS: &[&str] = &["$set", "$inc", "$push", "$addToSet"];

/// Drop update targets hidden by conditional visibility of an ancestor
/// object. The discriminant is read from pending `$set` values first, then
/// from the stored document.
fn visible_update(model: &Model, update: &Value, stored: &Value) -> Value {
    let Value::Object(ops) = update else {
        return update.clone();
    };
    let pending = match ops.get("$set") {
        Some(Value::Object(set)) => pending_view(set),
        _ => Value::Object(Map::new()),
    };

    let mut restricted = ops.clone();
    for (operator, fields) in restricted.iter_mut() {
        if !WRITING_OPERATORS.contains(&operator.as_str()) {
            continue;
        }
        if let Value::Object(fields) = fields {
            fields.retain(|path, _| !is_hidden(model, path, &pending, stored));
        }
    }
    Value::Object(restricted)
}

fn is_hidden(model: &Model, path: &str, pending: &Value, stored: &Value) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    for depth in 1..segments.len() {
        let parent = segments[..depth].join(".");
        let Some(property) = model.property(&parent) else {
            continue;
        };
        if property.options().conditional_properties.is_none() {
            continue;
        }
        let raw = get_path(stored, &parent)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let ctx = SerializeContext::new()
            .with_overrides(pending)
            .with_instance(stored);
        if !Visibility::resolve(&property, &raw, &ctx).is_visible(segments[depth]) {
            return true;
        }
    }
    false
}
