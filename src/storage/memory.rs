//! In-memory document store with optimistic transactions.
//!
//! A session stages a private copy of every collection it writes. Commit
//! succeeds only if none of those collections changed since the copy was
//! taken; otherwise the session is closed with a write conflict. Reads in a
//! session see its own staged writes, and committed data elsewhere.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use super::errors::{StoreError, StoreResult};
use super::filter::{sort_documents, FilterMatcher};
use super::store::{DocumentStore, FindOptions, Namespace, SessionHandle};
use super::update::apply_update;
use crate::property::generate_identifier;

#[derive(Debug, Clone, Default)]
struct Collection {
    version: u64,
    docs: IndexMap<String, Value>,
}

#[derive(Debug)]
struct Transaction {
    database: String,
    /// collection -> (committed version when staged, staged copy)
    staged: HashMap<String, (u64, Collection)>,
}

#[derive(Debug, Default)]
struct State {
    databases: HashMap<String, HashMap<String, Collection>>,
    sessions: HashMap<Uuid, Transaction>,
    closed: HashSet<Uuid>,
}

impl State {
    fn committed(&self, ns: &Namespace) -> Option<&Collection> {
        self.databases.get(&ns.database)?.get(&ns.collection)
    }

    fn transaction(
        &mut self,
        session: &SessionHandle,
        ns: &Namespace,
    ) -> StoreResult<&mut Transaction> {
        if self.closed.contains(&session.id) {
            return Err(StoreError::TransactionClosed(session.id.to_string()));
        }
        let tx = self
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| StoreError::NoSuchTransaction(session.id.to_string()))?;
        if tx.database != ns.database {
            return Err(StoreError::Internal(format!(
                "session {} is bound to database {}, not {}",
                session.id, tx.database, ns.database
            )));
        }
        Ok(tx)
    }

    /// Documents visible to a read
    fn visible(
        &mut self,
        ns: &Namespace,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Value>> {
        if let Some(session) = session {
            let tx = self.transaction(session, ns)?;
            if let Some((_, staged)) = tx.staged.get(&ns.collection) {
                return Ok(staged.docs.values().cloned().collect());
            }
        }
        Ok(self
            .committed(ns)
            .map(|c| c.docs.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Collection a write applies to: the session's staged copy, or the
    /// committed collection itself.
    fn writable(
        &mut self,
        ns: &Namespace,
        session: Option<&SessionHandle>,
    ) -> StoreResult<&mut Collection> {
        match session {
            Some(session) => {
                let base = self.committed(ns).cloned().unwrap_or_default();
                let tx = self.transaction(session, ns)?;
                let (_, staged) = tx
                    .staged
                    .entry(ns.collection.clone())
                    .or_insert_with(|| (base.version, base));
                Ok(staged)
            }
            None => {
                let collection = self
                    .databases
                    .entry(ns.database.clone())
                    .or_default()
                    .entry(ns.collection.clone())
                    .or_default();
                collection.version += 1;
                Ok(collection)
            }
        }
    }
}

/// In-memory [`DocumentStore`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
    faults: Mutex<VecDeque<StoreError>>,
    latency: Mutex<Option<Duration>>,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` data calls (reads, writes, commits) fail with `error`.
    pub fn fail_next(&self, times: usize, error: StoreError) -> StoreResult<()> {
        let mut faults = self
            .faults
            .lock()
            .map_err(|_| StoreError::Internal("Lock poisoned".into()))?;
        faults.extend(std::iter::repeat(error).take(times));
        Ok(())
    }

    /// Delay every data call by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) -> StoreResult<()> {
        *self
            .latency
            .lock()
            .map_err(|_| StoreError::Internal("Lock poisoned".into()))? = latency;
        Ok(())
    }

    /// Number of sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.state.lock().map(|s| s.sessions.len()).unwrap_or(0)
    }

    /// Number of successful commits
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Number of aborts, including sessions closed by a conflict
    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }

    async fn before_call(&self) -> StoreResult<()> {
        let latency = *self
            .latency
            .lock()
            .map_err(|_| StoreError::Internal("Lock poisoned".into()))?;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let fault = self
            .faults
            .lock()
            .map_err(|_| StoreError::Internal("Lock poisoned".into()))?
            .pop_front();
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> StoreResult<R>) -> StoreResult<R> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Internal("Lock poisoned".into()))?;
        f(&mut state)
    }

    fn close(&self, state: &mut State, session: &SessionHandle) {
        state.sessions.remove(&session.id);
        state.closed.insert(session.id);
    }
}

fn matching_ids(docs: &IndexMap<String, Value>, filter: &Value) -> StoreResult<Vec<String>> {
    let mut ids = Vec::new();
    for (id, doc) in docs {
        if FilterMatcher::matches(doc, filter)? {
            ids.push(id.clone());
        }
    }
    Ok(ids)
}

impl DocumentStore for InMemoryStore {
    fn start_session<'a>(&'a self, database: &'a str) -> BoxFuture<'a, StoreResult<SessionHandle>> {
        async move {
            let handle = SessionHandle::new(database);
            self.with_state(|state| {
                state.sessions.insert(
                    handle.id,
                    Transaction {
                        database: database.to_string(),
                        staged: HashMap::new(),
                    },
                );
                Ok(())
            })?;
            Ok(handle)
        }
        .boxed()
    }

    fn commit<'a>(&'a self, session: &'a SessionHandle) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            if let Err(err) = self.before_call().await {
                self.with_state(|state| {
                    self.close(state, session);
                    Ok(())
                })?;
                self.aborts.fetch_add(1, Ordering::Relaxed);
                return Err(err);
            }

            let result = self.with_state(|state| {
                if state.closed.contains(&session.id) {
                    return Err(StoreError::TransactionClosed(session.id.to_string()));
                }
                let tx = state
                    .sessions
                    .remove(&session.id)
                    .ok_or_else(|| StoreError::NoSuchTransaction(session.id.to_string()))?;
                state.closed.insert(session.id);

                let database = state.databases.entry(tx.database.clone()).or_default();
                for (name, (base, _)) in &tx.staged {
                    let current = database.get(name).map(|c| c.version).unwrap_or(0);
                    if current != *base {
                        return Err(StoreError::WriteConflict(format!("{}:{}", tx.database, name)));
                    }
                }
                for (name, (base, mut staged)) in tx.staged {
                    staged.version = base + 1;
                    database.insert(name, staged);
                }
                Ok(())
            });

            match &result {
                Ok(()) => self.commits.fetch_add(1, Ordering::Relaxed),
                Err(_) => self.aborts.fetch_add(1, Ordering::Relaxed),
            };
            result
        }
        .boxed()
    }

    fn abort<'a>(&'a self, session: &'a SessionHandle) -> BoxFuture<'a, StoreResult<()>> {
        async move {
            self.with_state(|state| {
                if state.sessions.contains_key(&session.id) {
                    self.close(state, session);
                }
                Ok(())
            })?;
            self.aborts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        .boxed()
    }

    fn count<'a>(
        &'a self,
        ns: &'a Namespace,
        filter: &'a Value,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<u64>> {
        async move {
            self.before_call().await?;
            self.with_state(|state| {
                let mut count = 0;
                for doc in state.visible(ns, session)? {
                    if FilterMatcher::matches(&doc, filter)? {
                        count += 1;
                    }
                }
                Ok(count)
            })
        }
        .boxed()
    }

    fn find<'a>(
        &'a self,
        ns: &'a Namespace,
        filter: &'a Value,
        options: &'a FindOptions,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
        async move {
            self.before_call().await?;
            let mut docs = self.with_state(|state| {
                let mut docs = Vec::new();
                for doc in state.visible(ns, session)? {
                    if FilterMatcher::matches(&doc, filter)? {
                        docs.push(doc);
                    }
                }
                Ok(docs)
            })?;

            sort_documents(&mut docs, &options.sort);
            let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
            let limit = options
                .limit
                .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
                .unwrap_or(usize::MAX);
            Ok(docs.into_iter().skip(skip).take(limit).collect())
        }
        .boxed()
    }

    fn insert_many<'a>(
        &'a self,
        ns: &'a Namespace,
        documents: Vec<Value>,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<Vec<Value>>> {
        async move {
            self.before_call().await?;
            self.with_state(|state| {
                let collection = state.writable(ns, session)?;

                let mut prepared = Vec::with_capacity(documents.len());
                let mut batch = HashSet::new();
                for mut doc in documents {
                    let Value::Object(map) = &mut doc else {
                        return Err(StoreError::InvalidUpdate("documents must be objects".into()));
                    };
                    let id = match map.get("_id") {
                        Some(Value::String(id)) => id.clone(),
                        Some(other) => other.to_string(),
                        None => {
                            let id = generate_identifier();
                            map.insert("_id".to_string(), Value::String(id.clone()));
                            id
                        }
                    };
                    if collection.docs.contains_key(&id) || !batch.insert(id.clone()) {
                        return Err(StoreError::DuplicateKey(id));
                    }
                    prepared.push((id, doc));
                }

                let mut stored = Vec::with_capacity(prepared.len());
                for (id, doc) in prepared {
                    collection.docs.insert(id, doc.clone());
                    stored.push(doc);
                }
                Ok(stored)
            })
        }
        .boxed()
    }

    fn update_many<'a>(
        &'a self,
        ns: &'a Namespace,
        filter: &'a Value,
        update: &'a Value,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<u64>> {
        async move {
            self.before_call().await?;
            self.with_state(|state| {
                let collection = state.writable(ns, session)?;
                let ids = matching_ids(&collection.docs, filter)?;

                let mut updated = Vec::with_capacity(ids.len());
                for id in &ids {
                    if let Some(doc) = collection.docs.get(id) {
                        let mut next = doc.clone();
                        apply_update(&mut next, update)?;
                        updated.push((id.clone(), next));
                    }
                }
                for (id, doc) in updated {
                    collection.docs.insert(id, doc);
                }
                Ok(ids.len() as u64)
            })
        }
        .boxed()
    }

    fn delete_many<'a>(
        &'a self,
        ns: &'a Namespace,
        filter: &'a Value,
        session: Option<&'a SessionHandle>,
    ) -> BoxFuture<'a, StoreResult<u64>> {
        async move {
            self.before_call().await?;
            self.with_state(|state| {
                let collection = state.writable(ns, session)?;
                let ids = matching_ids(&collection.docs, filter)?;
                for id in &ids {
                    collection.docs.shift_remove(id);
                }
                Ok(ids.len() as u64)
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ns() -> Namespace {
        Namespace::new("app", "posts")
    }

    #[tokio::test]
    async fn test_autocommit_writes_are_visible() {
        let store = InMemoryStore::new();
        store
            .insert_many(&ns(), vec![json!({"_id": "a", "n": 1})], None)
            .await
            .unwrap();

        let docs = store
            .find(&ns(), &json!({}), &FindOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(docs, vec![json!({"_id": "a", "n": 1})]);
    }

    #[tokio::test]
    async fn test_session_writes_are_isolated_until_commit() {
        let store = InMemoryStore::new();
        let session = store.start_session("app").await.unwrap();
        store
            .insert_many(&ns(), vec![json!({"_id": "a"})], Some(&session))
            .await
            .unwrap();

        assert_eq!(store.count(&ns(), &json!({}), None).await.unwrap(), 0);
        assert_eq!(store.count(&ns(), &json!({}), Some(&session)).await.unwrap(), 1);

        store.commit(&session).await.unwrap();
        assert_eq!(store.count(&ns(), &json!({}), None).await.unwrap(), 1);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commit_conflicts() {
        let store = InMemoryStore::new();
        let first = store.start_session("app").await.unwrap();
        let second = store.start_session("app").await.unwrap();

        store
            .insert_many(&ns(), vec![json!({"_id": "a"})], Some(&first))
            .await
            .unwrap();
        store
            .insert_many(&ns(), vec![json!({"_id": "b"})], Some(&second))
            .await
            .unwrap();

        store.commit(&first).await.unwrap();
        let err = store.commit(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::WriteConflict(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_closed_session_is_reported() {
        let store = InMemoryStore::new();
        let session = store.start_session("app").await.unwrap();
        store.abort(&session).await.unwrap();

        let err = store.count(&ns(), &json!({}), Some(&session)).await.unwrap_err();
        assert!(matches!(err, StoreError::TransactionClosed(_)));

        let unknown = SessionHandle::new("app");
        let err = store.count(&ns(), &json!({}), Some(&unknown)).await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchTransaction(_)));
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .insert_many(&ns(), vec![json!({"_id": "a"}), json!({"_id": "a"})], None)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateKey("a".into()));
        assert_eq!(store.count(&ns(), &json!({}), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = InMemoryStore::new();
        store
            .insert_many(
                &ns(),
                vec![json!({"_id": "a", "n": 1}), json!({"_id": "b", "n": 2})],
                None,
            )
            .await
            .unwrap();

        let updated = store
            .update_many(&ns(), &json!({"n": {"$gte": 2}}), &json!({"$inc": {"n": 10}}), None)
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let deleted = store.delete_many(&ns(), &json!({"_id": "a"}), None).await.unwrap();
        assert_eq!(deleted, 1);

        let docs = store
            .find(&ns(), &json!({}), &FindOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(docs, vec![json!({"_id": "b", "n": 12})]);
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let store = InMemoryStore::new();
        store
            .fail_next(1, StoreError::SnapshotUnavailable("test".into()))
            .unwrap();
        assert!(store.count(&ns(), &json!({}), None).await.is_err());
        assert!(store.count(&ns(), &json!({}), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_find_sorts_and_pages() {
        let store = InMemoryStore::new();
        let docs = (0..5).map(|n| json!({"_id": n.to_string(), "n": n})).collect();
        store.insert_many(&ns(), docs, None).await.unwrap();

        let mut options = FindOptions::limit(2);
        options.skip = 1;
        options.sort.insert("n".into(), json!(-1));
        let page = store.find(&ns(), &json!({}), &options, None).await.unwrap();
        let ns_seen: Vec<i64> = page.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(ns_seen, vec![3, 2]);
    }
}
