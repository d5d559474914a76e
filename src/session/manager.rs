//! Per-request transactional boundary.
//!
//! A manager opens at most one store session per physical database, lazily,
//! and runs lifecycle hooks around the final commit or abort. Ending is
//! memoized: callers that race on `end` share one outcome, a caller arriving
//! after the outcome is known gets [`DataError::SessionEnded`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::error::{DataError, DataResult};
use crate::observability::MetricsRegistry;
use crate::storage::{DocumentStore, SessionHandle};

/// Lifecycle moments hooks can attach to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Before the underlying sessions are settled; failure forces abort
    End,
    /// After every session committed
    Commit,
    /// After every session aborted, or as compensation for failed commit hooks
    Abort,
    /// Last, best-effort; failures become warnings
    Complete,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::End => "end",
            LifecycleEvent::Commit => "commit",
            LifecycleEvent::Abort => "abort",
            LifecycleEvent::Complete => "complete",
        }
    }
}

/// How a manager ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Committed,
    Aborted,
}

/// A lifecycle hook; runs at most once
pub type LifecycleHook = Box<dyn FnOnce() -> BoxFuture<'static, DataResult<()>> + Send>;

struct RegisteredHook {
    key: String,
    group: i32,
    hook: LifecycleHook,
}

type EndFuture = Shared<BoxFuture<'static, DataResult<SessionOutcome>>>;

/// Transactional boundary of one request
pub struct SessionManager {
    store: Arc<dyn DocumentStore>,
    metrics: Option<Arc<MetricsRegistry>>,
    /// database -> open session; async so two callers never open twice
    sessions: tokio::sync::Mutex<IndexMap<String, SessionHandle>>,
    hooks: Mutex<HashMap<LifecycleEvent, Vec<RegisteredHook>>>,
    /// (event, key) pairs already registered
    seen: Mutex<HashSet<(LifecycleEvent, String)>>,
    abort: AtomicBool,
    ending: Mutex<Option<EndFuture>>,
    warnings: Mutex<Vec<String>>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            metrics: None,
            sessions: tokio::sync::Mutex::new(IndexMap::new()),
            hooks: Mutex::new(HashMap::new()),
            seen: Mutex::new(HashSet::new()),
            abort: AtomicBool::new(false),
            ending: Mutex::new(None),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Session bound to `database`, opened on first use.
    pub async fn session_for(&self, database: &str) -> DataResult<SessionHandle> {
        if self.is_ended()? {
            return Err(DataError::SessionEnded);
        }
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(database) {
            return Ok(handle.clone());
        }
        let handle = self.store.start_session(database).await?;
        debug!(
            target: "vaultbase::session",
            database,
            session = %handle.id,
            "session opened"
        );
        sessions.insert(database.to_string(), handle.clone());
        Ok(handle)
    }

    /// Databases with an open session, in opening order
    pub async fn databases(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Register a lifecycle hook.
    ///
    /// A second registration with the same `key` for the same event is
    /// ignored. Hooks in one group run concurrently; groups run in ascending
    /// order.
    pub fn on<F, Fut>(
        &self,
        event: LifecycleEvent,
        group: i32,
        key: impl Into<String>,
        hook: F,
    ) -> DataResult<bool>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = DataResult<()>> + Send + 'static,
    {
        let key = key.into();
        let fresh = self
            .seen
            .lock()
            .map_err(|_| DataError::internal("Lock poisoned"))?
            .insert((event, key.clone()));
        if !fresh {
            return Ok(false);
        }
        let hook: LifecycleHook = Box::new(move || hook().boxed());
        self.hooks
            .lock()
            .map_err(|_| DataError::internal("Lock poisoned"))?
            .entry(event)
            .or_default()
            .push(RegisteredHook { key, group, hook });
        Ok(true)
    }

    /// Force the final outcome to abort
    pub fn mark_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_marked_abort(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    /// Whether `end` has been called since creation or the last reset
    pub fn is_ended(&self) -> DataResult<bool> {
        Ok(self
            .ending
            .lock()
            .map_err(|_| DataError::internal("Lock poisoned"))?
            .is_some())
    }

    /// Complete-hook failures collected so far
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Settle every open session and run the lifecycle hooks.
    pub async fn end(self: &Arc<Self>) -> DataResult<SessionOutcome> {
        let ending = {
            let mut slot = self
                .ending
                .lock()
                .map_err(|_| DataError::internal("Lock poisoned"))?;
            match slot.as_ref() {
                Some(shared) if shared.peek().is_some() => return Err(DataError::SessionEnded),
                Some(shared) => shared.clone(),
                None => {
                    let this = Arc::clone(self);
                    let shared = async move { this.settle().await }.boxed().shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };
        ending.await
    }

    /// Abort every open session and clear the ended flag, so the manager can
    /// back a retried attempt.
    pub async fn reset(&self) -> DataResult<()> {
        let sessions: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain(..).map(|(_, handle)| handle).collect()
        };
        for handle in &sessions {
            if let Err(err) = self.store.abort(handle).await {
                warn!(
                    target: "vaultbase::session",
                    database = %handle.database,
                    error = %err,
                    "abort during reset failed"
                );
            }
        }
        // The replayed attempt registers its own hooks
        self.hooks
            .lock()
            .map_err(|_| DataError::internal("Lock poisoned"))?
            .clear();
        self.seen
            .lock()
            .map_err(|_| DataError::internal("Lock poisoned"))?
            .clear();
        self.abort.store(false, Ordering::SeqCst);
        *self
            .ending
            .lock()
            .map_err(|_| DataError::internal("Lock poisoned"))? = None;
        info!(
            target: "vaultbase::session",
            discarded = sessions.len(),
            "session manager reset"
        );
        Ok(())
    }

    async fn settle(self: Arc<Self>) -> DataResult<SessionOutcome> {
        let mut failure: Option<DataError> = None;

        if let Err(err) = self.run_hooks(LifecycleEvent::End).await {
            warn!(target: "vaultbase::session", error = %err, "end hook failed, aborting");
            failure = Some(err);
        }

        let sessions: Vec<SessionHandle> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain(..).map(|(_, handle)| handle).collect()
        };

        for handle in &sessions {
            let commit = failure.is_none() && !self.is_marked_abort();
            if commit {
                match self.store.commit(handle).await {
                    Ok(()) => {
                        debug!(
                            target: "vaultbase::session",
                            database = %handle.database,
                            "session committed"
                        );
                        continue;
                    }
                    Err(err) => {
                        warn!(
                            target: "vaultbase::session",
                            database = %handle.database,
                            error = %err,
                            "commit failed"
                        );
                        failure = Some(err.into());
                    }
                }
            } else if let Err(err) = self.store.abort(handle).await {
                warn!(
                    target: "vaultbase::session",
                    database = %handle.database,
                    error = %err,
                    "abort failed"
                );
            } else {
                debug!(
                    target: "vaultbase::session",
                    database = %handle.database,
                    "session aborted"
                );
            }
        }

        let outcome = if failure.is_none() && !self.is_marked_abort() {
            match self.run_hooks(LifecycleEvent::Commit).await {
                Ok(()) => SessionOutcome::Committed,
                Err(err) => {
                    // Compensate, then surface the commit hook failure
                    if let Err(comp) = self.run_hooks(LifecycleEvent::Abort).await {
                        warn!(
                            target: "vaultbase::session",
                            error = %comp,
                            "compensating abort hook failed"
                        );
                    }
                    failure = Some(err);
                    SessionOutcome::Aborted
                }
            }
        } else {
            if let Err(err) = self.run_hooks(LifecycleEvent::Abort).await {
                warn!(target: "vaultbase::session", error = %err, "abort hook failed");
            }
            SessionOutcome::Aborted
        };

        self.run_complete_hooks().await;

        if let Some(metrics) = &self.metrics {
            match outcome {
                SessionOutcome::Committed => metrics.increment_commits(),
                SessionOutcome::Aborted => metrics.increment_aborts(),
            }
        }
        info!(
            target: "vaultbase::session",
            outcome = ?outcome,
            sessions = sessions.len(),
            "session manager ended"
        );

        match failure {
            Some(err) => Err(err),
            None => Ok(outcome),
        }
    }

    fn take_hooks(&self, event: LifecycleEvent) -> DataResult<Vec<Vec<RegisteredHook>>> {
        let mut hooks = self
            .hooks
            .lock()
            .map_err(|_| DataError::internal("Lock poisoned"))?
            .remove(&event)
            .unwrap_or_default();
        hooks.sort_by_key(|h| h.group);

        let mut groups: Vec<Vec<RegisteredHook>> = Vec::new();
        for hook in hooks {
            match groups.last_mut() {
                Some(group) if group[0].group == hook.group => group.push(hook),
                _ => groups.push(vec![hook]),
            }
        }
        Ok(groups)
    }

    /// Run one event's hooks group by group, stopping at the first failing group.
    async fn run_hooks(&self, event: LifecycleEvent) -> DataResult<()> {
        for group in self.take_hooks(event)? {
            let results = join_all(group.into_iter().map(|h| (h.hook)())).await;
            if let Some(err) = results.into_iter().find_map(Result::err) {
                return Err(err);
            }
        }
        Ok(())
    }

    async fn run_complete_hooks(&self) {
        let groups = match self.take_hooks(LifecycleEvent::Complete) {
            Ok(groups) => groups,
            Err(err) => {
                self.push_warning(err.to_string());
                return;
            }
        };
        for group in groups {
            let keys: Vec<String> = group.iter().map(|h| h.key.clone()).collect();
            let results = join_all(group.into_iter().map(|h| (h.hook)())).await;
            for (key, result) in keys.into_iter().zip(results) {
                if let Err(err) = result {
                    warn!(
                        target: "vaultbase::session",
                        hook = %key,
                        error = %err,
                        "complete hook failed"
                    );
                    self.push_warning(format!("{}: {}", key, err));
                }
            }
        }
    }

    fn push_warning(&self, warning: String) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(warning);
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("abort", &self.is_marked_abort())
            .field("ended", &self.is_ended().unwrap_or(false))
            .finish()
    }
}
