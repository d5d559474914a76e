//! Request Context
//!
//! Context carried through every fetch primitive of one inbound request:
//! who is acting, which environment is addressed, the request's session
//! manager and the warnings collected for the response.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DataError, DataResult};
use crate::session::{SessionManager, SessionOutcome};

/// Context of one inbound request
#[derive(Debug)]
pub struct RequestContext {
    /// Request ID for tracing
    pub request_id: Uuid,

    /// Acting account, stamped into `_createdBy`
    pub account: Option<String>,

    /// Environment addressed by the request (scopes environment-scoped models)
    pub environment: Option<String>,

    /// Metadata for observability
    pub metadata: HashMap<String, Value>,

    /// End the session manager after every primitive
    autocommit: bool,

    session: Mutex<Option<Arc<SessionManager>>>,
    warnings: Mutex<Vec<String>>,

    /// Start time for duration tracking
    started_at: Instant,
}

impl RequestContext {
    /// Create an autocommit context
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            account: None,
            environment: None,
            metadata: HashMap::new(),
            autocommit: true,
            session: Mutex::new(None),
            warnings: Mutex::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    /// Create a context whose primitives share one transaction, settled by
    /// [`finish`](Self::finish)
    pub fn transactional() -> Self {
        Self {
            autocommit: false,
            ..Self::new()
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Add metadata for observability
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    /// The request's session manager, created on first use
    pub fn session_manager(
        &self,
        init: impl FnOnce() -> SessionManager,
    ) -> DataResult<Arc<SessionManager>> {
        let mut slot = self
            .session
            .lock()
            .map_err(|_| DataError::internal("Lock poisoned"))?;
        Ok(Arc::clone(slot.get_or_insert_with(|| Arc::new(init()))))
    }

    /// The current session manager, if one was created
    pub fn current_session(&self) -> Option<Arc<SessionManager>> {
        self.session.lock().ok().and_then(|slot| slot.clone())
    }

    /// Detach the session manager; the next primitive starts a new one
    pub fn take_session(&self) -> Option<Arc<SessionManager>> {
        self.session.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn add_warning(&self, warning: impl Into<String>) {
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(warning.into());
        }
    }

    pub fn add_warnings(&self, warnings: impl IntoIterator<Item = String>) {
        if let Ok(mut current) = self.warnings.lock() {
            current.extend(warnings);
        }
    }

    /// Response-level warnings collected so far
    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// End the request's transaction.
    ///
    /// Returns `None` when no primitive touched the store.
    pub async fn finish(&self) -> DataResult<Option<SessionOutcome>> {
        let Some(manager) = self.take_session() else {
            return Ok(None);
        };
        let outcome = manager.end().await;
        self.add_warnings(manager.warnings());
        debug!(
            request_id = %self.request_id,
            elapsed_ms = self.elapsed_ms() as u64,
            ok = outcome.is_ok(),
            "request finished"
        );
        outcome.map(Some)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
