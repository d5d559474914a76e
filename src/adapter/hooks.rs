//! Hook Pipeline
//!
//! Ordered before/after hooks wrapping every fetch primitive.
//! Hooks of one phase run in ascending order; ties keep registration order.
//! Once the attempt has failed, only hooks that handle errors still run.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use super::action::Action;
use super::transaction::Transaction;
use super::Adapter;
use crate::context::RequestContext;
use crate::error::{DataError, DataResult};

/// Side of the primitive a hook runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Before,
    After,
}

/// What a hook asks of the attempt
#[derive(Debug, Clone)]
pub enum HookOutcome {
    Continue,
    /// Stop this attempt and replay the primitive
    Retry(DataError),
    /// Fail this attempt without replaying
    Abort(String),
}

/// A before/after hook
pub trait Hook: Send + Sync {
    fn name(&self) -> &str;

    /// Run even after an earlier failure in the attempt
    fn handles_errors(&self) -> bool {
        false
    }

    fn applies_to(&self, _action: Action) -> bool {
        true
    }

    fn run<'a>(
        &'a self,
        adapter: &'a Adapter,
        ctx: &'a RequestContext,
        tx: &'a mut Transaction,
    ) -> BoxFuture<'a, DataResult<HookOutcome>>;
}

struct Registered {
    phase: Phase,
    order: i32,
    seq: u64,
    hook: Arc<dyn Hook>,
}

/// Registered hooks of one adapter
#[derive(Default)]
pub struct HookPipeline {
    hooks: RwLock<Vec<Registered>>,
    seq: AtomicU64,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, phase: Phase, order: i32, hook: Arc<dyn Hook>) -> DataResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut hooks = self
            .hooks
            .write()
            .map_err(|_| DataError::internal("Lock poisoned"))?;
        hooks.push(Registered {
            phase,
            order,
            seq,
            hook,
        });
        hooks.sort_by_key(|h| (h.order, h.seq));
        Ok(())
    }

    /// Remove every hook named `name`, returning how many were removed
    pub fn remove(&self, name: &str) -> DataResult<usize> {
        let mut hooks = self
            .hooks
            .write()
            .map_err(|_| DataError::internal("Lock poisoned"))?;
        let before = hooks.len();
        hooks.retain(|h| h.hook.name() != name);
        Ok(before - hooks.len())
    }

    /// Hook names of one phase, in run order
    pub fn names(&self, phase: Phase) -> DataResult<Vec<String>> {
        Ok(self
            .hooks
            .read()
            .map_err(|_| DataError::internal("Lock poisoned"))?
            .iter()
            .filter(|h| h.phase == phase)
            .map(|h| h.hook.name().to_string())
            .collect())
    }

    fn ordered(&self, phase: Phase, action: Action) -> DataResult<Vec<Arc<dyn Hook>>> {
        Ok(self
            .hooks
            .read()
            .map_err(|_| DataError::internal("Lock poisoned"))?
            .iter()
            .filter(|h| h.phase == phase && h.hook.applies_to(action))
            .map(|h| Arc::clone(&h.hook))
            .collect())
    }

    /// Run one phase over an attempt.
    ///
    /// Failures are recorded on `tx`. Returns the error a hook asked to
    /// retry on, which stops the phase immediately.
    pub async fn run(
        &self,
        phase: Phase,
        adapter: &Adapter,
        ctx: &RequestContext,
        tx: &mut Transaction,
    ) -> Option<DataError> {
        let hooks = match self.ordered(phase, tx.action) {
            Ok(hooks) => hooks,
            Err(err) => {
                tx.fail(err);
                return None;
            }
        };

        for hook in hooks {
            if tx.failed() && !hook.handles_errors() {
                continue;
            }
            match hook.run(adapter, ctx, tx).await {
                Ok(HookOutcome::Continue) => {}
                Ok(HookOutcome::Retry(err)) => {
                    debug!(
                        target: "vaultbase::adapter",
                        hook = hook.name(),
                        attempt = tx.attempt,
                        "hook requested retry"
                    );
                    return Some(err);
                }
                Ok(HookOutcome::Abort(reason)) => {
                    debug!(
                        target: "vaultbase::adapter",
                        hook = hook.name(),
                        %reason,
                        "hook aborted attempt"
                    );
                    tx.fail(DataError::Aborted(reason));
                }
                Err(err) => {
                    if tx.failed() {
                        warn!(
                            target: "vaultbase::adapter",
                            hook = hook.name(),
                            error = %err,
                            "hook failed after an earlier failure"
                        );
                    }
                    tx.fail(err);
                }
            }
        }
        None
    }
}

impl fmt::Debug for HookPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (before, after) = (self.names(Phase::Before), self.names(Phase::After));
        f.debug_struct("HookPipeline")
            .field("before", &before.unwrap_or_default())
            .field("after", &after.unwrap_or_default())
            .finish()
    }
}
