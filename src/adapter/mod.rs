//! # Adapter Contract & Hook Pipeline
//!
//! An [`Adapter`] binds models to one document store. It owns:
//! - the property and validator kind registries
//! - the model registry (optionally chained to a parent)
//! - the cache layer and the metrics registry
//! - the hook pipeline wrapping the nine fetch primitives
//!
//! # Primitives
//!
//! `count`, `get`, `get_list`, `create_one`, `create_multiple`,
//! `update_one`, `update_multiple`, `delete_one`, `delete_multiple`.
//! Each call runs as one or more attempts; every attempt builds a fresh
//! [`Transaction`] record and passes it through the before hooks, the
//! storage call and the after hooks. Hooks report a typed [`HookOutcome`];
//! a `Retry` replays the call under the configured retry policy.

#[allow(clippy::module_inception)]
mod adapter;
mod action;
mod builtin;
mod execute;
mod hooks;
mod reader;
mod transaction;

pub use action::Action;
pub use adapter::Adapter;
pub use builtin::{
    CACHE_FILL_ORDER, CACHE_INVALIDATE_ORDER, CACHE_LOOKUP_ORDER, COERCE_ORDER, RESOLVE_ORDER,
    SESSION_OPEN_ORDER, SESSION_SETTLE_ORDER, STAMP_ORDER, VALIDATE_ORDER,
};
pub use hooks::{Hook, HookOutcome, HookPipeline, Phase};
pub use reader::{render, timed, StoreReader};
pub use transaction::{OperationResult, Request, Transaction};
