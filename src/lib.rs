//! vaultbase - Schema engine and transactional persistence layer
//!
//! Models declare typed properties and validators. An [`Adapter`] exposes
//! nine fetch primitives over a document store, each wrapped in a hook
//! pipeline that manages sessions, retries, query rewriting, validation
//! and result caching.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod observability;
pub mod property;
pub mod query;
pub mod schema;
pub mod session;
pub mod storage;
pub mod validation;

pub use adapter::{Action, Adapter, Hook, HookOutcome, HookPipeline, Phase, Transaction};
pub use config::{CacheConfig, DataConfig, RetryConfig};
pub use context::RequestContext;
pub use error::{DataError, DataResult};
pub use property::{Format, PropertyDef, PropertyKinds};
pub use query::Query;
pub use schema::{Model, ModelConfig, ModelRegistry};
pub use storage::{DocumentStore, InMemoryStore};
pub use validation::{ValidationError, ValidatorDef, ValidatorKinds};
