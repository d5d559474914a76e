//! Document storage collaborator
//!
//! The data layer persists through the [`DocumentStore`] contract: sessions
//! bound to one physical database each, filter-based reads, and update
//! operator payloads. [`InMemoryStore`] implements it with optimistic
//! transactions so conflict handling can be exercised without a server.
//!
//! # Retryable failures
//!
//! - Write conflict at commit
//! - Snapshot unavailable
//! - Unknown or closed transaction
//! - Storage-call timeout

mod errors;
mod filter;
mod memory;
mod store;
mod update;

pub use errors::{StoreError, StoreResult};
pub use filter::{compare_values, sort_documents, FilterMatcher};
pub use memory::InMemoryStore;
pub use store::{DocumentStore, FindOptions, Namespace, SessionHandle};
pub use update::{apply_update, normalize_update, UPDATE_OPERATORS};
