//! # Session Manager & Retry Policy
//!
//! One [`SessionManager`] per request owns the store sessions the request
//! touched (one per physical database) and the lifecycle hooks run when it
//! ends. [`run_with_retry`] replays an operation whose attempt reported a
//! retryable failure, with linear backoff.
//!
//! # Retryable failures
//!
//! Classified by [`DataError::is_retryable`](crate::error::DataError::is_retryable):
//! closed or unknown transactions, write conflicts, unavailable snapshots and
//! storage-call timeouts.

mod manager;
mod retry;

pub use crate::config::RetryConfig;
pub use manager::{LifecycleEvent, LifecycleHook, SessionManager, SessionOutcome};
pub use retry::{run_with_retry, Outcome};
