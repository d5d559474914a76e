//! Observability for the data layer
//!
//! Logging goes through `tracing` with one target per subsystem
//! (`vaultbase::adapter`, `vaultbase::session`, `vaultbase::query`,
//! `vaultbase::cache`, `vaultbase::validation`). No subscriber is installed
//! here; the embedding service decides where events go.
//!
//! Counters live in [`MetricsRegistry`], one per adapter.

mod metrics;

pub use metrics::{MetricsRegistry, MetricsSnapshot};
