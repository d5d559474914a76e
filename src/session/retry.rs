//! Bounded retry loop with linear backoff.
//!
//! An attempt reports a typed [`Outcome`] instead of raising control-flow
//! markers; only [`Outcome::Retry`] schedules another attempt.

use std::future::Future;

use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{DataError, DataResult};
use crate::observability::MetricsRegistry;

/// Result of one attempt
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Ok(T),
    /// Replay the operation on a fresh session
    Retry(DataError),
    /// Stop without replaying
    Abort(String),
    Error(DataError),
}

impl<T> From<DataResult<T>> for Outcome<T> {
    fn from(result: DataResult<T>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(err) => Outcome::Error(err),
        }
    }
}

/// Run `attempt` until it settles.
///
/// Attempts are numbered from 1. After a `Retry` from attempt `n` the loop
/// sleeps `policy.delay(n)`; a `Retry` once `max_retries` replays have been
/// spent surfaces its error.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryConfig,
    metrics: Option<&MetricsRegistry>,
    label: &str,
    mut attempt: F,
) -> DataResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Outcome<T>>,
{
    let mut number = 1;
    loop {
        match attempt(number).await {
            Outcome::Ok(value) => return Ok(value),
            Outcome::Retry(err) if number <= policy.max_retries => {
                let delay = policy.delay(number);
                warn!(
                    target: "vaultbase::session",
                    operation = label,
                    attempt = number,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retry scheduled"
                );
                if let Some(metrics) = metrics {
                    metrics.increment_retries();
                }
                tokio::time::sleep(delay).await;
                number += 1;
            }
            Outcome::Retry(err) | Outcome::Error(err) => return Err(err),
            Outcome::Abort(reason) => return Err(DataError::Aborted(reason)),
        }
    }
}
