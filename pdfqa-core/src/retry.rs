//! Exponential backoff retry for capability adapters.
//!
//! The orchestrator never retries; adapters opt into this helper for
//! failures that are plausibly transient.

use crate::config::RetryConfig;
use std::future::Future;
use std::time::Duration;

/// Errors that can tell whether another attempt might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Execute an async operation with exponential backoff retry on transient errors.
///
/// Permanent errors return immediately; the last transient error is returned
/// once `max_retries` is exhausted.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_transient() || attempt >= config.max_retries {
                    return Err(e);
                }
                let backoff_ms = compute_backoff(config, attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Delay before retry number `attempt + 1`, capped at `max_backoff_ms`.
fn compute_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let factor = config.backoff_multiplier.max(1.0).powi(attempt as i32);
    let delay = (config.initial_backoff_ms as f64 * factor) as u64;
    delay.min(config.max_backoff_ms)
}
