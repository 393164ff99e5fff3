//! Retrying of fallible async operations with exponential backoff and jitter.
//!
//! Used by the exporter for file uploads, which are retried a bounded number
//! of times before the failure is handed to the global error handler.
use std::future::Future;
use std::time::Duration;

use cozeloop::loop_warn;
use rand::Rng;

/// Configuration for retry policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first call.
    pub max_retries: usize,
    /// Initial delay in milliseconds before the first retry.
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds between retries.
    pub max_delay_ms: u64,
    /// Maximum jitter in milliseconds to add to the delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    /// Three attempts in total.
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 100,
            max_delay_ms: 1_600,
            jitter_ms: 100,
        }
    }
}

fn generate_jitter(max_jitter: u64) -> u64 {
    if max_jitter == 0 {
        return 0;
    }
    rand::rng().random_range(0..=max_jitter)
}

/// Retries `operation` until it succeeds or `policy.max_retries` retries have
/// failed, in which case the last error is returned.
pub(crate) async fn retry_with_exponential_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    E: std::fmt::Display,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay_ms;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if attempt < policy.max_retries => {
                attempt += 1;
                loop_warn!(
                    name: "Retry.Attempt",
                    operation = operation_name,
                    attempt = attempt,
                    reason = format!("{err}")
                );
                let jitter = generate_jitter(policy.jitter_ms);
                let delay_with_jitter = std::cmp::min(delay + jitter, policy.max_delay_ms);
                tokio::time::sleep(Duration::from_millis(delay_with_jitter)).await;
                delay = std::cmp::min(delay * 2, policy.max_delay_ms);
            }
            Err(err) => return Err(err),
        }
    }
}
