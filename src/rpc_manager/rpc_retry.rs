use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::metrics::metrics;
use crate::provider::{ProviderError, ProviderResult};

/// Backoff configuration for rate-limited RPC calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = `max_retries + 1`
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: u64,
    /// Multiplier applied after each retry (must be >= 1.0)
    pub backoff_factor: f64,
    /// Upper bound for any single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// More attempts, shorter delays
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 250,
            backoff_factor: 1.5,
            max_delay_ms: 4_000,
        }
    }

    /// Fewer attempts, longer delays
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 2_000,
            backoff_factor: 3.0,
            max_delay_ms: 20_000,
        }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay sequence this config produces, one entry per retry
    pub fn schedule(&self) -> BackoffSchedule {
        BackoffSchedule {
            remaining: self.max_retries,
            next_ms: self.base_delay_ms.min(self.max_delay_ms),
            factor: self.backoff_factor.max(1.0),
            max_ms: self.max_delay_ms,
        }
    }
}

/// Exponential delay sequence, non-decreasing and capped at `max_delay_ms`
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    remaining: u32,
    next_ms: u64,
    factor: f64,
    max_ms: u64,
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next_ms;
        let grown = (current as f64 * self.factor).min(self.max_ms as f64);
        self.next_ms = (grown as u64).max(current);
        Some(Duration::from_millis(current))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining as usize;
        (n, Some(n))
    }
}

/// Attempt accounting for one retried call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    pub attempts: u32,
    pub delays: Vec<Duration>,
}

/// Run `operation`, retrying rate-limited failures with exponential backoff
///
/// Non rate-limited errors propagate after the first attempt. When the budget
/// is spent the last error is returned unchanged. Each call owns its own
/// budget, so concurrent callers never share attempts.
pub async fn retry_with_backoff<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    retry_with_metrics(operation_name, config, operation).await.0
}

/// Same as [`retry_with_backoff`], also reporting attempts and delays taken
pub async fn retry_with_metrics<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> (ProviderResult<T>, RetryOutcome)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let start = Instant::now();
    let mut schedule = config.schedule();
    let mut outcome = RetryOutcome::default();

    loop {
        outcome.attempts += 1;
        let err: ProviderError = match operation().await {
            Ok(value) => {
                if outcome.attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts = outcome.attempts,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return (Ok(value), outcome);
            }
            Err(err) => err,
        };

        if !err.is_rate_limited() {
            return (Err(err), outcome);
        }

        match schedule.next() {
            Some(delay) => {
                debug!(
                    operation = operation_name,
                    attempt = outcome.attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Rate limited, backing off"
                );
                metrics().rpc_retries.inc();
                outcome.delays.push(delay);
                sleep(delay).await;
            }
            None => {
                warn!(
                    operation = operation_name,
                    attempts = outcome.attempts,
                    error = %err,
                    "Retry budget exhausted"
                );
                return (Err(err), outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay_ms: 10,
            backoff_factor: 2.0,
            max_delay_ms: 25,
        }
    }

    #[test]
    fn test_schedule_doubles_and_caps() {
        let delays: Vec<u64> = fast().schedule().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![10, 20, 25]);
    }

    #[test]
    fn test_schedule_ignores_shrinking_factor() {
        let config = RetryConfig {
            backoff_factor: 0.5,
            ..fast()
        };
        let delays: Vec<u64> = config.schedule().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![10, 10, 10]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let (result, outcome) = retry_with_metrics("balance", &fast(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::rate_limited())
                } else {
                    Ok(7u64)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: ProviderResult<()> = retry_with_backoff("send", &fast(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::user_rejected())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), ProviderError::user_rejected());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revert_mentioning_429_fails_on_first_attempt() {
        let (result, outcome) = retry_with_metrics("zone", &RetryConfig::default(), || async {
            Err::<(), _>(ProviderError::reverted(Some("Zone 429 is closed")))
        })
        .await;

        assert_eq!(
            result.unwrap_err().revert_reason.as_deref(),
            Some("Zone 429 is closed")
        );
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.delays.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let (result, outcome) = retry_with_metrics("owner", &fast(), || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::new(format!("rate limit hit #{n}")))
            }
        })
        .await;

        assert_eq!(result.unwrap_err().message, "rate limit hit #3");
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.delays.len(), 3);
    }
}
