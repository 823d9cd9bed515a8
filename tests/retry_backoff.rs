//! Integration tests for the rate-limit retry helper
//!
//! This test validates:
//! - Backoff schedules are non-decreasing and capped for any config
//! - Rate-limited calls are attempted at most `max_retries + 1` times
//! - Concurrent callers each carry their own retry budget

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use relief_orchestrator::provider::sim::{SimulatedChain, OP_FEE_DATA, OP_OWNER};
use relief_orchestrator::provider::{ChainReader, ProviderError, ReliefContract};
use relief_orchestrator::rpc_manager::{retry_with_backoff, retry_with_metrics, RetryConfig};

fn config_strategy() -> impl Strategy<Value = RetryConfig> {
    (0u32..12, 1u64..5_000, 1.0f64..4.0, 1u64..60_000).prop_map(
        |(max_retries, base_delay_ms, backoff_factor, max_delay_ms)| RetryConfig {
            max_retries,
            base_delay_ms,
            backoff_factor,
            max_delay_ms,
        },
    )
}

proptest! {
    #[test]
    fn prop_schedule_is_monotonic_and_capped(config in config_strategy()) {
        let delays: Vec<Duration> = config.schedule().collect();
        prop_assert_eq!(delays.len(), config.max_retries as usize);

        let cap = Duration::from_millis(config.max_delay_ms);
        for pair in delays.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
        for delay in &delays {
            prop_assert!(*delay <= cap);
        }
    }

    #[test]
    fn prop_attempts_bounded_for_rate_limits(config in config_strategy(), failures in 0u32..20) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let (result, outcome) = runtime.block_on(retry_with_metrics("prop", &config, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < failures {
                    Err(ProviderError::rate_limited())
                } else {
                    Ok(())
                }
            }
        }));

        let attempts = calls.load(Ordering::SeqCst);
        prop_assert!(attempts <= config.max_retries + 1);
        prop_assert_eq!(outcome.attempts, attempts);
        prop_assert_eq!(result.is_ok(), failures <= config.max_retries);
        prop_assert_eq!(outcome.delays.len() as u32, attempts - 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_simulated_rate_limit_recovers() {
    let chain = SimulatedChain::new();
    chain.rate_limit(OP_FEE_DATA, 2);

    let fee = retry_with_backoff("fee_data", &RetryConfig::default(), || chain.fee_data())
        .await
        .unwrap();

    assert!(fee.base_fee_per_gas.is_some());
    assert_eq!(chain.call_count(OP_FEE_DATA), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_rate_limit_propagates_last_error() {
    let chain = SimulatedChain::new();
    chain.rate_limit(OP_OWNER, 10);
    let config = RetryConfig {
        max_retries: 2,
        ..RetryConfig::default()
    };

    let err = retry_with_backoff("owner", &config, || chain.owner())
        .await
        .unwrap_err();

    assert!(err.is_rate_limited());
    assert_eq!(chain.call_count(OP_OWNER), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_have_independent_budgets() {
    let config = RetryConfig {
        max_retries: 2,
        base_delay_ms: 100,
        backoff_factor: 2.0,
        max_delay_ms: 1_000,
    };
    let first = Arc::new(AtomicU32::new(0));
    let second = Arc::new(AtomicU32::new(0));

    let always_limited = |counter: Arc<AtomicU32>| {
        let config = config.clone();
        async move {
            retry_with_metrics("concurrent", &config, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ProviderError::rate_limited())
                }
            })
            .await
        }
    };

    let ((a, a_outcome), (b, b_outcome)) = futures::future::join(
        always_limited(first.clone()),
        always_limited(second.clone()),
    )
    .await;

    assert!(a.is_err() && b.is_err());
    assert_eq!(first.load(Ordering::SeqCst), 3);
    assert_eq!(second.load(Ordering::SeqCst), 3);
    assert_eq!(a_outcome.delays, b_outcome.delays);
    assert_eq!(
        a_outcome.delays,
        vec![Duration::from_millis(100), Duration::from_millis(200)]
    );
}
