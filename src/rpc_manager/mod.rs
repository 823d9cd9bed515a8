//! RPC Manager Module
//!
//! Bounded exponential backoff for provider calls that hit rate limits.

pub mod rpc_retry;

pub use rpc_retry::{
    retry_with_backoff, retry_with_metrics, BackoffSchedule, RetryConfig, RetryOutcome,
};
