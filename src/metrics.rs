//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::time::Instant;

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Transaction lifecycle
    pub tx_submitted: IntCounter,
    pub tx_mined: IntCounter,
    pub tx_failed: IntCounter,
    pub gas_estimate_failures: IntCounter,

    // RPC
    pub rpc_retries: IntCounter,

    // Session
    pub role_resolutions: IntCounter,
    pub role_probe_failures: IntCounter,

    // Synchronizer
    pub balance_refreshes: IntCounter,
    pub balance_refresh_failures: IntCounter,
    pub stale_snapshots_dropped: IntCounter,

    // Gauges
    pub pending_transactions: IntGauge,

    // Histograms
    pub confirmation_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let tx_submitted = IntCounter::with_opts(Opts::new(
            "tx_submitted_total",
            "Transactions accepted by the wallet and broadcast",
        ))?;
        let tx_mined = IntCounter::with_opts(Opts::new(
            "tx_mined_total",
            "Transactions confirmed successfully",
        ))?;
        let tx_failed = IntCounter::with_opts(Opts::new(
            "tx_failed_total",
            "Transactions that ended in a normalized error",
        ))?;
        let gas_estimate_failures = IntCounter::with_opts(Opts::new(
            "gas_estimate_failures_total",
            "Gas estimations that failed and fell back to the wallet default",
        ))?;
        let rpc_retries = IntCounter::with_opts(Opts::new(
            "rpc_retries_total",
            "Backoff sleeps taken after a rate-limited RPC call",
        ))?;
        let role_resolutions = IntCounter::with_opts(Opts::new(
            "role_resolutions_total",
            "Completed role resolutions",
        ))?;
        let role_probe_failures = IntCounter::with_opts(Opts::new(
            "role_probe_failures_total",
            "Role probes that errored and were treated as no match",
        ))?;
        let balance_refreshes = IntCounter::with_opts(Opts::new(
            "balance_refreshes_total",
            "Balance refreshes that completed",
        ))?;
        let balance_refresh_failures = IntCounter::with_opts(Opts::new(
            "balance_refresh_failures_total",
            "Balance refreshes that failed after retries",
        ))?;
        let stale_snapshots_dropped = IntCounter::with_opts(Opts::new(
            "stale_snapshots_dropped_total",
            "Balance reads discarded because a newer snapshot was already published",
        ))?;
        let pending_transactions = IntGauge::with_opts(Opts::new(
            "pending_transactions",
            "Transactions submitted but not yet mined or failed",
        ))?;
        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "tx_confirmation_seconds",
                "Time from submission to confirmation",
            )
            .buckets(vec![1.0, 2.0, 5.0, 12.0, 30.0, 60.0, 120.0, 300.0]),
        )?;

        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(tx_mined.clone()))?;
        registry.register(Box::new(tx_failed.clone()))?;
        registry.register(Box::new(gas_estimate_failures.clone()))?;
        registry.register(Box::new(rpc_retries.clone()))?;
        registry.register(Box::new(role_resolutions.clone()))?;
        registry.register(Box::new(role_probe_failures.clone()))?;
        registry.register(Box::new(balance_refreshes.clone()))?;
        registry.register(Box::new(balance_refresh_failures.clone()))?;
        registry.register(Box::new(stale_snapshots_dropped.clone()))?;
        registry.register(Box::new(pending_transactions.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            tx_submitted,
            tx_mined,
            tx_failed,
            gas_estimate_failures,
            rpc_retries,
            role_resolutions,
            role_probe_failures,
            balance_refreshes,
            balance_refresh_failures,
            stale_snapshots_dropped,
            pending_transactions,
            confirmation_latency,
        })
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.elapsed_secs());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_registered_names() {
        let m = Metrics::new().unwrap();
        m.tx_submitted.inc();
        let text = m.render().unwrap();
        assert!(text.contains("tx_submitted_total 1"));
        assert!(text.contains("pending_transactions"));
    }
}
