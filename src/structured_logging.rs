//! Structured logging for session and transaction events

use alloy_primitives::{Address, B256};

use crate::observability::CorrelationId;

/// Logger bound to one session or request context
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context_id: CorrelationId,
}

impl StructuredLogger {
    pub fn new(context_id: CorrelationId) -> Self {
        Self { context_id }
    }

    pub fn context_id(&self) -> &CorrelationId {
        &self.context_id
    }

    pub fn log_tx_submitted(&self, label: &str, hash: B256, gas_limit: Option<u64>) {
        tracing::info!(
            context_id = %self.context_id.short(),
            label = %label,
            hash = %hash,
            gas_limit = ?gas_limit,
            "Transaction submitted"
        );
    }

    pub fn log_tx_mined(&self, label: &str, hash: B256, block: u64, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id.short(),
            label = %label,
            hash = %hash,
            block = block,
            latency_ms = latency_ms,
            "Transaction mined"
        );
    }

    pub fn log_tx_failed(&self, label: &str, hash: Option<B256>, error: &str) {
        tracing::warn!(
            context_id = %self.context_id.short(),
            label = %label,
            hash = ?hash,
            error = %error,
            "Transaction failed"
        );
    }

    pub fn log_role_resolved(&self, account: Address, role: &str, probe: Option<&str>) {
        tracing::info!(
            context_id = %self.context_id.short(),
            account = %account,
            role = %role,
            matched_probe = probe.unwrap_or("default"),
            "Role resolved"
        );
    }

    pub fn log_transition(&self, from: &str, to: &str, cause: &str) {
        tracing::debug!(
            context_id = %self.context_id.short(),
            from = %from,
            to = %to,
            cause = %cause,
            "Connection state transition"
        );
    }

    pub fn log_refresh(&self, account: Address, sequence: u64, trigger: &str) {
        tracing::debug!(
            context_id = %self.context_id.short(),
            account = %account,
            sequence = sequence,
            trigger = %trigger,
            "Balances refreshed"
        );
    }
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new(CorrelationId::new())
    }
}
