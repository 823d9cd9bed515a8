//! Gas limit and fee-market overrides for a pending write
//!
//! Estimation never blocks submission. A failed estimate (typically a call
//! that would revert) leaves the gas limit unset so the wallet supplies its
//! own default; a failed fee query leaves the fee fields unset.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::metrics;
use crate::provider::{ChainReader, ReliefContract};
use crate::rpc_manager::{retry_with_backoff, RetryConfig};
use crate::types::{ContractCall, FeeData, TxOverrides};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfig {
    /// Safety margin added on top of the raw estimate, in percent
    pub margin_percent: u64,
    /// Attach EIP-1559 fee fields; otherwise attach a legacy gas price
    pub eip1559: bool,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            margin_percent: 20,
            eip1559: true,
        }
    }
}

/// Raw estimate plus `margin_percent`, saturating
pub fn buffered_limit(raw: u64, margin_percent: u64) -> u64 {
    let buffered = (raw as u128) * (100 + margin_percent as u128) / 100;
    u64::try_from(buffered).unwrap_or(u64::MAX)
}

/// Fee fields to attach, given the node's fee data and the fee mode
pub fn fee_overrides(fee: &FeeData, eip1559: bool) -> TxOverrides {
    let mut overrides = TxOverrides::default();
    if eip1559 {
        let priority = fee.max_priority_fee_per_gas;
        let max_fee = fee.max_fee_per_gas.or_else(|| {
            // Same headroom rule wallets apply: two base fees plus the tip
            fee.base_fee_per_gas
                .zip(priority)
                .map(|(base, tip)| base.saturating_mul(2).saturating_add(tip))
        });
        if let (Some(max_fee), Some(tip)) = (max_fee, priority) {
            overrides.max_fee_per_gas = Some(max_fee.max(tip));
            overrides.max_priority_fee_per_gas = Some(tip);
        }
    } else {
        overrides.gas_price = fee.gas_price;
    }
    overrides
}

/// Produces [`TxOverrides`] for a contract write
pub struct GasEstimator {
    reader: Arc<dyn ChainReader>,
    config: GasConfig,
    retry: RetryConfig,
}

impl GasEstimator {
    pub fn new(reader: Arc<dyn ChainReader>, config: GasConfig, retry: RetryConfig) -> Self {
        Self {
            reader,
            config,
            retry,
        }
    }

    pub fn config(&self) -> &GasConfig {
        &self.config
    }

    /// Compute overrides for `call`; never fails
    pub async fn overrides(&self, contract: &dyn ReliefContract, call: &ContractCall) -> TxOverrides {
        let estimate = retry_with_backoff("estimate_gas", &self.retry, || contract.estimate_gas(call)).await;
        let gas_limit = match estimate {
            Ok(raw) => {
                let limit = buffered_limit(raw, self.config.margin_percent);
                debug!(method = %call.method, raw, limit, "Gas estimated");
                Some(limit)
            }
            Err(err) => {
                metrics().gas_estimate_failures.inc();
                warn!(
                    method = %call.method,
                    error = %err,
                    "Gas estimation failed, submitting without gas limit override"
                );
                None
            }
        };

        let fees = match retry_with_backoff("fee_data", &self.retry, || self.reader.fee_data()).await {
            Ok(fee) => fee_overrides(&fee, self.config.eip1559),
            Err(err) => {
                warn!(error = %err, "Fee data unavailable, leaving fees to the wallet");
                TxOverrides::default()
            }
        };

        TxOverrides { gas_limit, ..fees }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_limit() {
        assert_eq!(buffered_limit(100_000, 20), 120_000);
        assert_eq!(buffered_limit(21_000, 0), 21_000);
        assert_eq!(buffered_limit(u64::MAX, 20), u64::MAX);
    }

    #[test]
    fn test_eip1559_from_base_fee() {
        let fee = FeeData {
            base_fee_per_gas: Some(10),
            max_priority_fee_per_gas: Some(2),
            ..Default::default()
        };
        let o = fee_overrides(&fee, true);
        assert_eq!(o.max_fee_per_gas, Some(22));
        assert_eq!(o.max_priority_fee_per_gas, Some(2));
        assert_eq!(o.gas_price, None);
    }

    #[test]
    fn test_eip1559_requires_tip() {
        let fee = FeeData {
            base_fee_per_gas: Some(10),
            gas_price: Some(12),
            ..Default::default()
        };
        assert!(fee_overrides(&fee, true).is_empty());
    }

    #[test]
    fn test_legacy_uses_gas_price() {
        let fee = FeeData {
            gas_price: Some(30),
            max_priority_fee_per_gas: Some(1),
            ..Default::default()
        };
        let o = fee_overrides(&fee, false);
        assert_eq!(o.gas_price, Some(30));
        assert_eq!(o.max_fee_per_gas, None);
    }
}
