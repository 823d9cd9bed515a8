//! Contract write execution with lifecycle tracking
//!
//! One invocation walks: overrides -> submit -> `Submitted` -> confirmation ->
//! `Mined`, or ends in `Failed` at whichever step broke. Exactly one of
//! `Mined`/`Failed` is emitted per invocation and `Submitted`, when emitted,
//! always comes first.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{warn, Instrument};

use super::errors::{NormalizedError, TxError};
use super::gas::GasEstimator;
use super::notifications::{NotificationCenter, ToastKey};
use super::pending::{PendingRegistry, TxStatus, DEFAULT_SETTLED_HISTORY};
use crate::metrics::{metrics, Timer};
use crate::observability::{tx_span, CorrelationId};
use crate::provider::{ProviderError, ProviderResult, ReliefContract};
use crate::rpc_manager::{retry_with_backoff, RetryConfig};
use crate::structured_logging::StructuredLogger;
use crate::types::{ContractCall, TxReceipt};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    /// Confirmations to wait for before reporting `Mined`
    pub confirmations: u64,
    /// Give up waiting for a receipt after this many seconds; `None` waits
    /// for as long as the provider does
    pub receipt_timeout_secs: Option<u64>,
    /// Settled transactions and terminal toasts kept before the oldest
    /// are evicted
    pub settled_history: usize,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            confirmations: 1,
            receipt_timeout_secs: None,
            settled_history: DEFAULT_SETTLED_HISTORY,
        }
    }
}

/// Lifecycle notification for one executor invocation
#[derive(Debug, Clone, PartialEq)]
pub enum TxLifecycle {
    Submitted {
        hash: B256,
        label: String,
    },
    Mined {
        hash: B256,
        receipt: TxReceipt,
        label: String,
    },
    Failed {
        hash: Option<B256>,
        label: String,
        error: NormalizedError,
    },
}

impl TxLifecycle {
    pub fn label(&self) -> &str {
        match self {
            TxLifecycle::Submitted { label, .. }
            | TxLifecycle::Mined { label, .. }
            | TxLifecycle::Failed { label, .. } => label,
        }
    }

    pub fn hash(&self) -> Option<B256> {
        match self {
            TxLifecycle::Submitted { hash, .. } | TxLifecycle::Mined { hash, .. } => Some(*hash),
            TxLifecycle::Failed { hash, .. } => *hash,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxLifecycle::Submitted { .. })
    }
}

pub struct TxExecutor {
    estimator: GasEstimator,
    config: TxConfig,
    retry: RetryConfig,
    pending: Arc<PendingRegistry>,
    notifications: Arc<NotificationCenter>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<TxLifecycle>>>,
    logger: StructuredLogger,
}

impl TxExecutor {
    pub fn new(estimator: GasEstimator, config: TxConfig, retry: RetryConfig) -> Self {
        Self {
            estimator,
            retry,
            pending: Arc::new(PendingRegistry::with_capacity(config.settled_history)),
            notifications: Arc::new(NotificationCenter::with_capacity(config.settled_history)),
            config,
            subscribers: Mutex::new(Vec::new()),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn pending(&self) -> &Arc<PendingRegistry> {
        &self.pending
    }

    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    /// Receive lifecycle events of every subsequent invocation
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TxLifecycle> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Submit `call` and wait for its confirmation
    ///
    /// On failure the error is normalized, reported, and returned.
    pub async fn execute(
        &self,
        contract: &dyn ReliefContract,
        call: ContractCall,
        label: &str,
    ) -> Result<TxReceipt, TxError> {
        let request = CorrelationId::new();
        let span = tx_span(label, &request);
        self.run(contract, &call, label, &request)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        contract: &dyn ReliefContract,
        call: &ContractCall,
        label: &str,
        request: &CorrelationId,
    ) -> Result<TxReceipt, TxError> {
        let overrides = self.estimator.overrides(contract, call).await;

        // Submission is not idempotent and is never retried
        let hash = match contract.send(call, &overrides).await {
            Ok(hash) => hash,
            Err(err) => return Err(self.fail(label, None, request, err)),
        };

        self.pending.insert_submitted(hash, label, overrides);
        metrics().tx_submitted.inc();
        self.logger.log_tx_submitted(label, hash, overrides.gas_limit);
        self.notifications.loading(
            ToastKey::Transaction(hash),
            format!("{label}: waiting for confirmation"),
        );
        self.emit(TxLifecycle::Submitted {
            hash,
            label: label.to_string(),
        });

        let timer = Timer::start();
        let receipt = match self.await_receipt(contract, hash).await {
            Ok(receipt) if receipt.status => receipt,
            Ok(receipt) => {
                let err = ProviderError::new(format!(
                    "transaction {hash} reverted in block {}",
                    receipt.block_number
                ))
                .with_symbol("CALL_EXCEPTION");
                return Err(self.fail(label, Some(hash), request, err));
            }
            Err(err) => return Err(self.fail(label, Some(hash), request, err)),
        };
        timer.observe_duration(&metrics().confirmation_latency);

        if let Err(err) = self.pending.settle(hash, TxStatus::Mined) {
            warn!(error = %err, "Pending registry out of sync");
        }
        metrics().tx_mined.inc();
        self.logger.log_tx_mined(
            label,
            hash,
            receipt.block_number,
            (timer.elapsed_secs() * 1000.0) as u64,
        );
        self.notifications
            .success(ToastKey::Transaction(hash), format!("{label}: confirmed"));
        self.emit(TxLifecycle::Mined {
            hash,
            receipt: receipt.clone(),
            label: label.to_string(),
        });
        Ok(receipt)
    }

    async fn await_receipt(
        &self,
        contract: &dyn ReliefContract,
        hash: B256,
    ) -> ProviderResult<TxReceipt> {
        let confirmations = self.config.confirmations;
        let wait = retry_with_backoff("wait_for_receipt", &self.retry, || {
            contract.wait_for_receipt(hash, confirmations)
        });
        match self.config.receipt_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
                .await
                .unwrap_or_else(|_| {
                    Err(ProviderError::timeout(format!(
                        "transaction {hash} not confirmed within {secs}s"
                    )))
                }),
            None => wait.await,
        }
    }

    fn fail(
        &self,
        label: &str,
        hash: Option<B256>,
        request: &CorrelationId,
        source: ProviderError,
    ) -> TxError {
        let error = TxError::new(label, hash, source);

        if let Some(hash) = hash {
            if let Err(err) = self.pending.settle(hash, TxStatus::Failed) {
                warn!(error = %err, "Pending registry out of sync");
            }
        }
        metrics().tx_failed.inc();
        self.logger
            .log_tx_failed(label, hash, &error.normalized.message);

        let key = match hash {
            Some(hash) => ToastKey::Transaction(hash),
            None => ToastKey::Request(request.clone()),
        };
        self.notifications
            .error(key, format!("{label}: {}", error.normalized));
        self.emit(TxLifecycle::Failed {
            hash,
            label: label.to_string(),
            error: error.normalized.clone(),
        });
        error
    }

    fn emit(&self, event: TxLifecycle) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
