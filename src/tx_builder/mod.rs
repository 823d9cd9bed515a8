//! Transaction pipeline
//!
//! - **errors**: error taxonomy and the user-facing normalizer
//! - **gas**: buffered gas limits and fee-market overrides
//! - **pending**: forward-only registry of submitted transactions
//! - **notifications**: toasts keyed by transaction hash
//! - **executor**: submit, confirm, and report one contract write
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relief_orchestrator::provider::sim::SimulatedChain;
//! use relief_orchestrator::rpc_manager::RetryConfig;
//! use relief_orchestrator::tx_builder::{GasConfig, GasEstimator, TxConfig, TxExecutor};
//! use relief_orchestrator::types::ContractCall;
//!
//! # async fn example() -> Result<(), relief_orchestrator::tx_builder::TxError> {
//! let chain = Arc::new(SimulatedChain::new());
//! let estimator = GasEstimator::new(chain.clone(), GasConfig::default(), RetryConfig::default());
//! let executor = TxExecutor::new(estimator, TxConfig::default(), RetryConfig::default());
//!
//! let receipt = executor
//!     .execute(chain.as_ref(), ContractCall::register_vendor("Corner Pharmacy", "medical"), "Register vendor")
//!     .await?;
//! assert!(receipt.status);
//! # Ok(())
//! # }
//! ```

pub mod errors;
pub mod executor;
pub mod gas;
pub mod notifications;
pub mod pending;

pub use errors::{extract_revert_reason, normalize, ErrorKind, NormalizedError, TxError};
pub use executor::{TxConfig, TxExecutor, TxLifecycle};
pub use gas::{buffered_limit, GasConfig, GasEstimator};
pub use notifications::{NotificationCenter, Toast, ToastKey, ToastState};
pub use pending::{PendingRegistry, PendingTransaction, TxStatus};
