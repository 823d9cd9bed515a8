//! Relief Orchestrator Library
//!
//! Transaction orchestration and role resolution for the relief donation
//! contract: rate-limit aware RPC retries, gas and fee estimation, error
//! normalization, transaction lifecycle tracking, role resolution and
//! per-session balance synchronization.

pub mod config;
pub mod endpoints;
pub mod metrics;
pub mod observability;
pub mod provider;
pub mod rpc_manager;
pub mod session;
pub mod structured_logging;
pub mod tx_builder;
pub mod types;

// Re-export commonly used types
pub use alloy_primitives::{Address, B256, U256};
pub use config::Config;
pub use provider::{ChainReader, ProviderError, ReliefContract, WalletEvent, WalletProvider};
pub use session::{Authorization, ConnectionState, Role, SessionManager};
pub use tx_builder::{TxExecutor, TxLifecycle};
