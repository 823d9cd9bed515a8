//! Provider seams
//!
//! The orchestration layer never talks to a concrete wallet, node or contract
//! binding. It consumes three traits:
//!
//! - [`WalletProvider`]: account listing, authorization prompts and wallet events
//! - [`ChainReader`]: balances, fee-market data and chain head
//! - [`ReliefContract`]: typed reads, generic writes and contract events
//!
//! [`http::HttpRpcNode`] implements [`ChainReader`] over JSON-RPC.
//! [`sim::SimulatedChain`] implements all three in memory.

use std::fmt;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::{
    AccessRole, ContractCall, ContractLog, FeeData, TxOverrides, TxReceipt, VendorRecord,
    Voucher, Zone,
};

pub mod errors;
pub mod http;
pub mod sim;

pub use errors::{ProviderError, ProviderResult};

/// Notifications pushed by the wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// The set of exposed accounts changed; empty means the user locked or
    /// disconnected the wallet
    AccountsChanged(Vec<Address>),
    /// The wallet switched networks
    ChainChanged(u64),
    /// The wallet dropped its connection
    Disconnected,
}

/// Browser-wallet style account provider
#[async_trait]
pub trait WalletProvider: Send + Sync + fmt::Debug {
    /// Ask the user to authorize accounts; may show a wallet prompt
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>>;

    /// Accounts already authorized for this origin; never prompts
    async fn authorized_accounts(&self) -> ProviderResult<Vec<Address>>;

    async fn chain_id(&self) -> ProviderResult<u64>;

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent>;
}

/// Read access to the node
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn native_balance(&self, account: Address) -> ProviderResult<U256>;

    async fn fee_data(&self) -> ProviderResult<FeeData>;

    async fn block_number(&self) -> ProviderResult<u64>;
}

/// Handle on the deployed relief contract, bound to the session signer
#[async_trait]
pub trait ReliefContract: Send + Sync {
    fn address(&self) -> Address;

    async fn owner(&self) -> ProviderResult<Address>;

    async fn has_role(&self, role: AccessRole, account: Address) -> ProviderResult<bool>;

    /// `Ok(None)` when the account never registered as a vendor
    async fn vendor(&self, account: Address) -> ProviderResult<Option<VendorRecord>>;

    async fn vouchers_of(&self, account: Address) -> ProviderResult<Vec<Voucher>>;

    async fn zone(&self, zone_id: u64) -> ProviderResult<Option<Zone>>;

    /// Stable-token balance held by `account`
    async fn stable_balance(&self, account: Address) -> ProviderResult<U256>;

    async fn estimate_gas(&self, call: &ContractCall) -> ProviderResult<u64>;

    /// Sign and broadcast a write; returns the transaction hash
    async fn send(&self, call: &ContractCall, overrides: &TxOverrides) -> ProviderResult<B256>;

    /// Resolve once the transaction has `confirmations` confirmations
    async fn wait_for_receipt(&self, hash: B256, confirmations: u64) -> ProviderResult<TxReceipt>;

    /// Logs emitted by mined transactions
    fn events(&self) -> broadcast::Receiver<ContractLog>;
}
