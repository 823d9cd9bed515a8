//! Common types shared by the orchestration layer
//!
//! Everything here is a plain projection of on-chain state or a request that
//! will be sent to the contract. None of these types talk to a provider.

use alloy_primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A pending contract write: method name plus positional arguments
///
/// Arguments are kept as JSON values so the executor stays agnostic of the
/// contract ABI. Amounts and addresses are encoded as strings (decimal for
/// amounts, checksummed hex for addresses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    /// Contract method name
    pub method: String,

    /// Positional arguments
    pub args: Vec<Value>,

    /// Native value attached to the call (wei)
    #[serde(default)]
    pub value: U256,
}

impl ContractCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
            value: U256::ZERO,
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Attach native value to the call
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn create_zone(name: &str, category: &str, budget: U256) -> Self {
        Self::new("createZone")
            .arg(name)
            .arg(category)
            .arg(budget.to_string())
    }

    pub fn register_vendor(name: &str, category: &str) -> Self {
        Self::new("registerVendor").arg(name).arg(category)
    }

    pub fn verify_vendor(vendor: Address) -> Self {
        Self::new("verifyVendor").arg(vendor.to_string())
    }

    pub fn issue_voucher(
        beneficiary: Address,
        zone_id: u64,
        amount: U256,
        category: &str,
        expiry: u64,
    ) -> Self {
        Self::new("issueVoucher")
            .arg(beneficiary.to_string())
            .arg(zone_id)
            .arg(amount.to_string())
            .arg(category)
            .arg(expiry)
    }

    pub fn redeem_voucher(voucher_id: u64, beneficiary: Address) -> Self {
        Self::new("redeemVoucher")
            .arg(voucher_id)
            .arg(beneficiary.to_string())
    }

    pub fn transfer_funds(to: Address, amount: U256) -> Self {
        Self::new("transferFunds")
            .arg(to.to_string())
            .arg(amount.to_string())
    }

    pub fn donate(zone_id: u64, amount: U256) -> Self {
        Self::new("donate").arg(zone_id).with_value(amount)
    }

    pub fn submit_proof(zone_id: u64, proof_uri: &str) -> Self {
        Self::new("submitProof").arg(zone_id).arg(proof_uri)
    }

    /// Compact representation used in log fields
    pub fn summary(&self) -> Value {
        json!({ "method": self.method, "args": self.args.len(), "value": self.value.to_string() })
    }
}

/// Gas and fee overrides attached to a write
///
/// `None` means "let the wallet or node pick". An empty override set is a
/// valid submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOverrides {
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub gas_price: Option<u128>,
}

impl TxOverrides {
    pub fn is_empty(&self) -> bool {
        self.gas_limit.is_none()
            && self.max_fee_per_gas.is_none()
            && self.max_priority_fee_per_gas.is_none()
            && self.gas_price.is_none()
    }
}

/// Current fee-market data as reported by the node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeData {
    pub base_fee_per_gas: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub gas_price: Option<u128>,
}

/// Receipt of a mined transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    /// `false` when the transaction was included but reverted
    pub status: bool,
    pub effective_gas_price: Option<u128>,
}

/// Administrative role flags stored on the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessRole {
    Admin,
    Government,
    Treasury,
    Oracle,
}

impl AccessRole {
    /// Contract-side role identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessRole::Admin => "ADMIN_ROLE",
            AccessRole::Government => "GOVERNMENT_ROLE",
            AccessRole::Treasury => "TREASURY_ROLE",
            AccessRole::Oracle => "ORACLE_ROLE",
        }
    }
}

/// Disaster zone record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: u64,
    pub name: String,
    pub category: String,
    pub budget: U256,
    pub spent: U256,
    pub active: bool,
    pub created_by: Address,
}

/// Vendor registration record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRecord {
    pub vendor: Address,
    pub name: String,
    pub category: String,
    pub registered: bool,
    pub verified: bool,
}

/// Claim record entitling a beneficiary to redeem value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    pub id: u64,
    pub beneficiary: Address,
    pub zone_id: u64,
    pub amount: U256,
    pub category: String,
    /// Unix timestamp (seconds)
    pub expiry: u64,
    pub redeemed: bool,
}

impl Voucher {
    /// Unredeemed and not yet expired at `now` (unix seconds)
    pub fn is_active(&self, now: u64) -> bool {
        !self.redeemed && self.expiry > now
    }
}

/// Events emitted by the relief contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractEvent {
    ZoneCreated {
        zone_id: u64,
        creator: Address,
    },
    VoucherIssued {
        voucher_id: u64,
        beneficiary: Address,
        amount: U256,
    },
    VoucherRedeemed {
        voucher_id: u64,
        beneficiary: Address,
        vendor: Address,
        amount: U256,
    },
    FundsTransferred {
        from: Address,
        to: Address,
        amount: U256,
    },
    ProofSubmitted {
        zone_id: u64,
        oracle: Address,
    },
}

impl ContractEvent {
    /// Whether this event can change balances or vouchers of `account`
    pub fn involves(&self, account: Address) -> bool {
        match self {
            ContractEvent::VoucherIssued { beneficiary, .. } => *beneficiary == account,
            ContractEvent::VoucherRedeemed {
                beneficiary,
                vendor,
                ..
            } => *beneficiary == account || *vendor == account,
            ContractEvent::FundsTransferred { from, to, .. } => *from == account || *to == account,
            ContractEvent::ZoneCreated { .. } | ContractEvent::ProofSubmitted { .. } => false,
        }
    }

    pub fn is_voucher_event(&self) -> bool {
        matches!(
            self,
            ContractEvent::VoucherIssued { .. } | ContractEvent::VoucherRedeemed { .. }
        )
    }

    /// Zone id whose read-model this event invalidates
    pub fn zone_id(&self) -> Option<u64> {
        match self {
            ContractEvent::ZoneCreated { zone_id, .. }
            | ContractEvent::ProofSubmitted { zone_id, .. } => Some(*zone_id),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ContractEvent::ZoneCreated { .. } => "ZoneCreated",
            ContractEvent::VoucherIssued { .. } => "VoucherIssued",
            ContractEvent::VoucherRedeemed { .. } => "VoucherRedeemed",
            ContractEvent::FundsTransferred { .. } => "FundsTransferred",
            ContractEvent::ProofSubmitted { .. } => "ProofSubmitted",
        }
    }
}

/// A contract event together with the transaction that emitted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractLog {
    pub tx_hash: B256,
    pub block_number: u64,
    pub event: ContractEvent,
}

/// Latest known balances of the session account
///
/// Only the newest snapshot is kept; `sequence` orders refreshes so an older
/// read can never replace a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    pub account: Address,
    pub native: U256,
    pub stable: U256,
    pub sequence: u64,
    pub fetched_at: DateTime<Utc>,
}
