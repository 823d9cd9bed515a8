//! In-memory chain implementing every provider trait
//!
//! Used by the test suite and the CLI's `simulation` mode. Writes are mined
//! instantly: `send` applies the method's effect, stores a receipt and emits
//! the contract events. Faults can be injected per operation name (see the
//! `OP_*` constants).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{address, Address, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    ChainReader, ProviderError, ProviderResult, ReliefContract, WalletEvent, WalletProvider,
};
use crate::types::{
    AccessRole, ContractCall, ContractEvent, ContractLog, FeeData, TxOverrides, TxReceipt,
    VendorRecord, Voucher, Zone,
};

pub const OP_REQUEST_ACCOUNTS: &str = "request_accounts";
pub const OP_AUTHORIZED_ACCOUNTS: &str = "authorized_accounts";
pub const OP_CHAIN_ID: &str = "chain_id";
pub const OP_NATIVE_BALANCE: &str = "native_balance";
pub const OP_FEE_DATA: &str = "fee_data";
pub const OP_BLOCK_NUMBER: &str = "block_number";
pub const OP_OWNER: &str = "owner";
pub const OP_HAS_ROLE: &str = "has_role";
pub const OP_VENDOR: &str = "vendor";
pub const OP_VOUCHERS_OF: &str = "vouchers_of";
pub const OP_ZONE: &str = "zone";
pub const OP_STABLE_BALANCE: &str = "stable_balance";
pub const OP_ESTIMATE_GAS: &str = "estimate_gas";
pub const OP_SEND: &str = "send";
pub const OP_WAIT_FOR_RECEIPT: &str = "wait_for_receipt";

const CONTRACT_ADDRESS: Address = address!("5fbdb2315678afecb367f032d93f642f64180aa3");
const DEFAULT_OWNER: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

#[derive(Debug, Clone, Default)]
struct Faults {
    rate_limits: HashMap<&'static str, u32>,
    failing: HashMap<&'static str, ProviderError>,
    reject_connect: bool,
    revert_on_mine: bool,
    /// Gas limit the wallet fills in when no override is given
    default_gas_limit: Option<u64>,
    receipt_delay: Option<Duration>,
    /// Latency added after a read has captured its result
    read_delays: HashMap<&'static str, Duration>,
}

#[derive(Debug, Clone)]
struct SimState {
    chain_id: u64,
    owner: Address,
    access_roles: HashMap<AccessRole, HashSet<Address>>,
    vendors: HashMap<Address, VendorRecord>,
    vouchers: Vec<Voucher>,
    zones: BTreeMap<u64, Zone>,
    native: HashMap<Address, U256>,
    stable: HashMap<Address, U256>,
    wallet_accounts: Vec<Address>,
    authorized: Vec<Address>,
    fee: FeeData,
    block: u64,
    receipts: HashMap<B256, TxReceipt>,
    sent: Vec<(ContractCall, TxOverrides)>,
    calls: HashMap<&'static str, u32>,
    prompts: u32,
    faults: Faults,
    next_zone_id: u64,
    next_voucher_id: u64,
}

impl SimState {
    fn new() -> Self {
        Self {
            chain_id: 31337,
            owner: DEFAULT_OWNER,
            access_roles: HashMap::new(),
            vendors: HashMap::new(),
            vouchers: Vec::new(),
            zones: BTreeMap::new(),
            native: HashMap::new(),
            stable: HashMap::new(),
            wallet_accounts: Vec::new(),
            authorized: Vec::new(),
            fee: FeeData {
                base_fee_per_gas: Some(1_000_000_000),
                max_fee_per_gas: None,
                max_priority_fee_per_gas: Some(1_500_000_000),
                gas_price: Some(2_000_000_000),
            },
            block: 1,
            receipts: HashMap::new(),
            sent: Vec::new(),
            calls: HashMap::new(),
            prompts: 0,
            faults: Faults {
                default_gas_limit: Some(300_000),
                ..Faults::default()
            },
            next_zone_id: 1,
            next_voucher_id: 1,
        }
    }

    /// Count the call and apply any injected fault for `op`
    fn enter(&mut self, op: &'static str) -> ProviderResult<()> {
        *self.calls.entry(op).or_default() += 1;
        if let Some(remaining) = self.faults.rate_limits.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ProviderError::rate_limited());
            }
        }
        match self.faults.failing.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn signer(&self) -> ProviderResult<Address> {
        self.authorized.first().copied().ok_or_else(|| {
            ProviderError::new("the requested account has not been authorized by the user")
                .with_code(4100)
        })
    }

    fn is_manager(&self, account: Address) -> bool {
        account == self.owner
            || [AccessRole::Admin, AccessRole::Government]
                .iter()
                .any(|r| self.has_role(*r, account))
    }

    fn has_role(&self, role: AccessRole, account: Address) -> bool {
        self.access_roles
            .get(&role)
            .is_some_and(|members| members.contains(&account))
    }

    /// Apply the effect of `call` sent by `from`
    ///
    /// May leave partial changes behind on revert; callers run it on a copy.
    fn apply(&mut self, from: Address, call: &ContractCall) -> ProviderResult<Vec<ContractEvent>> {
        if !call.value.is_zero() {
            let balance = self.native.get(&from).copied().unwrap_or_default();
            if balance < call.value {
                return Err(ProviderError::new(
                    "insufficient funds for gas * price + value",
                )
                .with_symbol("INSUFFICIENT_FUNDS"));
            }
        }

        let mut events = Vec::new();
        match call.method.as_str() {
            "createZone" => {
                if !self.is_manager(from) {
                    return Err(ProviderError::reverted(Some("Unauthorized")));
                }
                let id = self.next_zone_id;
                self.next_zone_id += 1;
                self.zones.insert(
                    id,
                    Zone {
                        id,
                        name: arg_str(call, 0)?.to_string(),
                        category: arg_str(call, 1)?.to_string(),
                        budget: arg_u256(call, 2)?,
                        spent: U256::ZERO,
                        active: true,
                        created_by: from,
                    },
                );
                events.push(ContractEvent::ZoneCreated {
                    zone_id: id,
                    creator: from,
                });
            }
            "registerVendor" => {
                if self.vendors.get(&from).is_some_and(|v| v.registered) {
                    return Err(ProviderError::reverted(Some("AlreadyRegistered")));
                }
                self.vendors.insert(
                    from,
                    VendorRecord {
                        vendor: from,
                        name: arg_str(call, 0)?.to_string(),
                        category: arg_str(call, 1)?.to_string(),
                        registered: true,
                        verified: false,
                    },
                );
            }
            "verifyVendor" => {
                if !self.is_manager(from) {
                    return Err(ProviderError::reverted(Some("Unauthorized")));
                }
                let vendor = arg_address(call, 0)?;
                match self.vendors.get_mut(&vendor) {
                    Some(record) => record.verified = true,
                    None => return Err(ProviderError::reverted(Some("VendorNotFound"))),
                }
            }
            "issueVoucher" => {
                let beneficiary = arg_address(call, 0)?;
                let zone_id = arg_u64(call, 1)?;
                let amount = arg_u256(call, 2)?;
                let zone = self
                    .zones
                    .get_mut(&zone_id)
                    .filter(|z| z.active)
                    .ok_or_else(|| ProviderError::reverted(Some("ZoneInactive")))?;
                if zone.budget.saturating_sub(zone.spent) < amount {
                    return Err(ProviderError::reverted(Some("InsufficientFunding")));
                }
                zone.spent += amount;
                let id = self.next_voucher_id;
                self.next_voucher_id += 1;
                self.vouchers.push(Voucher {
                    id,
                    beneficiary,
                    zone_id,
                    amount,
                    category: arg_str(call, 3)?.to_string(),
                    expiry: arg_u64(call, 4)?,
                    redeemed: false,
                });
                events.push(ContractEvent::VoucherIssued {
                    voucher_id: id,
                    beneficiary,
                    amount,
                });
            }
            "redeemVoucher" => {
                if !self.vendors.get(&from).is_some_and(|v| v.verified) {
                    return Err(ProviderError::reverted(Some("VendorNotVerified")));
                }
                let voucher_id = arg_u64(call, 0)?;
                let now = unix_now();
                let voucher = self
                    .vouchers
                    .iter_mut()
                    .find(|v| v.id == voucher_id)
                    .ok_or_else(|| ProviderError::reverted(Some("VoucherNotFound")))?;
                if voucher.redeemed {
                    return Err(ProviderError::reverted(Some("AlreadyRedeemed")));
                }
                if voucher.expiry <= now {
                    return Err(ProviderError::reverted(Some("VoucherExpired")));
                }
                voucher.redeemed = true;
                let (beneficiary, amount) = (voucher.beneficiary, voucher.amount);
                *self.stable.entry(from).or_default() += amount;
                events.push(ContractEvent::VoucherRedeemed {
                    voucher_id,
                    beneficiary,
                    vendor: from,
                    amount,
                });
            }
            "transferFunds" => {
                let to = arg_address(call, 0)?;
                let amount = arg_u256(call, 1)?;
                let balance = self.stable.get(&from).copied().unwrap_or_default();
                if balance < amount {
                    return Err(ProviderError::reverted(Some("InsufficientBalance")));
                }
                self.stable.insert(from, balance - amount);
                *self.stable.entry(to).or_default() += amount;
                events.push(ContractEvent::FundsTransferred { from, to, amount });
            }
            "donate" => {
                let zone_id = arg_u64(call, 0)?;
                let zone = self
                    .zones
                    .get_mut(&zone_id)
                    .ok_or_else(|| ProviderError::reverted(Some("ZoneNotFound")))?;
                zone.budget += call.value;
                events.push(ContractEvent::FundsTransferred {
                    from,
                    to: CONTRACT_ADDRESS,
                    amount: call.value,
                });
            }
            "submitProof" => {
                let zone_id = arg_u64(call, 0)?;
                if !self.zones.contains_key(&zone_id) {
                    return Err(ProviderError::reverted(Some("ZoneNotFound")));
                }
                events.push(ContractEvent::ProofSubmitted {
                    zone_id,
                    oracle: from,
                });
            }
            _ => {}
        }

        if !call.value.is_zero() {
            if let Some(balance) = self.native.get_mut(&from) {
                *balance -= call.value;
            }
        }
        Ok(events)
    }
}

fn base_gas(method: &str) -> u64 {
    match method {
        "createZone" => 180_000,
        "issueVoucher" => 150_000,
        "registerVendor" => 120_000,
        "redeemVoucher" => 110_000,
        "submitProof" => 90_000,
        "donate" => 70_000,
        "transferFunds" => 65_000,
        "verifyVendor" => 60_000,
        _ => 50_000,
    }
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn invalid_arg(call: &ContractCall, index: usize) -> ProviderError {
    ProviderError::new(format!("invalid argument {index} for {}", call.method))
        .with_symbol("INVALID_ARGUMENT")
}

fn arg(call: &ContractCall, index: usize) -> ProviderResult<&Value> {
    call.args.get(index).ok_or_else(|| invalid_arg(call, index))
}

fn arg_str(call: &ContractCall, index: usize) -> ProviderResult<&str> {
    arg(call, index)?
        .as_str()
        .ok_or_else(|| invalid_arg(call, index))
}

fn arg_u64(call: &ContractCall, index: usize) -> ProviderResult<u64> {
    let value = arg(call, index)?;
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| invalid_arg(call, index))
}

fn arg_u256(call: &ContractCall, index: usize) -> ProviderResult<U256> {
    let value = arg(call, index)?;
    match value {
        Value::String(s) => U256::from_str(s).map_err(|_| invalid_arg(call, index)),
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| invalid_arg(call, index)),
        _ => Err(invalid_arg(call, index)),
    }
}

fn arg_address(call: &ContractCall, index: usize) -> ProviderResult<Address> {
    Address::from_str(arg_str(call, index)?).map_err(|_| invalid_arg(call, index))
}

/// Simulated wallet, node and relief contract in one
#[derive(Debug)]
pub struct SimulatedChain {
    state: Mutex<SimState>,
    wallet_events: broadcast::Sender<WalletEvent>,
    contract_events: broadcast::Sender<ContractLog>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    pub fn new() -> Self {
        let (wallet_events, _) = broadcast::channel(64);
        let (contract_events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(SimState::new()),
            wallet_events,
            contract_events,
        }
    }

    // ---- chain state -------------------------------------------------------

    pub fn set_owner(&self, owner: Address) {
        self.state.lock().owner = owner;
    }

    pub fn grant_role(&self, role: AccessRole, account: Address) {
        self.state
            .lock()
            .access_roles
            .entry(role)
            .or_default()
            .insert(account);
    }

    pub fn add_vendor(&self, record: VendorRecord) {
        self.state.lock().vendors.insert(record.vendor, record);
    }

    /// Insert a zone directly; returns its id
    pub fn add_zone(&self, name: &str, budget: U256) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_zone_id;
        state.next_zone_id += 1;
        let owner = state.owner;
        state.zones.insert(
            id,
            Zone {
                id,
                name: name.to_string(),
                category: "general".to_string(),
                budget,
                spent: U256::ZERO,
                active: true,
                created_by: owner,
            },
        );
        id
    }

    /// Insert a voucher directly; the `id` field is assigned here
    pub fn add_voucher(&self, mut voucher: Voucher) -> u64 {
        let mut state = self.state.lock();
        voucher.id = state.next_voucher_id;
        state.next_voucher_id += 1;
        let id = voucher.id;
        state.vouchers.push(voucher);
        id
    }

    pub fn set_native_balance(&self, account: Address, amount: U256) {
        self.state.lock().native.insert(account, amount);
    }

    pub fn set_stable_balance(&self, account: Address, amount: U256) {
        self.state.lock().stable.insert(account, amount);
    }

    pub fn set_fee_data(&self, fee: FeeData) {
        self.state.lock().fee = fee;
    }

    /// Broadcast a contract event from an unrelated transaction, without
    /// any state change
    pub fn emit_event(&self, event: ContractEvent) -> B256 {
        let tx_hash = B256::from(rand::random::<[u8; 32]>());
        let block_number = self.state.lock().block;
        let _ = self.contract_events.send(ContractLog {
            tx_hash,
            block_number,
            event,
        });
        tx_hash
    }

    // ---- wallet ------------------------------------------------------------

    /// Accounts the wallet holds and would expose after a prompt
    pub fn set_wallet_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().wallet_accounts = accounts;
    }

    /// Accounts already authorized for this origin
    pub fn authorize(&self, accounts: Vec<Address>) {
        self.state.lock().authorized = accounts;
    }

    /// User switched accounts inside the wallet
    pub fn change_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().authorized = accounts.clone();
        let _ = self
            .wallet_events
            .send(WalletEvent::AccountsChanged(accounts));
    }

    pub fn switch_chain(&self, chain_id: u64) {
        self.state.lock().chain_id = chain_id;
        let _ = self.wallet_events.send(WalletEvent::ChainChanged(chain_id));
    }

    pub fn disconnect_wallet(&self) {
        self.state.lock().authorized.clear();
        let _ = self.wallet_events.send(WalletEvent::Disconnected);
    }

    // ---- faults ------------------------------------------------------------

    /// Fail the next `times` calls of `op` with a rate-limit error
    pub fn rate_limit(&self, op: &'static str, times: u32) {
        self.state.lock().faults.rate_limits.insert(op, times);
    }

    /// Fail every call of `op` with `err` until cleared
    pub fn fail(&self, op: &'static str, err: ProviderError) {
        self.state.lock().faults.failing.insert(op, err);
    }

    pub fn clear_fault(&self, op: &'static str) {
        let mut state = self.state.lock();
        state.faults.failing.remove(op);
        state.faults.rate_limits.remove(op);
    }

    pub fn reject_connect(&self, reject: bool) {
        self.state.lock().faults.reject_connect = reject;
    }

    /// Mine subsequent writes with a failed status
    pub fn revert_on_mine(&self, revert: bool) {
        self.state.lock().faults.revert_on_mine = revert;
    }

    pub fn set_default_gas_limit(&self, limit: Option<u64>) {
        self.state.lock().faults.default_gas_limit = limit;
    }

    pub fn set_receipt_delay(&self, delay: Option<Duration>) {
        self.state.lock().faults.receipt_delay = delay;
    }

    /// Delay `op` after it has read its result, so the data it returns can
    /// go stale while in flight
    pub fn set_read_delay(&self, op: &'static str, delay: Option<Duration>) {
        let mut state = self.state.lock();
        match delay {
            Some(delay) => state.faults.read_delays.insert(op, delay),
            None => state.faults.read_delays.remove(op),
        };
    }

    // ---- inspection --------------------------------------------------------

    pub fn call_count(&self, op: &str) -> u32 {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Number of wallet prompts shown
    pub fn prompt_count(&self) -> u32 {
        self.state.lock().prompts
    }

    /// Every successfully sent write with the overrides it carried
    pub fn sent(&self) -> Vec<(ContractCall, TxOverrides)> {
        self.state.lock().sent.clone()
    }

    pub fn vouchers(&self) -> Vec<Voucher> {
        self.state.lock().vouchers.clone()
    }
}

#[async_trait]
impl WalletProvider for SimulatedChain {
    async fn request_accounts(&self) -> ProviderResult<Vec<Address>> {
        let mut state = self.state.lock();
        state.enter(OP_REQUEST_ACCOUNTS)?;
        state.prompts += 1;
        if state.faults.reject_connect {
            return Err(ProviderError::user_rejected());
        }
        state.authorized = state.wallet_accounts.clone();
        Ok(state.authorized.clone())
    }

    async fn authorized_accounts(&self) -> ProviderResult<Vec<Address>> {
        let mut state = self.state.lock();
        state.enter(OP_AUTHORIZED_ACCOUNTS)?;
        Ok(state.authorized.clone())
    }

    async fn chain_id(&self) -> ProviderResult<u64> {
        let mut state = self.state.lock();
        state.enter(OP_CHAIN_ID)?;
        Ok(state.chain_id)
    }

    fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.wallet_events.subscribe()
    }
}

#[async_trait]
impl ChainReader for SimulatedChain {
    async fn native_balance(&self, account: Address) -> ProviderResult<U256> {
        let mut state = self.state.lock();
        state.enter(OP_NATIVE_BALANCE)?;
        Ok(state.native.get(&account).copied().unwrap_or_default())
    }

    async fn fee_data(&self) -> ProviderResult<FeeData> {
        let mut state = self.state.lock();
        state.enter(OP_FEE_DATA)?;
        Ok(state.fee)
    }

    async fn block_number(&self) -> ProviderResult<u64> {
        let mut state = self.state.lock();
        state.enter(OP_BLOCK_NUMBER)?;
        Ok(state.block)
    }
}

#[async_trait]
impl ReliefContract for SimulatedChain {
    fn address(&self) -> Address {
        CONTRACT_ADDRESS
    }

    async fn owner(&self) -> ProviderResult<Address> {
        let mut state = self.state.lock();
        state.enter(OP_OWNER)?;
        Ok(state.owner)
    }

    async fn has_role(&self, role: AccessRole, account: Address) -> ProviderResult<bool> {
        let mut state = self.state.lock();
        state.enter(OP_HAS_ROLE)?;
        Ok(state.has_role(role, account))
    }

    async fn vendor(&self, account: Address) -> ProviderResult<Option<VendorRecord>> {
        let mut state = self.state.lock();
        state.enter(OP_VENDOR)?;
        Ok(state.vendors.get(&account).cloned())
    }

    async fn vouchers_of(&self, account: Address) -> ProviderResult<Vec<Voucher>> {
        let (vouchers, delay) = {
            let mut state = self.state.lock();
            state.enter(OP_VOUCHERS_OF)?;
            let vouchers: Vec<Voucher> = state
                .vouchers
                .iter()
                .filter(|v| v.beneficiary == account)
                .cloned()
                .collect();
            (vouchers, state.faults.read_delays.get(OP_VOUCHERS_OF).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(vouchers)
    }

    async fn zone(&self, zone_id: u64) -> ProviderResult<Option<Zone>> {
        let (zone, delay) = {
            let mut state = self.state.lock();
            state.enter(OP_ZONE)?;
            (
                state.zones.get(&zone_id).cloned(),
                state.faults.read_delays.get(OP_ZONE).copied(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(zone)
    }

    async fn stable_balance(&self, account: Address) -> ProviderResult<U256> {
        let mut state = self.state.lock();
        state.enter(OP_STABLE_BALANCE)?;
        Ok(state.stable.get(&account).copied().unwrap_or_default())
    }

    async fn estimate_gas(&self, call: &ContractCall) -> ProviderResult<u64> {
        let mut state = self.state.lock();
        state.enter(OP_ESTIMATE_GAS)?;
        let from = state.signer()?;
        // Dry run on a scratch copy so reverting calls fail estimation
        let mut scratch = state.clone();
        scratch.apply(from, call)?;
        Ok(base_gas(&call.method))
    }

    async fn send(&self, call: &ContractCall, overrides: &TxOverrides) -> ProviderResult<B256> {
        let (hash, block_number, events) = {
            let mut state = self.state.lock();
            state.enter(OP_SEND)?;
            let from = state.signer()?;
            let gas_limit = overrides
                .gas_limit
                .or(state.faults.default_gas_limit)
                .ok_or_else(|| {
                    ProviderError::new("gas required exceeds allowance (0)").with_code(-32000)
                })?;
            let needed = base_gas(&call.method);
            if gas_limit < needed {
                return Err(ProviderError::new(format!(
                    "out of gas: gas required exceeds allowance ({gas_limit})"
                )));
            }

            let mut next = state.clone();
            let events = next.apply(from, call)?;
            *state = next;

            let hash = B256::from(rand::random::<[u8; 32]>());
            state.block += 1;
            let receipt = TxReceipt {
                hash,
                block_number: state.block,
                gas_used: needed,
                status: !state.faults.revert_on_mine,
                effective_gas_price: overrides.max_fee_per_gas.or(overrides.gas_price),
            };
            state.receipts.insert(hash, receipt);
            state.sent.push((call.clone(), *overrides));
            (hash, state.block, events)
        };

        for event in events {
            let _ = self.contract_events.send(ContractLog {
                tx_hash: hash,
                block_number,
                event,
            });
        }
        Ok(hash)
    }

    async fn wait_for_receipt(&self, hash: B256, _confirmations: u64) -> ProviderResult<TxReceipt> {
        let delay = {
            let mut state = self.state.lock();
            state.enter(OP_WAIT_FOR_RECEIPT)?;
            state.faults.receipt_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .receipts
            .get(&hash)
            .cloned()
            .ok_or_else(|| ProviderError::new(format!("transaction {hash} not found")))
    }

    fn events(&self) -> broadcast::Receiver<ContractLog> {
        self.contract_events.subscribe()
    }
}
