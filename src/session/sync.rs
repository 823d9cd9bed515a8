//! Session balance and read-model synchronizer
//!
//! One listener task per session consumes contract logs, executor lifecycle
//! events and a polling ticker, and refreshes the account's balances. Each
//! transaction hash triggers at most one refresh, whether its log or its
//! `Mined` event arrives first. Refreshes are numbered; a snapshot is only
//! published if it is newer than the one already held.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::metrics::metrics;
use crate::provider::{ChainReader, ProviderResult, ReliefContract};
use crate::rpc_manager::{retry_with_backoff, RetryConfig};
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::TxLifecycle;
use crate::types::{BalanceSnapshot, ContractLog, Voucher, Zone};

const SEEN_TX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic refresh interval
    pub poll_interval_secs: u64,
    /// Delay before retrying a failed refresh
    pub retry_delay_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            retry_delay_secs: 5,
        }
    }
}

/// Why a refresh ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Started,
    TxMined(B256),
    Event(&'static str),
    Lagged,
    Poll,
    Retry,
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshTrigger::Started => "started",
            RefreshTrigger::TxMined(_) => "tx_mined",
            RefreshTrigger::Event(name) => *name,
            RefreshTrigger::Lagged => "lagged",
            RefreshTrigger::Poll => "poll",
            RefreshTrigger::Retry => "retry",
            RefreshTrigger::Manual => "manual",
        }
    }
}

/// Vouchers of the session account, fetched on demand
///
/// A fetch that overlaps an invalidation does not populate the cache.
#[derive(Debug, Default)]
pub struct VoucherCache {
    entries: RwLock<Option<Vec<Voucher>>>,
    generation: AtomicU64,
}

impl VoucherCache {
    pub async fn get(
        &self,
        contract: &dyn ReliefContract,
        account: Address,
        retry: &RetryConfig,
    ) -> ProviderResult<Vec<Voucher>> {
        let cached = self.entries.read().clone();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let vouchers =
            retry_with_backoff("vouchers_of", retry, || contract.vouchers_of(account)).await?;
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::SeqCst) == generation {
            *entries = Some(vouchers.clone());
        }
        Ok(vouchers)
    }

    pub fn invalidate(&self) {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *entries = None;
    }

    pub fn is_cached(&self) -> bool {
        self.entries.read().is_some()
    }
}

/// Zone records, fetched on demand
#[derive(Debug, Default)]
pub struct ZoneCache {
    entries: DashMap<u64, Zone>,
    generation: AtomicU64,
}

impl ZoneCache {
    pub async fn get(
        &self,
        contract: &dyn ReliefContract,
        zone_id: u64,
        retry: &RetryConfig,
    ) -> ProviderResult<Option<Zone>> {
        let cached = self.entries.get(&zone_id).map(|z| z.value().clone());
        if cached.is_some() {
            return Ok(cached);
        }
        let generation = self.generation.load(Ordering::SeqCst);
        let zone = retry_with_backoff("zone", retry, || contract.zone(zone_id)).await?;
        if let Some(zone) = &zone {
            if let Entry::Vacant(slot) = self.entries.entry(zone_id) {
                if self.generation.load(Ordering::SeqCst) == generation {
                    slot.insert(zone.clone());
                }
            }
        }
        Ok(zone)
    }

    pub fn invalidate(&self, zone_id: u64) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(&zone_id);
    }

    pub fn is_cached(&self, zone_id: u64) -> bool {
        self.entries.contains_key(&zone_id)
    }
}

struct SyncInner {
    account: Address,
    reader: Arc<dyn ChainReader>,
    contract: Arc<dyn ReliefContract>,
    config: SyncConfig,
    retry: RetryConfig,
    sequence: AtomicU64,
    refreshes: AtomicU64,
    snapshot: watch::Sender<Option<BalanceSnapshot>>,
    vouchers: VoucherCache,
    zones: ZoneCache,
    seen_txs: Mutex<VecDeque<B256>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    logger: StructuredLogger,
}

impl SyncInner {
    /// Record `hash`; false if it already triggered a refresh
    fn mark_seen(&self, hash: B256) -> bool {
        let mut seen = self.seen_txs.lock();
        if seen.contains(&hash) {
            return false;
        }
        seen.push_back(hash);
        if seen.len() > SEEN_TX_CAPACITY {
            seen.pop_front();
        }
        true
    }

    async fn refresh(&self, trigger: RefreshTrigger) -> bool {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        metrics().balance_refreshes.inc();

        let account = self.account;
        let native = retry_with_backoff("native_balance", &self.retry, || {
            self.reader.native_balance(account)
        })
        .await;
        let stable = retry_with_backoff("stable_balance", &self.retry, || {
            self.contract.stable_balance(account)
        })
        .await;

        match (native, stable) {
            (Ok(native), Ok(stable)) => {
                self.publish(BalanceSnapshot {
                    account,
                    native,
                    stable,
                    sequence,
                    fetched_at: Utc::now(),
                });
                self.logger.log_refresh(account, sequence, trigger.as_str());
                true
            }
            (Err(err), _) | (_, Err(err)) => {
                metrics().balance_refresh_failures.inc();
                warn!(
                    account = %account,
                    sequence,
                    trigger = trigger.as_str(),
                    error = %err,
                    "Balance refresh failed"
                );
                false
            }
        }
    }

    /// Publish unless a newer snapshot is already held
    fn publish(&self, snapshot: BalanceSnapshot) -> bool {
        let sequence = snapshot.sequence;
        let accepted = self.snapshot.send_if_modified(|current| match current {
            Some(existing) if existing.sequence >= sequence => false,
            _ => {
                *current = Some(snapshot);
                true
            }
        });
        if !accepted {
            metrics().stale_snapshots_dropped.inc();
            debug!(sequence, "Dropped stale balance snapshot");
        }
        accepted
    }

    /// Refresh; on failure schedule a single delayed retry
    async fn refresh_or_schedule(self: &Arc<Self>, trigger: RefreshTrigger) {
        if self.refresh(trigger).await {
            return;
        }
        let inner = Arc::clone(self);
        let delay = Duration::from_secs(self.config.retry_delay_secs);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // A failed retry waits for the next trigger or poll
            inner.refresh(RefreshTrigger::Retry).await;
        });
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    async fn on_log(self: &Arc<Self>, log: ContractLog) {
        if let Some(zone_id) = log.event.zone_id() {
            self.zones.invalidate(zone_id);
        }
        if !log.event.involves(self.account) {
            return;
        }
        if log.event.is_voucher_event() {
            self.vouchers.invalidate();
        }
        if self.mark_seen(log.tx_hash) {
            self.refresh_or_schedule(RefreshTrigger::Event(log.event.name()))
                .await;
        }
    }

    async fn on_lifecycle(self: &Arc<Self>, event: TxLifecycle) {
        if let TxLifecycle::Mined { hash, .. } = event {
            if self.mark_seen(hash) {
                self.refresh_or_schedule(RefreshTrigger::TxMined(hash)).await;
            }
        }
    }
}

async fn next_lifecycle(
    lifecycle: &mut Option<mpsc::UnboundedReceiver<TxLifecycle>>,
) -> Option<TxLifecycle> {
    match lifecycle {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn listen(
    inner: Arc<SyncInner>,
    mut logs: broadcast::Receiver<ContractLog>,
    mut lifecycle: Option<mpsc::UnboundedReceiver<TxLifecycle>>,
) {
    inner.refresh_or_schedule(RefreshTrigger::Started).await;

    let period = Duration::from_secs(inner.config.poll_interval_secs.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut lifecycle_open = lifecycle.is_some();

    loop {
        tokio::select! {
            log = logs.recv() => match log {
                Ok(log) => inner.on_log(log).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Contract log stream lagged, refreshing");
                    inner.vouchers.invalidate();
                    inner.refresh_or_schedule(RefreshTrigger::Lagged).await;
                }
                Err(RecvError::Closed) => {
                    debug!("Contract log stream closed");
                    break;
                }
            },
            event = next_lifecycle(&mut lifecycle), if lifecycle_open => match event {
                Some(event) => inner.on_lifecycle(event).await,
                None => lifecycle_open = false,
            },
            _ = ticker.tick() => inner.refresh_or_schedule(RefreshTrigger::Poll).await,
        }
    }
}

pub struct BalanceSynchronizer {
    inner: Arc<SyncInner>,
}

impl BalanceSynchronizer {
    pub fn new(
        account: Address,
        reader: Arc<dyn ChainReader>,
        contract: Arc<dyn ReliefContract>,
        config: SyncConfig,
        retry: RetryConfig,
        logger: StructuredLogger,
    ) -> Self {
        let (snapshot, _) = watch::channel(None);
        Self {
            inner: Arc::new(SyncInner {
                account,
                reader,
                contract,
                config,
                retry,
                sequence: AtomicU64::new(0),
                refreshes: AtomicU64::new(0),
                snapshot,
                vouchers: VoucherCache::default(),
                zones: ZoneCache::default(),
                seen_txs: Mutex::new(VecDeque::new()),
                tasks: Mutex::new(Vec::new()),
                logger,
            }),
        }
    }

    pub fn account(&self) -> Address {
        self.inner.account
    }

    /// Spawn the listener; restarts it if already running
    ///
    /// The initial refresh runs inside the listener task.
    pub fn start(&self, lifecycle: Option<mpsc::UnboundedReceiver<TxLifecycle>>) {
        self.stop();
        // Subscribe before spawning so no log between here and the first poll is lost
        let logs = self.inner.contract.events();
        let handle = tokio::spawn(listen(Arc::clone(&self.inner), logs, lifecycle));
        self.inner.tasks.lock().push(handle);
    }

    /// Abort the listener and any pending delayed retry
    pub fn stop(&self) {
        let handles: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for handle in handles {
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.tasks.lock().iter().any(|t| !t.is_finished())
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<BalanceSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    pub fn latest(&self) -> Option<BalanceSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    /// Refresh now; returns whether a snapshot was fetched
    pub async fn refresh(&self) -> bool {
        self.inner.refresh(RefreshTrigger::Manual).await
    }

    /// Number of refreshes started so far
    pub fn refresh_count(&self) -> u64 {
        self.inner.refreshes.load(Ordering::SeqCst)
    }

    pub async fn vouchers(&self) -> ProviderResult<Vec<Voucher>> {
        self.inner
            .vouchers
            .get(
                self.inner.contract.as_ref(),
                self.inner.account,
                &self.inner.retry,
            )
            .await
    }

    pub fn vouchers_cached(&self) -> bool {
        self.inner.vouchers.is_cached()
    }

    pub async fn zone(&self, zone_id: u64) -> ProviderResult<Option<Zone>> {
        self.inner
            .zones
            .get(self.inner.contract.as_ref(), zone_id, &self.inner.retry)
            .await
    }

    pub fn zone_cached(&self, zone_id: u64) -> bool {
        self.inner.zones.is_cached(zone_id)
    }
}

impl Drop for BalanceSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::sim::{SimulatedChain, OP_NATIVE_BALANCE, OP_VOUCHERS_OF, OP_ZONE};
    use crate::provider::ProviderError;
    use crate::types::ContractEvent;
    use alloy_primitives::{address, U256};

    const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
    const BOB: Address = address!("0000000000000000000000000000000000000b0b");

    fn synchronizer(chain: &Arc<SimulatedChain>) -> BalanceSynchronizer {
        BalanceSynchronizer::new(
            ALICE,
            chain.clone(),
            chain.clone(),
            SyncConfig::default(),
            RetryConfig::none(),
            StructuredLogger::default(),
        )
    }

    fn snapshot(sequence: u64, native: u64) -> BalanceSnapshot {
        BalanceSnapshot {
            account: ALICE,
            native: U256::from(native),
            stable: U256::ZERO,
            sequence,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_older_snapshot_never_replaces_newer() {
        let chain = Arc::new(SimulatedChain::new());
        let sync = synchronizer(&chain);
        assert!(sync.inner.publish(snapshot(2, 200)));
        assert!(!sync.inner.publish(snapshot(1, 100)));
        assert_eq!(sync.latest().unwrap().native, U256::from(200u64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_refresh_and_event_refresh() {
        let chain = Arc::new(SimulatedChain::new());
        chain.set_native_balance(ALICE, U256::from(5u64));
        let sync = synchronizer(&chain);
        let mut rx = sync.subscribe();
        sync.start(None);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().native, U256::from(5u64));

        chain.set_native_balance(ALICE, U256::from(9u64));
        chain.emit_event(ContractEvent::FundsTransferred {
            from: BOB,
            to: ALICE,
            amount: U256::from(4u64),
        });
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().unwrap().native, U256::from(9u64));
        assert_eq!(sync.refresh_count(), 2);
        sync.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_events_are_ignored() {
        let chain = Arc::new(SimulatedChain::new());
        let sync = synchronizer(&chain);
        let mut rx = sync.subscribe();
        sync.start(None);
        rx.changed().await.unwrap();

        chain.emit_event(ContractEvent::FundsTransferred {
            from: BOB,
            to: BOB,
            amount: U256::from(1u64),
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.refresh_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_retries_after_delay() {
        let chain = Arc::new(SimulatedChain::new());
        chain.fail(OP_NATIVE_BALANCE, ProviderError::transport("connection reset"));
        let sync = synchronizer(&chain);
        let mut rx = sync.subscribe();
        sync.start(None);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sync.refresh_count(), 1);
        assert!(sync.latest().is_none());

        chain.clear_fault(OP_NATIVE_BALANCE);
        rx.changed().await.unwrap();
        assert_eq!(sync.refresh_count(), 2);
        assert!(sync.latest().is_some());
    }

    #[tokio::test]
    async fn test_voucher_cache_invalidated_by_voucher_event() {
        let chain = Arc::new(SimulatedChain::new());
        let sync = synchronizer(&chain);
        assert!(sync.vouchers().await.unwrap().is_empty());
        assert!(sync.vouchers_cached());
        sync.vouchers().await.unwrap();
        assert_eq!(chain.call_count(OP_VOUCHERS_OF), 1);

        sync.inner
            .on_log(ContractLog {
                tx_hash: B256::repeat_byte(7),
                block_number: 2,
                event: ContractEvent::VoucherIssued {
                    voucher_id: 1,
                    beneficiary: ALICE,
                    amount: U256::from(10u64),
                },
            })
            .await;
        assert!(!sync.vouchers_cached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_fetch_is_not_overwritten() {
        let chain = Arc::new(SimulatedChain::new());
        chain.set_read_delay(OP_VOUCHERS_OF, Some(Duration::from_millis(100)));
        let sync = synchronizer(&chain);

        let (stale, ()) = tokio::join!(sync.vouchers(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            chain.add_voucher(Voucher {
                id: 0,
                beneficiary: ALICE,
                zone_id: 1,
                amount: U256::from(10u64),
                category: "food".to_string(),
                expiry: u64::MAX,
                redeemed: false,
            });
            sync.inner.vouchers.invalidate();
        });

        assert!(stale.unwrap().is_empty());
        assert!(!sync.vouchers_cached());

        chain.set_read_delay(OP_VOUCHERS_OF, None);
        assert_eq!(sync.vouchers().await.unwrap().len(), 1);
        assert!(sync.vouchers_cached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zone_invalidated_during_fetch_stays_uncached() {
        let chain = Arc::new(SimulatedChain::new());
        let zone_id = chain.add_zone("Coastal flood", U256::from(1_000u64));
        chain.set_read_delay(OP_ZONE, Some(Duration::from_millis(100)));
        let sync = synchronizer(&chain);

        let (zone, ()) = tokio::join!(sync.zone(zone_id), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            sync.inner.zones.invalidate(zone_id);
        });

        assert!(zone.unwrap().is_some());
        assert!(!sync.zone_cached(zone_id));
    }

    #[tokio::test]
    async fn test_stop_aborts_listener() {
        let chain = Arc::new(SimulatedChain::new());
        let sync = synchronizer(&chain);
        sync.start(None);
        assert!(sync.is_running());
        sync.stop();
        assert!(!sync.is_running());
    }
}
