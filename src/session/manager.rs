//! Session lifecycle driver
//!
//! Performs the IO around the pure state machine in [`super::state`]: wallet
//! prompts, role resolution, marker persistence and the per-session balance
//! synchronizer. Roles are resolved on connect, on silent reconnect and when
//! the wallet reports an account or chain change.

use std::path::PathBuf;
use std::sync::Arc;

use alloy_primitives::Address;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::marker::{ConnectionMarker, MarkerError};
use super::resolver::RoleResolver;
use super::roles::Authorization;
use super::state::{ConnectionEvent, ConnectionState, Session};
use super::sync::{BalanceSynchronizer, SyncConfig};
use crate::observability::CorrelationId;
use crate::provider::{ChainReader, ProviderError, ReliefContract, WalletEvent, WalletProvider};
use crate::rpc_manager::{retry_with_backoff, RetryConfig};
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::{normalize, NormalizedError, TxExecutor};
use crate::types::BalanceSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Refuse sessions on any other chain
    pub expected_chain_id: Option<u64>,
    /// Where the "was connected" marker lives
    pub marker_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expected_chain_id: None,
            marker_path: PathBuf::from(".relief/session.json"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("wallet request failed: {0}")]
    Wallet(NormalizedError),

    #[error("wallet returned no accounts")]
    NoAccounts,

    #[error("wrong network: expected chain {expected}, wallet is on {actual}")]
    WrongChain { expected: u64, actual: u64 },

    #[error("connection was superseded by a disconnect")]
    Superseded,

    #[error("another connection attempt is in progress")]
    ConnectInProgress,

    #[error(transparent)]
    Marker(#[from] MarkerError),
}

impl From<ProviderError> for SessionError {
    fn from(err: ProviderError) -> Self {
        SessionError::Wallet(normalize(&err))
    }
}

pub struct SessionManager {
    wallet: Arc<dyn WalletProvider>,
    reader: Arc<dyn ChainReader>,
    contract: Arc<dyn ReliefContract>,
    marker: Arc<dyn ConnectionMarker>,
    resolver: RoleResolver,
    executor: Option<Arc<TxExecutor>>,
    config: SessionConfig,
    sync_config: SyncConfig,
    retry: RetryConfig,
    state: watch::Sender<ConnectionState>,
    synchronizer: Mutex<Option<BalanceSynchronizer>>,
    logger: StructuredLogger,
}

impl SessionManager {
    pub fn new(
        wallet: Arc<dyn WalletProvider>,
        reader: Arc<dyn ChainReader>,
        contract: Arc<dyn ReliefContract>,
        marker: Arc<dyn ConnectionMarker>,
        retry: RetryConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            wallet,
            reader,
            contract,
            marker,
            resolver: RoleResolver::new(retry.clone()),
            executor: None,
            config: SessionConfig::default(),
            sync_config: SyncConfig::default(),
            retry,
            state,
            synchronizer: Mutex::new(None),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_sync_config(mut self, config: SyncConfig) -> Self {
        self.sync_config = config;
        self
    }

    pub fn with_resolver(mut self, resolver: RoleResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Feed this executor's mined transactions into the synchronizer
    pub fn with_executor(mut self, executor: Arc<TxExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session().cloned()
    }

    /// Guest authorization unless connected
    pub fn authorization(&self) -> Authorization {
        self.state
            .borrow()
            .session()
            .map(|s| s.authorization)
            .unwrap_or_default()
    }

    pub fn latest_balances(&self) -> Option<BalanceSnapshot> {
        self.synchronizer.lock().as_ref().and_then(|s| s.latest())
    }

    pub fn balances(&self) -> Option<watch::Receiver<Option<BalanceSnapshot>>> {
        self.synchronizer.lock().as_ref().map(|s| s.subscribe())
    }

    pub fn is_syncing(&self) -> bool {
        self.synchronizer
            .lock()
            .as_ref()
            .is_some_and(|s| s.is_running())
    }

    /// Explicit connect; may prompt the wallet
    pub async fn connect(&self) -> Result<Session, SessionError> {
        if let Some(session) = self.session() {
            return Ok(session);
        }
        if !self.begin_connect() {
            return self.session().ok_or(SessionError::ConnectInProgress);
        }

        let accounts = match retry_with_backoff("request_accounts", &self.retry, || {
            self.wallet.request_accounts()
        })
        .await
        {
            Ok(accounts) => accounts,
            Err(err) => return Err(self.fail(err.into())),
        };
        let Some(account) = accounts.first().copied() else {
            return Err(self.fail(SessionError::NoAccounts));
        };
        self.establish(account).await
    }

    /// Reconnect on startup without prompting
    ///
    /// Only runs when the marker says a previous session existed, and only
    /// with already-authorized accounts. With none available the session
    /// stays disconnected. The marker is cleared whenever the attempt fails.
    pub async fn silent_reconnect(&self) -> Result<Option<Session>, SessionError> {
        if !self.marker.was_connected().await {
            debug!("No connection marker, skipping silent reconnect");
            return Ok(None);
        }
        if !self.begin_connect() {
            debug!("Connection already underway, skipping silent reconnect");
            return Ok(self.session());
        }

        let accounts = match retry_with_backoff("authorized_accounts", &self.retry, || {
            self.wallet.authorized_accounts()
        })
        .await
        {
            Ok(accounts) => accounts,
            Err(err) => {
                let err = self.fail(err.into());
                self.marker.clear().await?;
                return Err(err);
            }
        };

        let Some(account) = accounts.first().copied() else {
            info!("No previously authorized accounts, staying disconnected");
            self.fail(SessionError::NoAccounts);
            self.marker.clear().await?;
            return Ok(None);
        };
        match self.establish(account).await {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                self.marker.clear().await?;
                Err(err)
            }
        }
    }

    /// User-initiated disconnect; stops the synchronizer and clears the marker
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.apply(ConnectionEvent::DisconnectRequested);
        self.stop_sync();
        self.marker.clear().await?;
        Ok(())
    }

    pub async fn handle_wallet_event(&self, event: WalletEvent) -> Result<(), SessionError> {
        let Some(session) = self.session() else {
            debug!(?event, "Wallet event while not connected, ignoring");
            return Ok(());
        };

        match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                None => self.disconnect().await,
                Some(account) if account == session.account => Ok(()),
                Some(account) => {
                    self.apply(ConnectionEvent::AccountsChanged);
                    self.stop_sync();
                    self.establish(account).await.map(|_| ())
                }
            },
            WalletEvent::ChainChanged(chain_id) if chain_id == session.chain_id => Ok(()),
            WalletEvent::ChainChanged(_) => {
                self.apply(ConnectionEvent::ChainChanged);
                self.stop_sync();
                self.establish(session.account).await.map(|_| ())
            }
            WalletEvent::Disconnected => self.disconnect().await,
        }
    }

    /// Forward wallet events to [`Self::handle_wallet_event`] until the
    /// wallet's event stream closes
    pub fn spawn_wallet_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let mut events = self.wallet.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(err) = manager.handle_wallet_event(event).await {
                            warn!(error = %err, "Wallet event handling failed");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Wallet event stream lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Verify the chain, resolve the role and move to `Connected`
    async fn establish(&self, account: Address) -> Result<Session, SessionError> {
        let chain_id =
            match retry_with_backoff("chain_id", &self.retry, || self.wallet.chain_id()).await {
                Ok(id) => id,
                Err(err) => return Err(self.fail(err.into())),
            };
        if let Some(expected) = self.config.expected_chain_id {
            if chain_id != expected {
                return Err(self.fail(SessionError::WrongChain {
                    expected,
                    actual: chain_id,
                }));
            }
        }

        let context_id = CorrelationId::new();
        let logger = StructuredLogger::new(context_id.clone());
        let resolution = self
            .resolver
            .resolve(Some(account), self.contract.as_ref(), &logger)
            .await;

        let session = Session {
            account,
            chain_id,
            signer: Arc::clone(&self.wallet),
            authorization: resolution.authorization,
            context_id,
        };
        let next = self.apply(ConnectionEvent::Established(session.clone()));
        if next.session().map(|s| &s.context_id) != Some(&session.context_id) {
            return Err(SessionError::Superseded);
        }

        if let Err(err) = self.marker.set_connected().await {
            warn!(error = %err, "Cannot persist connection marker");
        }
        self.start_sync(account, logger);
        Ok(session)
    }

    fn start_sync(&self, account: Address, logger: StructuredLogger) {
        let synchronizer = BalanceSynchronizer::new(
            account,
            Arc::clone(&self.reader),
            Arc::clone(&self.contract),
            self.sync_config.clone(),
            self.retry.clone(),
            logger,
        );
        synchronizer.start(self.executor.as_ref().map(|e| e.subscribe()));
        let previous = self.synchronizer.lock().replace(synchronizer);
        drop(previous);
    }

    fn stop_sync(&self) {
        let previous = self.synchronizer.lock().take();
        if let Some(synchronizer) = previous {
            synchronizer.stop();
        }
    }

    /// Claim the `Disconnected -> Connecting` transition; false if another
    /// attempt holds it or a session already exists
    fn begin_connect(&self) -> bool {
        let mut from = "";
        let claimed = self.state.send_if_modified(|state| {
            from = state.name();
            if !matches!(state, ConnectionState::Disconnected) {
                return false;
            }
            *state = std::mem::take(state).transition(ConnectionEvent::ConnectRequested);
            true
        });
        if claimed {
            self.logger
                .log_transition(from, ConnectionState::Connecting.name(), "connect_requested");
        }
        claimed
    }

    /// Record a failed attempt and hand the error back
    fn fail(&self, err: SessionError) -> SessionError {
        warn!(error = %err, "Connection attempt failed");
        self.apply(ConnectionEvent::Failed(err.to_string()));
        err
    }

    fn apply(&self, event: ConnectionEvent) -> ConnectionState {
        let cause = event.name();
        let mut from = "";
        self.state.send_modify(|state| {
            from = state.name();
            *state = std::mem::take(state).transition(event);
        });
        let next = self.state();
        if from != next.name() {
            self.logger.log_transition(from, next.name(), cause);
        }
        next
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_sync();
    }
}
