//! Integration tests for the session lifecycle
//!
//! This test validates:
//! - Silent reconnect never prompts and is gated on the connection marker
//! - Account and chain changes re-run role resolution
//! - Wallet disconnects tear the session down and clear the marker
//! - The file marker carries a session across manager instances

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{address, Address};
use relief_orchestrator::provider::sim::{
    SimulatedChain, OP_AUTHORIZED_ACCOUNTS, OP_CHAIN_ID, OP_REQUEST_ACCOUNTS,
};
use relief_orchestrator::provider::{ProviderError, WalletEvent};
use relief_orchestrator::rpc_manager::RetryConfig;
use relief_orchestrator::session::{
    ConnectionMarker, ConnectionState, FileMarker, MemoryMarker, Role, SessionConfig,
    SessionError, SessionManager,
};
use relief_orchestrator::types::AccessRole;

const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
const BOB: Address = address!("0000000000000000000000000000000000000b0b");

fn manager(chain: &Arc<SimulatedChain>, marker: Arc<dyn ConnectionMarker>) -> SessionManager {
    SessionManager::new(
        chain.clone(),
        chain.clone(),
        chain.clone(),
        marker,
        RetryConfig::none(),
    )
}

#[tokio::test]
async fn test_silent_reconnect_without_authorized_accounts() {
    let chain = Arc::new(SimulatedChain::new());
    chain.set_wallet_accounts(vec![ALICE]);
    let marker = Arc::new(MemoryMarker::new(true));
    let manager = manager(&chain, marker.clone());

    let restored = manager.silent_reconnect().await.unwrap();

    assert!(restored.is_none());
    assert!(matches!(manager.state(), ConnectionState::Disconnected));
    assert_eq!(chain.prompt_count(), 0);
    assert_eq!(chain.call_count(OP_REQUEST_ACCOUNTS), 0);
    assert!(!marker.was_connected().await);
}

#[tokio::test]
async fn test_silent_reconnect_skipped_without_marker() {
    let chain = Arc::new(SimulatedChain::new());
    chain.authorize(vec![ALICE]);
    let manager = manager(&chain, Arc::new(MemoryMarker::default()));

    assert!(manager.silent_reconnect().await.unwrap().is_none());
    assert_eq!(chain.call_count(OP_AUTHORIZED_ACCOUNTS), 0);
    assert!(!manager.state().is_connected());
}

#[tokio::test]
async fn test_silent_reconnect_restores_authorized_account() {
    let chain = Arc::new(SimulatedChain::new());
    chain.authorize(vec![ALICE]);
    chain.grant_role(AccessRole::Oracle, ALICE);
    let manager = manager(&chain, Arc::new(MemoryMarker::new(true)));

    let session = manager.silent_reconnect().await.unwrap().unwrap();

    assert_eq!(session.account, ALICE);
    assert_eq!(session.role(), Role::Oracle);
    assert_eq!(chain.prompt_count(), 0);
    assert!(manager.is_syncing());
}

#[tokio::test]
async fn test_failed_silent_reconnect_clears_marker() {
    let chain = Arc::new(SimulatedChain::new());
    chain.authorize(vec![ALICE]);
    let marker = Arc::new(MemoryMarker::new(true));
    let manager = manager(&chain, marker.clone()).with_config(SessionConfig {
        expected_chain_id: Some(1),
        ..SessionConfig::default()
    });

    let err = manager.silent_reconnect().await.unwrap_err();

    assert!(matches!(
        err,
        SessionError::WrongChain {
            expected: 1,
            actual: 31337
        }
    ));
    assert!(matches!(manager.state(), ConnectionState::Disconnected));
    assert!(!marker.was_connected().await);
    assert_eq!(chain.prompt_count(), 0);
}

#[tokio::test]
async fn test_chain_id_failure_during_silent_reconnect_clears_marker() {
    let chain = Arc::new(SimulatedChain::new());
    chain.authorize(vec![ALICE]);
    chain.fail(OP_CHAIN_ID, ProviderError::transport("connection reset"));
    let marker = Arc::new(MemoryMarker::new(true));
    let manager = manager(&chain, marker.clone());

    assert!(manager.silent_reconnect().await.is_err());
    assert!(!manager.state().is_connected());
    assert!(!marker.was_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_session() {
    let chain = Arc::new(SimulatedChain::new());
    chain.set_wallet_accounts(vec![ALICE]);
    chain.rate_limit(OP_REQUEST_ACCOUNTS, 1);
    let manager = SessionManager::new(
        chain.clone(),
        chain.clone(),
        chain.clone(),
        Arc::new(MemoryMarker::default()),
        RetryConfig {
            max_retries: 2,
            base_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 1_000,
        },
    );

    let (first, second) = tokio::join!(manager.connect(), manager.connect());

    let session = first.unwrap();
    assert!(matches!(second, Err(SessionError::ConnectInProgress)));
    assert_eq!(manager.session().unwrap().context_id, session.context_id);
    assert_eq!(chain.call_count(OP_REQUEST_ACCOUNTS), 2);

    // Once connected, later calls return the stored session
    let again = manager.connect().await.unwrap();
    assert_eq!(again.context_id, session.context_id);
}

#[tokio::test]
async fn test_account_change_reresolves_role() {
    let chain = Arc::new(SimulatedChain::new());
    chain.set_wallet_accounts(vec![ALICE]);
    chain.grant_role(AccessRole::Government, BOB);
    let manager = manager(&chain, Arc::new(MemoryMarker::default()));

    let first = manager.connect().await.unwrap();
    assert_eq!(first.role(), Role::Donor);

    chain.change_accounts(vec![BOB]);
    manager
        .handle_wallet_event(WalletEvent::AccountsChanged(vec![BOB]))
        .await
        .unwrap();

    let session = manager.session().unwrap();
    assert_eq!(session.account, BOB);
    assert_eq!(session.role(), Role::Government);
    assert_ne!(session.context_id, first.context_id);
    assert!(manager.is_syncing());

    // Same account again is a no-op
    manager
        .handle_wallet_event(WalletEvent::AccountsChanged(vec![BOB]))
        .await
        .unwrap();
    assert_eq!(manager.session().unwrap().context_id, session.context_id);
}

#[tokio::test]
async fn test_wallet_listener_follows_account_switch() {
    let chain = Arc::new(SimulatedChain::new());
    chain.set_wallet_accounts(vec![ALICE]);
    chain.set_owner(BOB);
    let manager = Arc::new(manager(&chain, Arc::new(MemoryMarker::default())));
    let listener = manager.spawn_wallet_listener();
    let mut states = manager.subscribe_state();

    manager.connect().await.unwrap();
    chain.change_accounts(vec![BOB]);

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let switched = states
                .borrow_and_update()
                .session()
                .is_some_and(|s| s.account == BOB);
            if switched {
                break;
            }
            states.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(manager.authorization().role(), Role::Admin);
    listener.abort();
}

#[tokio::test]
async fn test_chain_change_to_unexpected_network_disconnects() {
    let chain = Arc::new(SimulatedChain::new());
    chain.set_wallet_accounts(vec![ALICE]);
    let manager = manager(&chain, Arc::new(MemoryMarker::default())).with_config(SessionConfig {
        expected_chain_id: Some(31337),
        ..SessionConfig::default()
    });
    manager.connect().await.unwrap();

    chain.switch_chain(5);
    let err = manager
        .handle_wallet_event(WalletEvent::ChainChanged(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SessionError::WrongChain {
            expected: 31337,
            actual: 5
        }
    ));
    assert!(!manager.state().is_connected());
    assert!(!manager.is_syncing());
    assert_eq!(manager.authorization().role(), Role::Guest);
}

#[tokio::test]
async fn test_emptied_accounts_disconnect_and_clear_marker() {
    let chain = Arc::new(SimulatedChain::new());
    chain.set_wallet_accounts(vec![ALICE]);
    let marker = Arc::new(MemoryMarker::default());
    let manager = manager(&chain, marker.clone());
    manager.connect().await.unwrap();
    assert!(marker.was_connected().await);

    manager
        .handle_wallet_event(WalletEvent::AccountsChanged(Vec::new()))
        .await
        .unwrap();

    assert!(matches!(manager.state(), ConnectionState::Disconnected));
    assert!(!marker.was_connected().await);
    assert!(!manager.is_syncing());
}

#[tokio::test]
async fn test_file_marker_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("session.json");
    let chain = Arc::new(SimulatedChain::new());
    chain.set_wallet_accounts(vec![ALICE]);

    {
        let first = manager(&chain, Arc::new(FileMarker::new(&path)));
        first.connect().await.unwrap();
    }
    assert!(path.exists());

    let second = manager(&chain, Arc::new(FileMarker::new(&path)));
    let session = second.silent_reconnect().await.unwrap().unwrap();
    assert_eq!(session.account, ALICE);
    assert_eq!(chain.prompt_count(), 1);

    second.disconnect().await.unwrap();
    assert!(!FileMarker::new(&path).was_connected().await);
}
