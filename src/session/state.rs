//! Connection state machine
//!
//! `transition` is pure: it takes the current state and an event and returns
//! the next state. IO (prompts, role probes, marker writes) lives in
//! [`super::manager::SessionManager`], which feeds the results back in as
//! events.
//!
//! ```text
//! Disconnected --ConnectRequested--> Connecting
//! Connecting   --Established-------> Connected
//! Connecting   --Failed------------> Disconnected
//! Connected    --AccountsChanged---> Connecting
//! Connected    --ChainChanged------> Connecting
//! any          --DisconnectRequested-> Disconnected
//! ```

use std::sync::Arc;

use alloy_primitives::Address;

use super::roles::{Authorization, Role};
use crate::observability::CorrelationId;
use crate::provider::WalletProvider;

/// A live wallet connection
#[derive(Debug, Clone)]
pub struct Session {
    pub account: Address,
    pub chain_id: u64,
    pub signer: Arc<dyn WalletProvider>,
    pub authorization: Authorization,
    pub context_id: CorrelationId,
}

impl Session {
    pub fn role(&self) -> Role {
        self.authorization.role()
    }
}

#[derive(Debug, Clone, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected(Session),
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    ConnectRequested,
    Established(Session),
    Failed(String),
    AccountsChanged,
    ChainChanged,
    DisconnectRequested,
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::ConnectRequested => "connect_requested",
            ConnectionEvent::Established(_) => "established",
            ConnectionEvent::Failed(_) => "failed",
            ConnectionEvent::AccountsChanged => "accounts_changed",
            ConnectionEvent::ChainChanged => "chain_changed",
            ConnectionEvent::DisconnectRequested => "disconnect_requested",
        }
    }
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected(_) => "connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            ConnectionState::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// Role in effect; guest unless connected
    pub fn role(&self) -> Role {
        self.session().map_or(Role::Guest, Session::role)
    }

    /// Next state for `event`; events that do not apply leave the state as is
    pub fn transition(self, event: ConnectionEvent) -> ConnectionState {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (_, E::DisconnectRequested) => S::Disconnected,
            (S::Disconnected, E::ConnectRequested) => S::Connecting,
            (S::Connecting, E::Established(session)) => S::Connected(session),
            (S::Connecting, E::Failed(_)) => S::Disconnected,
            (S::Connected(_), E::AccountsChanged | E::ChainChanged) => S::Connecting,
            (state, _) => state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::sim::SimulatedChain;
    use alloy_primitives::address;

    fn session() -> Session {
        Session {
            account: address!("00000000000000000000000000000000000a11ce"),
            chain_id: 31337,
            signer: Arc::new(SimulatedChain::new()),
            authorization: Role::Vendor.into(),
            context_id: CorrelationId::new(),
        }
    }

    #[test]
    fn test_happy_path() {
        let state = ConnectionState::default()
            .transition(ConnectionEvent::ConnectRequested)
            .transition(ConnectionEvent::Established(session()));
        assert!(state.is_connected());
        assert_eq!(state.role(), Role::Vendor);
    }

    #[test]
    fn test_failure_returns_to_disconnected() {
        let state = ConnectionState::Connecting.transition(ConnectionEvent::Failed(
            "user rejected the transaction".into(),
        ));
        assert!(matches!(state, ConnectionState::Disconnected));
        assert_eq!(state.role(), Role::Guest);
    }

    #[test]
    fn test_account_change_reenters_connecting() {
        let state = ConnectionState::Connected(session());
        let state = state.transition(ConnectionEvent::AccountsChanged);
        assert!(matches!(state, ConnectionState::Connecting));

        let state = ConnectionState::Connected(session());
        assert!(matches!(
            state.transition(ConnectionEvent::ChainChanged),
            ConnectionState::Connecting
        ));
    }

    #[test]
    fn test_late_establish_after_disconnect_is_ignored() {
        let state = ConnectionState::Connecting
            .transition(ConnectionEvent::DisconnectRequested)
            .transition(ConnectionEvent::Established(session()));
        assert!(matches!(state, ConnectionState::Disconnected));
    }

    #[test]
    fn test_wallet_events_while_disconnected_are_ignored() {
        let state = ConnectionState::Disconnected.transition(ConnectionEvent::AccountsChanged);
        assert!(matches!(state, ConnectionState::Disconnected));
    }
}
