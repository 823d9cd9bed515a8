//! Transient user notifications keyed by transaction
//!
//! Each key holds at most one toast. A terminal toast (success or error)
//! replaces the loading toast of the same key, so repeated submissions never
//! collide as long as their hashes differ. Terminal toasts expire once more
//! than the configured number have accumulated, oldest first.

use std::collections::VecDeque;
use std::fmt;

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::pending::DEFAULT_SETTLED_HISTORY;
use crate::observability::CorrelationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToastState {
    Loading,
    Success,
    Error,
}

impl ToastState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ToastState::Loading)
    }
}

/// Toast identity: the transaction hash, or the request id when the failure
/// happened before the wallet returned a hash
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToastKey {
    Transaction(B256),
    Request(CorrelationId),
}

impl fmt::Display for ToastKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToastKey::Transaction(hash) => write!(f, "{hash}"),
            ToastKey::Request(id) => write!(f, "request:{}", id.short()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Toast {
    pub state: ToastState,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NotificationCenter {
    toasts: DashMap<ToastKey, Toast>,
    terminal: Mutex<VecDeque<ToastKey>>,
    capacity: usize,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SETTLED_HISTORY)
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` terminal toasts
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            toasts: DashMap::new(),
            terminal: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn loading(&self, key: ToastKey, message: impl Into<String>) {
        self.show(key, ToastState::Loading, message.into());
    }

    pub fn success(&self, key: ToastKey, message: impl Into<String>) {
        self.show(key, ToastState::Success, message.into());
    }

    pub fn error(&self, key: ToastKey, message: impl Into<String>) {
        self.show(key, ToastState::Error, message.into());
    }

    fn show(&self, key: ToastKey, state: ToastState, message: String) {
        tracing::debug!(key = %key, state = ?state, message = %message, "Notification");
        let previous = self.toasts.insert(
            key.clone(),
            Toast {
                state,
                message,
                updated_at: Utc::now(),
            },
        );
        let already_terminal = previous.is_some_and(|t| t.state.is_terminal());
        if state.is_terminal() && !already_terminal {
            self.expire_terminal(key);
        }
    }

    fn expire_terminal(&self, key: ToastKey) {
        let expired: Vec<ToastKey> = {
            let mut terminal = self.terminal.lock();
            terminal.push_back(key);
            let excess = terminal.len().saturating_sub(self.capacity);
            terminal.drain(..excess).collect()
        };
        for old in expired {
            self.toasts.remove_if(&old, |_, t| t.state.is_terminal());
        }
    }

    pub fn get(&self, key: &ToastKey) -> Option<Toast> {
        self.toasts.get(key).map(|t| t.value().clone())
    }

    /// Remove a toast once the UI has displayed it
    pub fn dismiss(&self, key: &ToastKey) -> Option<Toast> {
        self.terminal.lock().retain(|k| k != key);
        self.toasts.remove(key).map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.toasts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toasts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_toast_replaces_loading() {
        let center = NotificationCenter::new();
        let key = ToastKey::Transaction(B256::repeat_byte(1));
        center.loading(key.clone(), "Create zone pending");
        center.success(key.clone(), "Create zone confirmed");

        let toast = center.get(&key).unwrap();
        assert_eq!(toast.state, ToastState::Success);
        assert_eq!(center.len(), 1);
    }

    #[test]
    fn test_distinct_hashes_do_not_collide() {
        let center = NotificationCenter::new();
        center.loading(ToastKey::Transaction(B256::repeat_byte(1)), "a");
        center.loading(ToastKey::Transaction(B256::repeat_byte(2)), "b");
        center.error(ToastKey::Request(CorrelationId::new()), "c");
        assert_eq!(center.len(), 3);

        let dismissed = center.dismiss(&ToastKey::Transaction(B256::repeat_byte(1)));
        assert!(dismissed.is_some());
        assert_eq!(center.len(), 2);
    }

    #[test]
    fn test_old_terminal_toasts_expire() {
        let center = NotificationCenter::with_capacity(2);
        let keys: Vec<ToastKey> = (1..=3u8)
            .map(|b| ToastKey::Transaction(B256::repeat_byte(b)))
            .collect();
        let loading = ToastKey::Transaction(B256::repeat_byte(0xff));
        center.loading(loading.clone(), "Donate pending");

        for key in &keys {
            center.loading(key.clone(), "Transfer pending");
            center.success(key.clone(), "Transfer confirmed");
        }

        assert_eq!(center.len(), 3);
        assert!(center.get(&keys[0]).is_none());
        assert_eq!(center.get(&keys[2]).unwrap().state, ToastState::Success);
        assert_eq!(center.get(&loading).unwrap().state, ToastState::Loading);
    }
}
