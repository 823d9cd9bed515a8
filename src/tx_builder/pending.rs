//! In-flight transaction registry
//!
//! A transaction is recorded once the wallet returns its hash and moves
//! forward only: `Submitted -> Mined` or `Submitted -> Failed`. Settled
//! entries are kept in a bounded window, oldest evicted first; in-flight
//! entries are never evicted.

use std::collections::VecDeque;

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::metrics::metrics;
use crate::types::TxOverrides;

pub const DEFAULT_SETTLED_HISTORY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TxStatus {
    Submitted,
    Mined,
    Failed,
}

impl TxStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Submitted)
    }

    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Submitted, TxStatus::Mined) | (TxStatus::Submitted, TxStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingTransaction {
    pub hash: B256,
    pub label: String,
    pub status: TxStatus,
    /// Gas parameters the transaction was submitted with
    pub overrides: TxOverrides,
    pub submitted_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PendingError {
    #[error("unknown transaction {0}")]
    Unknown(B256),

    #[error("transaction {hash} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        hash: B256,
        from: TxStatus,
        to: TxStatus,
    },
}

#[derive(Debug)]
pub struct PendingRegistry {
    entries: DashMap<B256, PendingTransaction>,
    settled: Mutex<VecDeque<B256>>,
    capacity: usize,
}

impl Default for PendingRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_SETTLED_HISTORY)
    }
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` settled transactions
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            settled: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn insert_submitted(&self, hash: B256, label: &str, overrides: TxOverrides) {
        let tx = PendingTransaction {
            hash,
            label: label.to_string(),
            status: TxStatus::Submitted,
            overrides,
            submitted_at: Utc::now(),
            settled_at: None,
        };
        if self.entries.insert(hash, tx).is_none() {
            metrics().pending_transactions.inc();
        }
    }

    /// Move `hash` to a terminal status
    pub fn settle(&self, hash: B256, status: TxStatus) -> Result<(), PendingError> {
        {
            let mut entry = self
                .entries
                .get_mut(&hash)
                .ok_or(PendingError::Unknown(hash))?;
            if !entry.status.can_transition_to(status) {
                return Err(PendingError::InvalidTransition {
                    hash,
                    from: entry.status,
                    to: status,
                });
            }
            entry.status = status;
            entry.settled_at = Some(Utc::now());
        }
        metrics().pending_transactions.dec();
        self.evict_settled(hash);
        Ok(())
    }

    fn evict_settled(&self, hash: B256) {
        let evicted: Vec<B256> = {
            let mut settled = self.settled.lock();
            settled.push_back(hash);
            let excess = settled.len().saturating_sub(self.capacity);
            settled.drain(..excess).collect()
        };
        for old in evicted {
            self.entries
                .remove_if(&old, |_, tx| tx.status.is_terminal());
        }
    }

    pub fn get(&self, hash: &B256) -> Option<PendingTransaction> {
        self.entries.get(hash).map(|e| e.value().clone())
    }

    /// Transactions still waiting for a receipt
    pub fn in_flight(&self) -> Vec<PendingTransaction> {
        self.entries
            .iter()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
