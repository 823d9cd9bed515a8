//! Error types for the transaction pipeline
//!
//! Provider failures are reduced to a small taxonomy before they reach the
//! user. Classification order matters: revert messages can embed text that
//! looks like a rejection or a nonce problem, so the specific causes are
//! checked before the generic revert case.

use std::fmt;

use alloy_primitives::B256;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::provider::errors::CODE_USER_REJECTED;
use crate::provider::ProviderError;

/// User-facing failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    UserRejected,
    InsufficientFunds,
    NonceConflict,
    ReplacementUnderpriced,
    Reverted,
    /// Recovered locally by the retry helper; never surfaced as such
    RateLimited,
    Unknown,
}

impl ErrorKind {
    /// Classify a provider error, most specific cause first
    pub fn classify(err: &ProviderError) -> Self {
        let msg = err.message_lower();

        if err.code == Some(CODE_USER_REJECTED)
            || err.has_symbol("ACTION_REJECTED")
            || msg.contains("user rejected")
            || msg.contains("user denied")
            || msg.contains("rejected by user")
        {
            return ErrorKind::UserRejected;
        }

        if err.has_symbol("INSUFFICIENT_FUNDS") || msg.contains("insufficient funds") {
            return ErrorKind::InsufficientFunds;
        }

        if err.has_symbol("NONCE_EXPIRED")
            || msg.contains("nonce too low")
            || msg.contains("nonce too high")
            || msg.contains("nonce has already been used")
            || msg.contains("invalid nonce")
        {
            return ErrorKind::NonceConflict;
        }

        if err.has_symbol("REPLACEMENT_UNDERPRICED")
            || msg.contains("replacement transaction underpriced")
            || msg.contains("replacement fee too low")
        {
            return ErrorKind::ReplacementUnderpriced;
        }

        if err.is_revert() || msg.contains("reverted")
        {
            return ErrorKind::Reverted;
        }

        if err.is_rate_limited() {
            return ErrorKind::RateLimited;
        }

        ErrorKind::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UserRejected => "user_rejected",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::NonceConflict => "nonce_conflict",
            ErrorKind::ReplacementUnderpriced => "replacement_underpriced",
            ErrorKind::Reverted => "reverted",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// Short human-readable description of a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

static REVERT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"reverted with reason string '([^']+)'",
        r"reverted with custom error '([^'(]+)",
        r#"execution reverted:\s*"?([^"\n]+?)"?\s*$"#,
        r#"reason="([^"]+)""#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static revert pattern"))
    .collect()
});

/// Pull a revert reason out of an error, structured field first
pub fn extract_revert_reason(err: &ProviderError) -> Option<String> {
    if let Some(reason) = err.revert_reason.as_deref().map(str::trim) {
        if !reason.is_empty() {
            return Some(reason.to_string());
        }
    }
    REVERT_PATTERNS
        .iter()
        .find_map(|re| re.captures(&err.message))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Map a provider error to its user-facing message
///
/// A rate limit that reaches this point has already exhausted its retries
/// and is reported as an unknown error with the raw message.
pub fn normalize(err: &ProviderError) -> NormalizedError {
    let kind = ErrorKind::classify(err);
    let message = match kind {
        ErrorKind::UserRejected => "user rejected the transaction".to_string(),
        ErrorKind::InsufficientFunds => "insufficient funds for gas or value".to_string(),
        ErrorKind::NonceConflict => "nonce issue, retry".to_string(),
        ErrorKind::ReplacementUnderpriced => "replacement transaction underpriced".to_string(),
        ErrorKind::Reverted => match extract_revert_reason(err) {
            Some(reason) => format!("reverted by EVM: {reason}"),
            None => "reverted by EVM".to_string(),
        },
        ErrorKind::RateLimited | ErrorKind::Unknown => err.message.clone(),
    };
    let kind = match kind {
        ErrorKind::RateLimited => ErrorKind::Unknown,
        other => other,
    };
    NormalizedError { kind, message }
}

/// Terminal failure of one executor invocation
#[derive(Debug, Clone, Error)]
#[error("{label}: {normalized}")]
pub struct TxError {
    /// Human-readable label the caller gave the transaction
    pub label: String,
    /// Hash, when the failure happened after submission
    pub hash: Option<B256>,
    pub normalized: NormalizedError,
    #[source]
    pub source: ProviderError,
}

impl TxError {
    pub fn new(label: impl Into<String>, hash: Option<B256>, source: ProviderError) -> Self {
        Self {
            label: label.into(),
            hash,
            normalized: normalize(&source),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.normalized.kind
    }
}
