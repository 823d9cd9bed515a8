use thiserror::Error;

/// EIP-1193 code for a request the user declined in the wallet
pub const CODE_USER_REJECTED: i64 = 4001;
/// HTTP-style rate limit code forwarded by hosted nodes
pub const CODE_RATE_LIMITED: i64 = 429;
/// JSON-RPC "limit exceeded" code
pub const CODE_LIMIT_EXCEEDED: i64 = -32005;
/// JSON-RPC code returned for `execution reverted`
pub const CODE_EXECUTION_REVERTED: i64 = 3;

/// Error returned by any wallet, node or contract call
///
/// Providers differ in how they report failures: some use numeric JSON-RPC
/// codes, some symbolic codes (`ACTION_REJECTED`, `CALL_EXCEPTION`), some only
/// a message. All three are carried so classification can use whichever is
/// present.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Numeric JSON-RPC or EIP-1193 code
    pub code: Option<i64>,
    /// Symbolic error code reported by the wallet library
    pub symbol: Option<String>,
    /// Raw message
    pub message: String,
    /// Decoded revert reason, when the node returned revert data
    pub revert_reason: Option<String>,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            symbol: None,
            message: message.into(),
            revert_reason: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_revert_reason(mut self, reason: impl Into<String>) -> Self {
        self.revert_reason = Some(reason.into());
        self
    }

    pub fn rate_limited() -> Self {
        Self::new("Too Many Requests: rate limit exceeded").with_code(CODE_RATE_LIMITED)
    }

    pub fn user_rejected() -> Self {
        Self::new("user rejected transaction")
            .with_code(CODE_USER_REJECTED)
            .with_symbol("ACTION_REJECTED")
    }

    /// Contract revert, optionally with a decoded reason
    pub fn reverted(reason: Option<&str>) -> Self {
        let err = Self::new(match reason {
            Some(r) => format!("execution reverted: {r}"),
            None => "execution reverted".to_string(),
        })
        .with_code(CODE_EXECUTION_REVERTED)
        .with_symbol("CALL_EXCEPTION");
        match reason {
            Some(r) => err.with_revert_reason(r),
            None => err,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(message).with_symbol("NETWORK_ERROR")
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(message).with_symbol("TIMEOUT")
    }

    /// Whether the symbolic code equals `symbol` (case-insensitive)
    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbol
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case(symbol))
    }

    /// Lowercased message, for substring classification
    pub fn message_lower(&self) -> String {
        self.message.to_lowercase()
    }

    /// Whether the contract itself rejected the call
    pub fn is_revert(&self) -> bool {
        self.revert_reason.is_some()
            || self.code == Some(CODE_EXECUTION_REVERTED)
            || self.has_symbol("CALL_EXCEPTION")
    }

    /// Rate-limit errors are the only ones the retry helper recovers from
    ///
    /// Reverts never count, whatever their reason text says.
    pub fn is_rate_limited(&self) -> bool {
        if self.is_revert() {
            return false;
        }
        if matches!(self.code, Some(CODE_RATE_LIMITED) | Some(CODE_LIMIT_EXCEEDED)) {
            return true;
        }
        let msg = self.message_lower();
        msg.contains("rate limit")
            || msg.contains("too many requests")
            || msg.contains("request limit")
            || msg.contains("status 429")
            || msg.contains("status code 429")
    }
}

/// Result alias for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        assert!(ProviderError::rate_limited().is_rate_limited());
        assert!(ProviderError::new("x").with_code(CODE_LIMIT_EXCEEDED).is_rate_limited());
        assert!(ProviderError::new("Your app has exceeded its compute units per second capacity: rate limit").is_rate_limited());
        assert!(ProviderError::new("HTTP status 429").is_rate_limited());

        assert!(!ProviderError::user_rejected().is_rate_limited());
        assert!(!ProviderError::reverted(Some("Unauthorized")).is_rate_limited());
        assert!(!ProviderError::new("zone 429 not found").is_rate_limited());
    }

    #[test]
    fn test_revert_mentioning_limits_is_not_rate_limited() {
        assert!(!ProviderError::reverted(Some("Zone 429 is closed")).is_rate_limited());
        assert!(!ProviderError::reverted(Some("Daily rate limit reached")).is_rate_limited());
        assert!(!ProviderError::new("request limit exceeded for voucher")
            .with_revert_reason("VoucherLimit")
            .is_rate_limited());
        assert!(!ProviderError::new("execution reverted: too many requests")
            .with_code(CODE_EXECUTION_REVERTED)
            .is_rate_limited());
    }

    #[test]
    fn test_reverted_carries_reason() {
        let err = ProviderError::reverted(Some("InsufficientFunding"));
        assert_eq!(err.revert_reason.as_deref(), Some("InsufficientFunding"));
        assert_eq!(err.to_string(), "execution reverted: InsufficientFunding");
        assert!(err.has_symbol("call_exception"));

        let bare = ProviderError::reverted(None);
        assert!(bare.revert_reason.is_none());
    }
}
