//! JSON-RPC node client
//!
//! Covers the read side the orchestrator needs from a node: balances, fee
//! market and chain head, plus the stable token's `balanceOf`. Writes go
//! through the wallet and are not issued here.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::{ChainReader, ProviderError, ProviderResult};
use crate::types::FeeData;

const JSONRPC_VERSION: &str = "2.0";
/// `Error(string)` selector prefixed to ABI-encoded revert data
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
/// ERC-20 `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "70a08231";

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl From<JsonRpcError> for ProviderError {
    fn from(err: JsonRpcError) -> Self {
        let reason = err
            .data
            .as_ref()
            .and_then(Value::as_str)
            .and_then(decode_revert_data);
        let base = ProviderError::new(err.message).with_code(err.code);
        match reason {
            Some(reason) => base.with_symbol("CALL_EXCEPTION").with_revert_reason(reason),
            None => base,
        }
    }
}

/// Decode `Error(string)` revert data into its message
pub fn decode_revert_data(data: &str) -> Option<String> {
    let bytes = hex::decode(data.trim_start_matches("0x")).ok()?;
    if bytes.len() < 4 + 64 || bytes[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    let body = &bytes[4..];
    let len = U256::from_be_slice(&body[32..64]);
    let len = usize::try_from(len).ok()?;
    let text = body.get(64..64usize.checked_add(len)?)?;
    String::from_utf8(text.to_vec()).ok()
}

fn parse_u256(value: &str) -> ProviderResult<U256> {
    U256::from_str(value)
        .map_err(|e| ProviderError::new(format!("invalid quantity {value}: {e}")))
}

fn parse_u128(value: &str) -> ProviderResult<u128> {
    u128::try_from(parse_u256(value)?)
        .map_err(|_| ProviderError::new(format!("quantity {value} overflows u128")))
}

fn parse_u64(value: &str) -> ProviderResult<u64> {
    u64::try_from(parse_u256(value)?)
        .map_err(|_| ProviderError::new(format!("quantity {value} overflows u64")))
}

/// Read-only JSON-RPC client for an EVM node
#[derive(Debug)]
pub struct HttpRpcNode {
    inner: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpRpcNode {
    pub fn new(url: &str, timeout: Duration) -> ProviderResult<Self> {
        let inner = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::transport(e.to_string()))?;
        Ok(Self {
            inner,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue a raw call and deserialize its result
    pub async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> ProviderResult<R> {
        let payload = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        trace!(method, id = payload.id, "RPC request");

        let response = self
            .inner
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::timeout(e.to_string())
                } else {
                    ProviderError::transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::rate_limited());
        }
        if !status.is_success() {
            return Err(ProviderError::transport(format!("HTTP status {status}")));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::transport(format!("malformed response: {e}")))?;
        if let Some(err) = body.error {
            debug!(method, code = err.code, message = %err.message, "RPC error");
            return Err(err.into());
        }
        let result = body
            .result
            .ok_or_else(|| ProviderError::new(format!("{method}: empty result")))?;
        serde_json::from_value(result)
            .map_err(|e| ProviderError::new(format!("{method}: unexpected result: {e}")))
    }

    pub async fn chain_id(&self) -> ProviderResult<u64> {
        let raw: String = self.call("eth_chainId", json!([])).await?;
        parse_u64(&raw)
    }

    /// ERC-20 `balanceOf(account)` on `token`
    pub async fn erc20_balance(&self, token: Address, account: Address) -> ProviderResult<U256> {
        let data = format!(
            "0x{BALANCE_OF_SELECTOR}{:0>64}",
            hex::encode(account.as_slice())
        );
        let raw: String = self
            .call(
                "eth_call",
                json!([{ "to": token.to_string(), "data": data }, "latest"]),
            )
            .await?;
        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| ProviderError::new(format!("balanceOf: invalid return data: {e}")))?;
        if bytes.len() < 32 {
            return Err(ProviderError::new("balanceOf: short return data"));
        }
        Ok(U256::from_be_slice(&bytes[..32]))
    }
}

#[async_trait]
impl ChainReader for HttpRpcNode {
    async fn native_balance(&self, account: Address) -> ProviderResult<U256> {
        let raw: String = self
            .call("eth_getBalance", json!([account.to_string(), "latest"]))
            .await?;
        parse_u256(&raw)
    }

    async fn fee_data(&self) -> ProviderResult<FeeData> {
        let block: Value = self
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let base_fee_per_gas = block
            .get("baseFeePerGas")
            .and_then(Value::as_str)
            .map(parse_u128)
            .transpose()?;

        let raw_price: String = self.call("eth_gasPrice", json!([])).await?;
        let gas_price = Some(parse_u128(&raw_price)?);

        // Pre-London nodes reject this method
        let max_priority_fee_per_gas = match base_fee_per_gas {
            Some(_) => match self
                .call::<String>("eth_maxPriorityFeePerGas", json!([]))
                .await
            {
                Ok(raw) => Some(parse_u128(&raw)?),
                Err(err) if err.is_rate_limited() => return Err(err),
                Err(err) => {
                    debug!(error = %err, "eth_maxPriorityFeePerGas unsupported");
                    None
                }
            },
            None => None,
        };

        Ok(FeeData {
            base_fee_per_gas,
            max_fee_per_gas: None,
            max_priority_fee_per_gas,
            gas_price,
        })
    }

    async fn block_number(&self) -> ProviderResult<u64> {
        let raw: String = self.call("eth_blockNumber", json!([])).await?;
        parse_u64(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_error_string(reason: &str) -> String {
        let mut data = ERROR_STRING_SELECTOR.to_vec();
        data.extend_from_slice(&U256::from(32u64).to_be_bytes::<32>());
        data.extend_from_slice(&U256::from(reason.len()).to_be_bytes::<32>());
        let mut text = reason.as_bytes().to_vec();
        text.resize(reason.len().div_ceil(32) * 32, 0);
        data.extend_from_slice(&text);
        format!("0x{}", hex::encode(data))
    }

    #[test]
    fn test_decode_revert_data() {
        let data = encode_error_string("InsufficientFunding");
        assert_eq!(
            decode_revert_data(&data).as_deref(),
            Some("InsufficientFunding")
        );
        assert_eq!(decode_revert_data("0x"), None);
        assert_eq!(decode_revert_data("0xdeadbeef"), None);
    }

    #[test]
    fn test_rpc_error_with_revert_data() {
        let err = JsonRpcError {
            code: 3,
            message: "execution reverted".to_string(),
            data: Some(Value::String(encode_error_string("Unauthorized"))),
        };
        let err = ProviderError::from(err);
        assert_eq!(err.code, Some(3));
        assert_eq!(err.revert_reason.as_deref(), Some("Unauthorized"));
        assert!(err.has_symbol("CALL_EXCEPTION"));
    }

    #[test]
    fn test_parse_quantities() {
        assert_eq!(parse_u64("0x1b4").unwrap(), 436);
        assert_eq!(parse_u128("0x3b9aca00").unwrap(), 1_000_000_000);
        assert!(parse_u64("zz").is_err());
    }
}
