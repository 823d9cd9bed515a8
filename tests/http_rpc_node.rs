//! Integration tests for the JSON-RPC node client
//!
//! This test validates:
//! - Balance, head and fee-market reads against a mocked node
//! - Pre-London nodes yield legacy fee data only
//! - HTTP 429 maps to a rate-limit error the retry helper recovers from
//! - JSON-RPC errors carry decoded revert reasons into normalization

use std::time::Duration;

use alloy_primitives::{address, Address, U256};
use mockito::{Matcher, Server};
use relief_orchestrator::provider::http::HttpRpcNode;
use relief_orchestrator::provider::ChainReader;
use relief_orchestrator::rpc_manager::{retry_with_backoff, RetryConfig};
use relief_orchestrator::tx_builder::{normalize, ErrorKind};
use serde_json::json;

const ALICE: Address = address!("00000000000000000000000000000000000a11ce");
const TOKEN: Address = address!("e7f1725e7734ce288f8367e1bb143e90bb3f0512");

fn node(server: &Server) -> HttpRpcNode {
    HttpRpcNode::new(&server.url(), Duration::from_secs(5)).unwrap()
}

fn method(name: &str) -> Matcher {
    Matcher::PartialJson(json!({ "method": name }))
}

fn result(value: serde_json::Value) -> String {
    json!({ "jsonrpc": "2.0", "id": 1, "result": value }).to_string()
}

fn encode_error_string(reason: &str) -> String {
    let mut data = vec![0x08, 0xc3, 0x79, 0xa0];
    data.extend_from_slice(&U256::from(32u64).to_be_bytes::<32>());
    data.extend_from_slice(&U256::from(reason.len()).to_be_bytes::<32>());
    let mut text = reason.as_bytes().to_vec();
    text.resize(reason.len().div_ceil(32) * 32, 0);
    data.extend_from_slice(&text);
    format!("0x{}", hex::encode(data))
}

#[tokio::test]
async fn test_native_balance_and_head() {
    let mut server = Server::new_async().await;
    let balance = server
        .mock("POST", "/")
        .match_body(method("eth_getBalance"))
        .with_header("content-type", "application/json")
        .with_body(result(json!("0xde0b6b3a7640000")))
        .create_async()
        .await;
    let head = server
        .mock("POST", "/")
        .match_body(method("eth_blockNumber"))
        .with_header("content-type", "application/json")
        .with_body(result(json!("0x1b4")))
        .create_async()
        .await;

    let node = node(&server);
    assert_eq!(
        node.native_balance(ALICE).await.unwrap(),
        U256::from(1_000_000_000_000_000_000u64)
    );
    assert_eq!(node.block_number().await.unwrap(), 436);

    balance.assert_async().await;
    head.assert_async().await;
}

#[tokio::test]
async fn test_fee_data_on_london_node() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .match_body(method("eth_getBlockByNumber"))
        .with_header("content-type", "application/json")
        .with_body(result(json!({ "number": "0x10", "baseFeePerGas": "0x3b9aca00" })))
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(method("eth_gasPrice"))
        .with_header("content-type", "application/json")
        .with_body(result(json!("0x77359400")))
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(method("eth_maxPriorityFeePerGas"))
        .with_header("content-type", "application/json")
        .with_body(result(json!("0x59682f00")))
        .create_async()
        .await;

    let fee = node(&server).fee_data().await.unwrap();
    assert_eq!(fee.base_fee_per_gas, Some(1_000_000_000));
    assert_eq!(fee.gas_price, Some(2_000_000_000));
    assert_eq!(fee.max_priority_fee_per_gas, Some(1_500_000_000));
    assert_eq!(fee.max_fee_per_gas, None);
}

#[tokio::test]
async fn test_fee_data_on_legacy_node() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .match_body(method("eth_getBlockByNumber"))
        .with_header("content-type", "application/json")
        .with_body(result(json!({ "number": "0x10" })))
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(method("eth_gasPrice"))
        .with_header("content-type", "application/json")
        .with_body(result(json!("0x4a817c800")))
        .create_async()
        .await;
    let priority = server
        .mock("POST", "/")
        .match_body(method("eth_maxPriorityFeePerGas"))
        .expect(0)
        .create_async()
        .await;

    let fee = node(&server).fee_data().await.unwrap();
    assert_eq!(fee.base_fee_per_gas, None);
    assert_eq!(fee.max_priority_fee_per_gas, None);
    assert_eq!(fee.gas_price, Some(20_000_000_000));
    priority.assert_async().await;
}

#[tokio::test]
async fn test_http_429_is_rate_limited_and_retried() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("POST", "/")
        .match_body(method("eth_chainId"))
        .with_status(429)
        .expect(3)
        .create_async()
        .await;

    let node = node(&server);
    let config = RetryConfig {
        max_retries: 2,
        base_delay_ms: 1,
        backoff_factor: 2.0,
        max_delay_ms: 10,
    };
    let err = retry_with_backoff("chain_id", &config, || node.chain_id())
        .await
        .unwrap_err();

    assert!(err.is_rate_limited());
    limited.assert_async().await;
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let mut server = Server::new_async().await;
    let failing = server
        .mock("POST", "/")
        .with_status(502)
        .expect(1)
        .create_async()
        .await;

    let node = node(&server);
    let err = retry_with_backoff("block_number", &RetryConfig::default(), || {
        node.block_number()
    })
    .await
    .unwrap_err();

    assert!(!err.is_rate_limited());
    assert!(err.message.contains("502"));
    failing.assert_async().await;
}

#[tokio::test]
async fn test_erc20_balance() {
    let mut server = Server::new_async().await;
    let call = server
        .mock("POST", "/")
        .match_body(Matcher::AllOf(vec![
            method("eth_call"),
            Matcher::Regex("0x70a08231".to_string()),
        ]))
        .with_header("content-type", "application/json")
        .with_body(result(json!(format!("0x{:0>64}", "3e8"))))
        .create_async()
        .await;

    let balance = node(&server).erc20_balance(TOKEN, ALICE).await.unwrap();
    assert_eq!(balance, U256::from(1_000u64));
    call.assert_async().await;
}

#[tokio::test]
async fn test_revert_data_reaches_normalizer() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/")
        .match_body(method("eth_call"))
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": {
                    "code": 3,
                    "message": "execution reverted",
                    "data": encode_error_string("Unauthorized")
                }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let err = node(&server).erc20_balance(TOKEN, ALICE).await.unwrap_err();
    assert_eq!(err.code, Some(3));
    assert_eq!(err.revert_reason.as_deref(), Some("Unauthorized"));

    let normalized = normalize(&err);
    assert_eq!(normalized.kind, ErrorKind::Reverted);
    assert_eq!(normalized.message, "reverted by EVM: Unauthorized");
}
