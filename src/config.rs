//! Configuration module for the relief orchestrator
//!
//! This module handles configuration loading from TOML files, `.env` files
//! and environment variables, and validates the result.

use std::path::Path;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rpc_manager::RetryConfig;
use crate::session::{SessionConfig, SyncConfig};
use crate::tx_builder::{GasConfig, TxConfig};

pub const ENV_RPC_URL: &str = "RELIEF_RPC_URL";
pub const ENV_CONTRACT_ADDRESS: &str = "RELIEF_CONTRACT_ADDRESS";
pub const ENV_EXPECTED_CHAIN_ID: &str = "RELIEF_EXPECTED_CHAIN_ID";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {value}")]
    Env { name: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// JSON-RPC node
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Backoff for rate-limited calls
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub gas: GasConfig,

    #[serde(default)]
    pub tx: TxConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub session: SessionConfig,

    /// Deployed contract addresses
    #[serde(default)]
    pub contract: ContractConfig,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Relief contract
    #[serde(default)]
    pub address: Option<Address>,

    /// Stable token used for vouchers and transfers
    #[serde(default)]
    pub stable_token: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_rpc_url() -> String { "http://127.0.0.1:8545".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_metrics_port() -> u16 { 9090 }
fn default_true() -> bool { true }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut config: Config = toml::from_str(&std::fs::read_to_string(path)?)?;
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps variable names to values
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc.url = url;
        }
        if let Some(value) = lookup(ENV_CONTRACT_ADDRESS) {
            let address = value.parse().map_err(|_| ConfigError::Env {
                name: ENV_CONTRACT_ADDRESS,
                value: value.clone(),
            })?;
            self.contract.address = Some(address);
        }
        if let Some(value) = lookup(ENV_EXPECTED_CHAIN_ID) {
            let chain_id = value.parse().map_err(|_| ConfigError::Env {
                name: ENV_EXPECTED_CHAIN_ID,
                value: value.clone(),
            })?;
            self.session.expected_chain_id = Some(chain_id);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !(self.rpc.url.starts_with("http://") || self.rpc.url.starts_with("https://")) {
            return invalid(format!("rpc.url must be an http(s) URL, got {}", self.rpc.url));
        }
        if self.rpc.timeout_secs == 0 {
            return invalid("rpc.timeout_secs must be positive".into());
        }
        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return invalid(format!(
                "retry.backoff_factor must be >= 1.0, got {}",
                self.retry.backoff_factor
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return invalid("retry.max_delay_ms must be >= retry.base_delay_ms".into());
        }
        if self.gas.margin_percent > 200 {
            return invalid(format!(
                "gas.margin_percent must be at most 200, got {}",
                self.gas.margin_percent
            ));
        }
        if self.tx.confirmations == 0 {
            return invalid("tx.confirmations must be at least 1".into());
        }
        if self.tx.receipt_timeout_secs == Some(0) {
            return invalid("tx.receipt_timeout_secs must be positive when set".into());
        }
        if self.tx.settled_history == 0 {
            return invalid("tx.settled_history must be at least 1".into());
        }
        if self.sync.poll_interval_secs == 0 {
            return invalid("sync.poll_interval_secs must be positive".into());
        }
        Ok(())
    }
}
