//! Relief orchestrator CLI
//!
//! - **simulation**: runs a donation walkthrough against an in-memory chain
//!   (connect, role resolution, zone funding and voucher issuance) and
//!   keeps the session alive until Ctrl-C
//! - **rpc**: queries a JSON-RPC node for chain id, head and fee market, and
//!   optionally the balances of one account

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relief_orchestrator::config::Config;
use relief_orchestrator::endpoints;
use relief_orchestrator::metrics::metrics;
use relief_orchestrator::provider::http::HttpRpcNode;
use relief_orchestrator::provider::sim::SimulatedChain;
use relief_orchestrator::provider::ChainReader;
use relief_orchestrator::rpc_manager::retry_with_backoff;
use relief_orchestrator::session::{FileMarker, Permission, SessionManager};
use relief_orchestrator::tx_builder::{GasEstimator, TxExecutor, TxLifecycle};
use relief_orchestrator::types::{AccessRole, ContractCall, VendorRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Simulation,
    Rpc,
}

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Operating mode
    #[arg(short, long, value_enum, default_value = "simulation")]
    mode: Mode,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,

    /// Account whose balances the rpc mode reports
    #[arg(long, env = "RELIEF_ACCOUNT")]
    account: Option<Address>,

    /// Exit after the walkthrough instead of waiting for Ctrl-C
    #[arg(long)]
    once: bool,

    /// Metrics port, overriding the config file
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.json)?;

    info!("Starting relief orchestrator {}", env!("CARGO_PKG_VERSION"));
    let config = load_config(&args.config)?;

    if config.monitoring.enable_metrics {
        let port = args.metrics_port.unwrap_or(config.monitoring.metrics_port);
        info!("Starting metrics server on port {}", port);
        tokio::spawn(async move {
            if let Err(e) = endpoints::endpoint_server(port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    match args.mode {
        Mode::Simulation => run_simulation(&config, args.once).await,
        Mode::Rpc => run_rpc(&config, args.account).await,
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "relief_orchestrator=debug,relief=debug,info"
    } else {
        "relief_orchestrator=info,relief=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }
    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        let mut config = Config::default();
        dotenvy::dotenv().ok();
        config
            .apply_env(|name| std::env::var(name).ok())
            .context("Invalid environment override")?;
        config.validate()?;
        Ok(config)
    }
}

async fn run_simulation(config: &Config, once: bool) -> Result<()> {
    let chain = Arc::new(SimulatedChain::new());
    let deployer: Address = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse()?;
    let vendor: Address = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse()?;
    let beneficiary: Address = "0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc".parse()?;

    chain.set_owner(deployer);
    chain.grant_role(AccessRole::Government, deployer);
    chain.set_native_balance(deployer, U256::from(10u64).pow(U256::from(19u64)));
    chain.add_vendor(VendorRecord {
        vendor,
        name: "Corner Pharmacy".to_string(),
        category: "medical".to_string(),
        registered: true,
        verified: false,
    });
    chain.set_wallet_accounts(vec![deployer]);

    let estimator = GasEstimator::new(chain.clone(), config.gas.clone(), config.retry.clone());
    let executor = Arc::new(TxExecutor::new(
        estimator,
        config.tx.clone(),
        config.retry.clone(),
    ));
    let mut lifecycle = executor.subscribe();
    tokio::spawn(async move {
        while let Some(event) = lifecycle.recv().await {
            match event {
                TxLifecycle::Submitted { hash, label } => info!(%hash, %label, "Submitted"),
                TxLifecycle::Mined { hash, label, receipt } => {
                    info!(%hash, %label, block = receipt.block_number, "Mined")
                }
                TxLifecycle::Failed { label, error, .. } => {
                    warn!(%label, error = %error, "Failed")
                }
            }
        }
    });

    let manager = Arc::new(
        SessionManager::new(
            chain.clone(),
            chain.clone(),
            chain.clone(),
            Arc::new(FileMarker::new(&config.session.marker_path)),
            config.retry.clone(),
        )
        .with_config(config.session.clone())
        .with_sync_config(config.sync.clone())
        .with_executor(executor.clone()),
    );
    let wallet_listener = manager.spawn_wallet_listener();

    let session = match manager.silent_reconnect().await? {
        Some(session) => {
            info!(account = %session.account, "Restored previous session");
            session
        }
        None => manager.connect().await?,
    };
    info!(
        account = %session.account,
        role = %session.role(),
        chain_id = session.chain_id,
        "Connected"
    );

    if !session.authorization.can(Permission::CreateZone) {
        warn!(role = %session.role(), "Account cannot manage zones, skipping walkthrough");
    } else {
        let budget = U256::from(5_000u64);
        let zone_receipt = executor
            .execute(
                chain.as_ref(),
                ContractCall::create_zone("Riverside flood", "flood", budget),
                "Create zone",
            )
            .await;
        if let Err(err) = &zone_receipt {
            warn!(error = %err, "Zone creation failed");
        }

        let expiry = chrono::Utc::now().timestamp().max(0) as u64 + 7 * 24 * 3600;
        let steps = vec![
            (ContractCall::donate(1, U256::from(500u64)), "Donate"),
            (ContractCall::verify_vendor(vendor), "Verify vendor"),
            (
                ContractCall::issue_voucher(beneficiary, 1, U256::from(250u64), "medical", expiry),
                "Issue voucher",
            ),
            // Exceeds the remaining budget and reverts
            (
                ContractCall::issue_voucher(beneficiary, 1, U256::from(10_000u64), "food", expiry),
                "Issue oversized voucher",
            ),
        ];
        for (call, label) in steps {
            if let Err(err) = executor.execute(chain.as_ref(), call, label).await {
                warn!(label, error = %err.normalized, "Step failed");
            }
        }
    }

    // Give the synchronizer a moment to settle before reporting
    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Some(balances) = manager.latest_balances() {
        info!(
            account = %balances.account,
            native = %balances.native,
            stable = %balances.stable,
            sequence = balances.sequence,
            "Balances"
        );
    }
    info!(
        in_flight = executor.pending().in_flight().len(),
        notifications = executor.notifications().len(),
        "Walkthrough finished"
    );

    if !once {
        let mut stats_interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = stats_interval.tick() => {
                    let m = metrics();
                    info!(
                        submitted = m.tx_submitted.get(),
                        mined = m.tx_mined.get(),
                        failed = m.tx_failed.get(),
                        refreshes = m.balance_refreshes.get(),
                        "Statistics"
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }
    }

    wallet_listener.abort();
    info!("Shutting down gracefully...");
    Ok(())
}

async fn run_rpc(config: &Config, account: Option<Address>) -> Result<()> {
    let node = HttpRpcNode::new(&config.rpc.url, Duration::from_secs(config.rpc.timeout_secs))?;
    let retry = &config.retry;
    info!(url = node.url(), "Querying node");
    if let Some(address) = config.contract.address {
        info!(%address, "Relief contract");
    }

    let chain_id = retry_with_backoff("chain_id", retry, || node.chain_id()).await?;
    let head = retry_with_backoff("block_number", retry, || node.block_number()).await?;
    let fee = retry_with_backoff("fee_data", retry, || node.fee_data()).await?;
    info!(
        chain_id,
        head,
        base_fee = ?fee.base_fee_per_gas,
        priority_fee = ?fee.max_priority_fee_per_gas,
        gas_price = ?fee.gas_price,
        "Node status"
    );
    if let Some(expected) = config.session.expected_chain_id {
        if expected != chain_id {
            warn!(expected, actual = chain_id, "Node is on an unexpected chain");
        }
    }

    if let Some(account) = account {
        let native = retry_with_backoff("native_balance", retry, || node.native_balance(account))
            .await?;
        info!(%account, %native, "Native balance");
        if let Some(token) = config.contract.stable_token {
            let stable = retry_with_backoff("erc20_balance", retry, || {
                node.erc20_balance(token, account)
            })
            .await?;
            info!(%account, %stable, "Stable balance");
        }
    }
    Ok(())
}
