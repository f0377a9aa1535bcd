// Copyright (c) 2026 IPFS Storage Contributors. MIT License.
// See LICENSE for details.

//! # IPFS Storage Node
//!
//! Entry point for the `ipfs-storage-node` binary. Parses CLI arguments,
//! initializes logging and metrics, hosts the registry contract, and serves
//! the HTTP/WS API.
//!
//! - `init`       — create the data directory, deployer key and config, deploy
//! - `run`        — serve the API and metrics endpoints
//! - `upload`     — pin a file and record its hash (node stopped)
//! - `files`      — list stored files (node stopped)
//! - `register`   — owner registers an address (node stopped)
//! - `unregister` — owner unregisters an address (node stopped)
//! - `keygen`     — generate an account key file
//! - `status`     — query a running node's status endpoint
//! - `version`    — print build version information

mod api;
mod cli;
mod client;
mod config;
mod deployment;
mod host;
mod logging;
mod metrics;
mod pinning;
mod store;
mod transaction;
mod wallet;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::signal;

use ipfs_storage_contracts::Address;

use cli::{Commands, StorageNodeCli};
use client::StorageClient;
use config::{Network, NodeConfig, CONFIG_FILE_NAME};
use deployment::DEPLOYMENT_FILE_NAME;
use host::ContractHost;
use logging::LogFormat;
use metrics::NodeMetrics;
use pinning::FsPinner;
use store::ChainStore;
use transaction::Call;
use wallet::Wallet;

const DEPLOYER_KEY_FILE: &str = "deployer.key";
const CHAIN_DIR: &str = "chain";
const BLOBS_DIR: &str = "blobs";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StorageNodeCli::parse();

    match cli.command {
        Commands::Init(args) => init_node(args),
        Commands::Run(args) => run_node(args).await,
        Commands::Upload(args) => upload_file(args).await,
        Commands::Files(args) => list_files(args),
        Commands::Register(args) => change_membership(args, true),
        Commands::Unregister(args) => change_membership(args, false),
        Commands::Keygen(args) => generate_key(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Creates the data directory, a deployer key and `config.toml`, then
/// deploys the registry owned by the deployer.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("ipfs_storage_node=info", LogFormat::Pretty);

    let data_dir = &args.data.data_dir;
    let network = Network::from_str(&args.network)?;
    tracing::info!(data_dir = %data_dir.display(), network = %network, "initializing node");

    let host = init_data_dir(data_dir, network, args.force)?;

    println!("Node initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Network        : {} (chain {})", network, network.chain_id());
    println!("  Deployer key   : {}", data_dir.join(DEPLOYER_KEY_FILE).display());
    println!("  Owner          : {}", host.owner());
    println!("  Contract       : {}", host.contract_address());

    Ok(())
}

/// Writes a deployer key and config into `data_dir` and deploys a fresh
/// registry. Refuses to touch a directory that already holds a key or a
/// deployment unless `force` is set, in which case the chain is reset.
fn init_data_dir(data_dir: &Path, network: Network, force: bool) -> Result<ContractHost> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(DEPLOYER_KEY_FILE);
    if key_path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            key_path.display()
        );
    }

    let chain_dir = data_dir.join(CHAIN_DIR);
    if force && chain_dir.exists() {
        std::fs::remove_dir_all(&chain_dir)
            .with_context(|| format!("failed to reset chain store at {}", chain_dir.display()))?;
    }
    let store = open_store(data_dir)?;
    if store.is_deployed()? {
        bail!(
            "a registry is already deployed in {}; pass --force to reset it",
            chain_dir.display()
        );
    }

    let deployer = Wallet::generate();
    deployer
        .save(&key_path)
        .with_context(|| format!("failed to write deployer key to {}", key_path.display()))?;

    let config_path = data_dir.join(CONFIG_FILE_NAME);
    let config = NodeConfig::for_network(network);
    std::fs::write(&config_path, config.to_toml()?)
        .with_context(|| format!("failed to write config to {}", config_path.display()))?;

    let host = ContractHost::deploy(store, network, deployer.address(), chrono::Utc::now())
        .context("failed to deploy registry")?;
    write_deployment_info(data_dir, &host)?;
    Ok(host)
}

/// Starts the node: API server and metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let data_dir = args.data.data_dir.clone();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));
    let mut config = NodeConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    if let Some(network) = &args.network {
        config.network = Network::from_str(network)?;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.rpc_port {
        config.rpc_port = port;
    }
    if let Some(port) = args.metrics_port {
        config.metrics_port = port;
    }
    if let Some(format) = &args.log_format {
        config.log_format = LogFormat::from_str_lossy(format);
    }

    logging::init_logging(&config.log_level, config.log_format);

    tracing::info!(
        network = %config.network,
        rpc_port = config.rpc_port,
        metrics_port = config.metrics_port,
        data_dir = %data_dir.display(),
        "starting ipfs-storage-node"
    );

    // --- Deployer ---
    let key_path = args
        .deployer_key
        .unwrap_or_else(|| data_dir.join(DEPLOYER_KEY_FILE));
    let deployer = Wallet::load(&key_path).with_context(|| {
        format!(
            "failed to load deployer key from {} (run `ipfs-storage-node init` first)",
            key_path.display()
        )
    })?;

    // --- Registry ---
    let store = open_store(&data_dir)?;
    let host = Arc::new(
        ContractHost::open_or_deploy(store, config.network, deployer.address(), chrono::Utc::now())
            .context("failed to start registry host")?,
    );
    write_deployment_info(&data_dir, &host)?;
    if let Some((contract_url, tx_url)) = host.deployment().explorer_links() {
        tracing::info!(contract = %contract_url, deployment = %tx_url, "explorer links");
    }

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    node_metrics.sync_from(&host);

    // --- Pinning ---
    let pinner = FsPinner::open(data_dir.join(BLOBS_DIR)).context("failed to open blob directory")?;

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        host: Arc::clone(&host),
        metrics: Arc::clone(&node_metrics),
        pinner: Arc::new(pinner),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", config.bind_address, config.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", config.bind_address, config.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    host.flush().context("failed to flush chain store")?;
    tracing::info!(height = host.height(), "ipfs-storage-node stopped");
    Ok(())
}

/// Pins a file and records its hash with the given account.
async fn upload_file(args: cli::UploadArgs) -> Result<()> {
    logging::init_logging("ipfs_storage_node=info", LogFormat::Pretty);

    let (config, host) = open_offline(&args.data.data_dir)?;
    let expected = match &args.network {
        Some(name) => Network::from_str(name)?,
        None => config.network,
    };
    let wallet = Wallet::load(&args.key)
        .with_context(|| format!("failed to load key from {}", args.key.display()))?;
    let pinner = FsPinner::open(args.data.data_dir.join(BLOBS_DIR))
        .context("failed to open blob directory")?;

    let file_name = match args.name {
        Some(name) => name,
        None => file_name_of(&args.file)?,
    };
    let data = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    let client = StorageClient::new(Arc::clone(&host), Arc::new(pinner), wallet, expected);
    let outcome = client
        .upload(&file_name, Bytes::from(data))
        .await
        .with_context(|| format!("upload of {} failed", file_name))?;
    host.flush()?;
    let recorded_at = client.latest_file()?.map(|f| f.timestamp);

    let summary = serde_json::json!({
        "cid": outcome.pinned.cid,
        "fileName": outcome.pinned.file_name,
        "size": outcome.pinned.size,
        "txHash": outcome.receipt.tx_hash,
        "blockHeight": outcome.receipt.block_height,
        "timestamp": recorded_at,
        "gatewayUrl": pinning::gateway_url(&config.gateway_url, &outcome.pinned.cid),
        "explorerUrl": host.network().transaction_url(&outcome.receipt.tx_hash),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Prints an address's files, read as the key's account.
fn list_files(args: cli::FilesArgs) -> Result<()> {
    logging::init_logging("ipfs_storage_node=warn", LogFormat::Pretty);

    let (_, host) = open_offline(&args.data.data_dir)?;
    let wallet = Wallet::load(&args.key)
        .with_context(|| format!("failed to load key from {}", args.key.display()))?;
    let target = match &args.address {
        Some(raw) => Address::from_str(raw)?,
        None => wallet.address(),
    };

    let files = host.user_files(wallet.address(), &target)?;
    println!("{}", serde_json::to_string_pretty(&files)?);
    Ok(())
}

/// Registers or unregisters an address with the owner key.
fn change_membership(args: cli::MembershipArgs, register: bool) -> Result<()> {
    logging::init_logging("ipfs_storage_node=info", LogFormat::Pretty);

    let data_dir = &args.data.data_dir;
    let (config, host) = open_offline(data_dir)?;
    let key_path = args
        .key
        .unwrap_or_else(|| data_dir.join(DEPLOYER_KEY_FILE));
    let owner = Wallet::load(&key_path)
        .with_context(|| format!("failed to load key from {}", key_path.display()))?;
    let target = Address::from_str(&args.address)?;

    let pinner = FsPinner::open(data_dir.join(BLOBS_DIR)).context("failed to open blob directory")?;
    let client = StorageClient::new(Arc::clone(&host), Arc::new(pinner), owner, config.network);
    let call = if register {
        Call::RegisterUser { target }
    } else {
        Call::UnregisterUser { target }
    };
    let method = call.name();
    let receipt = client
        .submit(call)
        .with_context(|| format!("{} {} failed", method, target))?;
    host.flush()?;

    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

/// Writes a fresh account key.
fn generate_key(args: cli::KeygenArgs) -> Result<()> {
    if args.out.exists() && !args.force {
        bail!("{} already exists; pass --force to overwrite it", args.out.display());
    }
    let wallet = Wallet::generate();
    wallet
        .save(&args.out)
        .with_context(|| format!("failed to write key to {}", args.out.display()))?;

    println!("Key written to {}", args.out.display());
    println!("  Address    : {}", wallet.address());
    println!("  Public key : {}", wallet.public_key_hex());
    Ok(())
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body = http_get(&url).await?;
    let status: serde_json::Value =
        serde_json::from_str(&body).with_context(|| format!("unexpected reply from {}", url))?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

fn open_store(data_dir: &Path) -> Result<ChainStore> {
    let chain_dir = data_dir.join(CHAIN_DIR);
    ChainStore::open(&chain_dir).with_context(|| {
        format!(
            "failed to open chain store at {} (is the node running?)",
            chain_dir.display()
        )
    })
}

/// Opens an already deployed registry without serving it.
fn open_offline(data_dir: &Path) -> Result<(NodeConfig, Arc<ContractHost>)> {
    let config_path = data_dir.join(CONFIG_FILE_NAME);
    let config = NodeConfig::load_or_default(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    let store = open_store(data_dir)?;
    let Some(host) = ContractHost::open(store, config.network)? else {
        bail!(
            "no registry deployed in {} (run `ipfs-storage-node init` first)",
            data_dir.display()
        );
    };
    Ok((config, Arc::new(host)))
}

fn write_deployment_info(data_dir: &Path, host: &ContractHost) -> Result<()> {
    let path = data_dir.join(DEPLOYMENT_FILE_NAME);
    host.deployment()
        .write_json(&path)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

/// GETs `url` and returns the body. Non-2xx responses are errors.
async fn http_get(url: &str) -> Result<String> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("failed to reach {}", url))?
        .error_for_status()
        .with_context(|| format!("{} answered with an error", url))?;
    Ok(response.text().await?)
}

/// Prints version information to stdout.
fn print_version() {
    println!("ipfs-storage-node {}", env!("CARGO_PKG_VERSION"));
    println!("networks  rsk-testnet (31), rsk-mainnet (30), devnet (33)");
    println!("rustc     {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
