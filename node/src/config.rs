//! # Node Configuration
//!
//! Network presets and the on-disk `config.toml` the node reads at
//! startup. Every field has a default, so a missing file or a partial one
//! is fine; CLI flags are applied on top by `main`.
//!
//! ```toml
//! network = "rsk-testnet"
//! bind_address = "0.0.0.0"
//! rpc_port = 8545
//! metrics_port = 9615
//! log_format = "pretty"
//! log_level = "ipfs_storage_node=info,tower_http=info"
//! gateway_url = "https://gateway.pinata.cloud/ipfs/"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::logging::LogFormat;
use crate::pinning::DEFAULT_GATEWAY;

/// Default port for the REST / JSON-RPC API.
pub const DEFAULT_RPC_PORT: u16 = 8545;

/// Default port for the Prometheus endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9615;

/// File name of the configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config file: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("unknown network '{0}' (expected rsk-testnet, rsk-mainnet or devnet)")]
    UnknownNetwork(String),
}

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// The chains a node can be configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    /// Rootstock public testnet.
    RskTestnet,
    /// Rootstock mainnet.
    RskMainnet,
    /// Local development chain.
    Devnet,
}

impl Network {
    /// Chain id used for transaction replay protection and client checks.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::RskTestnet => 31,
            Network::RskMainnet => 30,
            Network::Devnet => 33,
        }
    }

    /// Canonical preset name.
    pub fn name(&self) -> &'static str {
        match self {
            Network::RskTestnet => "rsk-testnet",
            Network::RskMainnet => "rsk-mainnet",
            Network::Devnet => "devnet",
        }
    }

    /// Looks up the preset for a chain id.
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        match chain_id {
            31 => Some(Network::RskTestnet),
            30 => Some(Network::RskMainnet),
            33 => Some(Network::Devnet),
            _ => None,
        }
    }

    /// Base URL of the public block explorer, if the network has one.
    pub fn explorer_url(&self) -> Option<&'static str> {
        match self {
            Network::RskTestnet => Some("https://explorer.testnet.rootstock.io"),
            Network::RskMainnet => Some("https://explorer.rootstock.io"),
            Network::Devnet => None,
        }
    }

    /// Explorer link for a transaction hash.
    pub fn transaction_url(&self, tx_hash: &str) -> Option<String> {
        self.explorer_url().map(|base| format!("{}/tx/{}", base, tx_hash))
    }

    /// Explorer link for an account or contract address.
    pub fn address_url(&self, address: &str) -> Option<String> {
        self.explorer_url()
            .map(|base| format!("{}/address/{}", base, address))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rsk-testnet" | "rsktestnet" | "testnet" => Ok(Network::RskTestnet),
            "rsk-mainnet" | "rskmainnet" | "mainnet" => Ok(Network::RskMainnet),
            "devnet" | "dev" | "local" => Ok(Network::Devnet),
            other => Err(ConfigError::UnknownNetwork(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

/// Settings read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network: Network,
    pub bind_address: String,
    pub rpc_port: u16,
    pub metrics_port: u16,
    pub log_format: LogFormat,
    pub log_level: String,
    pub gateway_url: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::Devnet,
            bind_address: "0.0.0.0".into(),
            rpc_port: DEFAULT_RPC_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: LogFormat::Pretty,
            log_level: "ipfs_storage_node=info,tower_http=info".into(),
            gateway_url: DEFAULT_GATEWAY.into(),
        }
    }
}

impl NodeConfig {
    /// Defaults for a given network.
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    /// Parses a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parses a file if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
