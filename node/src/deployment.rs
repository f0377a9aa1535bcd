//! # Deployment Record
//!
//! Written once, when the node deploys the registry at genesis, and saved
//! next to the chain data as `deployment-info.json` so operators (and the
//! upload client) can find the contract without querying the node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use ipfs_storage_contracts::Address;

use crate::config::Network;

/// File name of the deployment record inside the data directory.
pub const DEPLOYMENT_FILE_NAME: &str = "deployment-info.json";

/// Nonce the deployer spends on the deployment itself.
pub const DEPLOYMENT_NONCE: u64 = 0;

/// Where and by whom the registry was deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentInfo {
    pub network: String,
    pub chain_id: u64,
    pub contract_address: Address,
    pub deployment_hash: String,
    pub deployer: Address,
    pub timestamp: DateTime<Utc>,
}

impl DeploymentInfo {
    /// Describes a deployment by `deployer` on `network` at `timestamp`.
    pub fn new(network: Network, deployer: Address, timestamp: DateTime<Utc>) -> Self {
        let contract_address = Address::contract(&deployer, DEPLOYMENT_NONCE);

        let mut hasher = blake3::Hasher::new();
        hasher.update(b"deploy");
        hasher.update(&network.chain_id().to_be_bytes());
        hasher.update(deployer.as_bytes());
        hasher.update(&DEPLOYMENT_NONCE.to_be_bytes());
        hasher.update(&timestamp.timestamp().to_be_bytes());

        Self {
            network: network.name().to_string(),
            chain_id: network.chain_id(),
            contract_address,
            deployment_hash: format!("0x{}", hasher.finalize().to_hex()),
            deployer,
            timestamp,
        }
    }

    /// Explorer links for the contract and the deployment transaction,
    /// when the network has an explorer.
    pub fn explorer_links(&self) -> Option<(String, String)> {
        let network = Network::from_chain_id(self.chain_id)?;
        let contract = network.address_url(&self.contract_address.to_string())?;
        let tx = network.transaction_url(&self.deployment_hash)?;
        Some((contract, tx))
    }

    /// Writes the record as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Reads a record previously written by [`write_json`](Self::write_json).
    #[cfg(test)]
    pub fn read_json(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read(path)?;
        serde_json::from_slice(&raw).map_err(std::io::Error::other)
    }
}
