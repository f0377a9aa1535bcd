//! # Contract Host
//!
//! Runs one deployed [`IpfsHashStorage`] contract the way a chain would:
//! transactions are authenticated, ordered, executed one at a time, and
//! their effects persisted before anyone can observe them.
//!
//! ## Execution model
//!
//! All chain state (contract, per-sender nonces, height) sits behind a
//! single `RwLock`. A submission holds the write lock for the whole
//! execute-persist sequence, which gives the total ordering of writes the
//! contract assumes and keeps readers from seeing a transaction the disk
//! does not have.
//!
//! The call runs in place on the live contract. Its events describe every
//! key it changed, so only those keys (plus the sender's nonce and the
//! height) are written. If the store refuses the write, the live state is
//! reloaded from disk.
//!
//! A call the contract rejects still consumes the sender's nonce and
//! produces a `Reverted` receipt, but leaves the contract untouched.
//! Transactions that fail authentication (bad signature, wrong chain,
//! stale nonce) are refused outright and leave no trace.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::broadcast;

use ipfs_storage_contracts::{
    Address, CallContext, IpfsHashStorage, RegistryError, RegistryEvent, UserFile,
};

use crate::config::Network;
use crate::deployment::{DeploymentInfo, DEPLOYMENT_NONCE};
use crate::store::{ChainStore, FileRecord, StateDelta, StoreError};
use crate::transaction::{Call, SignedTransaction, TransactionError};

/// Capacity of the event broadcast channel. Slow subscribers that fall
/// further behind than this miss events and are told how many.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by the host.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("transaction rejected: {0}")]
    Rejected(#[from] TransactionError),

    #[error("wrong chain: node runs chain {expected}, transaction targets {actual}")]
    WrongChain { expected: u64, actual: u64 },

    #[error("bad nonce for {sender}: expected {expected}, got {actual}")]
    BadNonce {
        sender: Address,
        expected: u64,
        actual: u64,
    },

    #[error("transaction reverted: {reason}")]
    Reverted {
        reason: RegistryError,
        receipt: Box<Receipt>,
    },

    #[error("store at chain {stored} cannot be served as {requested}")]
    NetworkMismatch { stored: u64, requested: u64 },

    #[error("store has chain state but no deployment record")]
    MissingDeployment,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything that changes when a transaction commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    pub contract: IpfsHashStorage,
    /// Next expected nonce per sender. Absent means zero.
    pub nonces: BTreeMap<Address, u64>,
    /// Height of the last committed transaction; genesis is 0.
    pub height: u64,
}

/// Outcome of an executed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReceiptStatus {
    Success,
    Reverted { reason: RegistryError },
}

/// Record of an executed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: String,
    pub block_height: u64,
    pub from: Address,
    pub nonce: u64,
    pub call: Call,
    pub status: ReceiptStatus,
    pub events: Vec<RegistryEvent>,
    /// Block time, seconds since the Unix epoch.
    pub timestamp: u64,
}

#[cfg(test)]
impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// An event together with the transaction that emitted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub tx_hash: String,
    pub block_height: u64,
    pub event: RegistryEvent,
}

// ---------------------------------------------------------------------------
// ContractHost
// ---------------------------------------------------------------------------

/// Hosts a deployed registry contract.
#[derive(Debug)]
pub struct ContractHost {
    network: Network,
    deployment: DeploymentInfo,
    state: RwLock<ChainState>,
    store: ChainStore,
    events: broadcast::Sender<EventRecord>,
}

impl ContractHost {
    /// Deploys a fresh contract owned by `deployer` and persists genesis.
    pub fn deploy(
        store: ChainStore,
        network: Network,
        deployer: Address,
        now: DateTime<Utc>,
    ) -> Result<Self, HostError> {
        let deployment = DeploymentInfo::new(network, deployer, now);
        let ctx = CallContext::new(deployer, unix_seconds(now));

        let mut genesis = StateDelta::new(0);
        genesis.registered.push(deployer);
        genesis.nonces.push((deployer, DEPLOYMENT_NONCE + 1));
        store.save_genesis(deployer, &deployment, &genesis)?;

        let chain = ChainState {
            contract: IpfsHashStorage::initialize(&ctx),
            nonces: genesis.nonces.iter().copied().collect(),
            height: 0,
        };

        tracing::info!(
            network = %network,
            chain_id = network.chain_id(),
            contract = %deployment.contract_address,
            owner = %deployer,
            "registry contract deployed"
        );
        Ok(Self::assemble(network, deployment, chain, store))
    }

    /// Resumes a previously deployed contract. Returns `None` if the store
    /// has never been through genesis.
    pub fn open(store: ChainStore, network: Network) -> Result<Option<Self>, HostError> {
        let Some(chain) = store.load_chain()? else {
            return Ok(None);
        };
        let deployment = store
            .load_deployment()?
            .ok_or(HostError::MissingDeployment)?;
        if deployment.chain_id != network.chain_id() {
            return Err(HostError::NetworkMismatch {
                stored: deployment.chain_id,
                requested: network.chain_id(),
            });
        }

        tracing::info!(
            height = chain.height,
            contract = %deployment.contract_address,
            "registry state restored"
        );
        Ok(Some(Self::assemble(network, deployment, chain, store)))
    }

    /// Opens an existing deployment or deploys a new one.
    pub fn open_or_deploy(
        store: ChainStore,
        network: Network,
        deployer: Address,
        now: DateTime<Utc>,
    ) -> Result<Self, HostError> {
        match Self::open(store.clone(), network)? {
            Some(host) => Ok(host),
            None => Self::deploy(store, network, deployer, now),
        }
    }

    fn assemble(
        network: Network,
        deployment: DeploymentInfo,
        chain: ChainState,
        store: ChainStore,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            network,
            deployment,
            state: RwLock::new(chain),
            store,
            events,
        }
    }

    /// Submits a transaction stamped with the current time.
    pub fn submit(&self, stx: &SignedTransaction) -> Result<Receipt, HostError> {
        self.submit_at(stx, Utc::now())
    }

    /// Submits a transaction with an explicit block time.
    pub fn submit_at(
        &self,
        stx: &SignedTransaction,
        block_time: DateTime<Utc>,
    ) -> Result<Receipt, HostError> {
        let sender = stx.verify()?;
        if stx.tx.chain_id != self.network.chain_id() {
            return Err(HostError::WrongChain {
                expected: self.network.chain_id(),
                actual: stx.tx.chain_id,
            });
        }
        let tx_hash = stx.hash()?;

        let mut state = self.state.write();
        let expected = state.nonces.get(&sender).copied().unwrap_or(0);
        if stx.tx.nonce != expected {
            return Err(HostError::BadNonce {
                sender,
                expected,
                actual: stx.tx.nonce,
            });
        }

        let timestamp = unix_seconds(block_time);
        let ctx = CallContext::new(sender, timestamp);
        let outcome = execute(&mut state.contract, &ctx, &stx.tx.call);
        let events = state.contract.drain_events();
        let height = state.height + 1;

        let mut delta = StateDelta::new(height);
        delta.nonces.push((sender, expected + 1));
        record_changes(&state.contract, timestamp, &events, &mut delta);

        let receipt = Receipt {
            tx_hash,
            block_height: height,
            from: sender,
            nonce: stx.tx.nonce,
            call: stx.tx.call.clone(),
            status: match &outcome {
                Ok(()) => ReceiptStatus::Success,
                Err(reason) => ReceiptStatus::Reverted {
                    reason: reason.clone(),
                },
            },
            events,
            timestamp,
        };

        if let Err(err) = self.store.commit(&delta, &receipt) {
            tracing::error!(tx = %receipt.tx_hash, error = %err, "commit failed, reloading state");
            match self.store.load_chain() {
                Ok(Some(restored)) => *state = restored,
                Ok(None) => tracing::error!("chain state vanished from the store"),
                Err(e) => tracing::error!(error = %e, "failed to reload chain state"),
            }
            return Err(err.into());
        }
        state.nonces.insert(sender, expected + 1);
        state.height = height;
        drop(state);

        for event in &receipt.events {
            tracing::debug!(tx = %receipt.tx_hash, event = %event, "event emitted");
            // No subscribers is fine.
            let _ = self.events.send(EventRecord {
                tx_hash: receipt.tx_hash.clone(),
                block_height: receipt.block_height,
                event: event.clone(),
            });
        }

        match outcome {
            Ok(()) => {
                tracing::info!(
                    tx = %receipt.tx_hash,
                    height = receipt.block_height,
                    from = %sender,
                    method = stx.tx.call.name(),
                    "transaction committed"
                );
                Ok(receipt)
            }
            Err(reason) => {
                tracing::warn!(
                    tx = %receipt.tx_hash,
                    height = receipt.block_height,
                    from = %sender,
                    method = stx.tx.call.name(),
                    reason = %reason,
                    "transaction reverted"
                );
                Err(HostError::Reverted {
                    reason,
                    receipt: Box::new(receipt),
                })
            }
        }
    }

    // -- Reads ---------------------------------------------------------------

    pub fn owner(&self) -> Address {
        self.state.read().contract.owner()
    }

    pub fn is_user_registered(&self, address: &Address) -> bool {
        self.state.read().contract.is_user_registered(address)
    }

    pub fn user_file_count(&self, address: &Address) -> u64 {
        self.state.read().contract.get_user_file_count(address)
    }

    /// Reads `target`'s files on behalf of `caller`.
    pub fn user_files(&self, caller: Address, target: &Address) -> Result<Vec<UserFile>, RegistryError> {
        self.state
            .read()
            .contract
            .get_user_files(&CallContext::now(caller), target)
    }

    /// Next nonce `address` must use.
    pub fn nonce(&self, address: &Address) -> u64 {
        self.state.read().nonces.get(address).copied().unwrap_or(0)
    }

    pub fn height(&self) -> u64 {
        self.state.read().height
    }

    pub fn registered_count(&self) -> usize {
        self.state.read().contract.registered_count()
    }

    pub fn total_files(&self) -> u64 {
        self.state.read().contract.total_files()
    }

    pub fn receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, HostError> {
        Ok(self.store.receipt(tx_hash)?)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn chain_id(&self) -> u64 {
        self.network.chain_id()
    }

    pub fn contract_address(&self) -> Address {
        self.deployment.contract_address
    }

    pub fn deployment(&self) -> &DeploymentInfo {
        &self.deployment
    }

    /// Subscribes to events from transactions committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    pub fn flush(&self) -> Result<(), HostError> {
        Ok(self.store.flush()?)
    }
}

fn execute(
    contract: &mut IpfsHashStorage,
    ctx: &CallContext,
    call: &Call,
) -> Result<(), RegistryError> {
    match call {
        Call::RegisterUser { target } => contract.register_user(ctx, *target),
        Call::UnregisterUser { target } => contract.unregister_user(ctx, *target),
        Call::AddHash {
            ipfs_hash,
            file_name,
        } => contract.add_hash(ctx, ipfs_hash.clone(), file_name.clone()),
    }
}

/// Adds the contract keys behind `events` to `delta`. `contract` is the
/// state after the call.
fn record_changes(
    contract: &IpfsHashStorage,
    timestamp: u64,
    events: &[RegistryEvent],
    delta: &mut StateDelta,
) {
    for event in events {
        match event {
            RegistryEvent::UserRegistered { user } => delta.registered.push(*user),
            RegistryEvent::UserUnregistered { user } => delta.unregistered.push(*user),
            RegistryEvent::HashAdded {
                caller,
                ipfs_hash,
                file_name,
            } => {
                // One call per transaction, so the record is the caller's last.
                let index = contract.get_user_file_count(caller).saturating_sub(1);
                delta.files.push(FileRecord {
                    owner: *caller,
                    index,
                    file: UserFile {
                        ipfs_hash: ipfs_hash.clone(),
                        file_name: file_name.clone(),
                        timestamp,
                    },
                });
            }
        }
    }
}

fn unix_seconds(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or(0)
}
