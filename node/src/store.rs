//! # Chain Store
//!
//! sled-backed persistence for the hosted contract. Contract state is
//! spread over per-record keys so a transaction only writes what it
//! touched:
//!
//! | Tree       | Key                          | Value                      |
//! |------------|------------------------------|----------------------------|
//! | `metadata` | `owner`                      | address (20B)              |
//! | `metadata` | `height`                     | height (8B BE)             |
//! | `metadata` | `deployment`                 | `bincode(DeploymentInfo)`  |
//! | `members`  | address (20B)                | empty                      |
//! | `files`    | address (20B) ‖ index (8B BE)| `bincode(UserFile)`        |
//! | `nonces`   | address (20B)                | next nonce (8B BE)         |
//! | `receipts` | tx hash (UTF-8)              | `bincode(Receipt)`         |
//!
//! File indices are big-endian so sled's lexicographic ordering returns
//! each account's records oldest first.
//!
//! ## Atomicity
//!
//! Each committed transaction writes its [`StateDelta`] and its receipt in
//! one sled transaction spanning every tree. Either all of it lands or none
//! of it does, so the receipts on disk always match the state on disk.

use sled::transaction::{
    ConflictableTransactionError, TransactionError, Transactional, TransactionalTree,
};
use sled::{Db, Tree};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use ipfs_storage_contracts::address::ADDRESS_LENGTH;
use ipfs_storage_contracts::{Address, IpfsHashStorage, UserFile};

use crate::deployment::DeploymentInfo;
use crate::host::{ChainState, Receipt};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupt record in `{tree}`: {detail}")]
    Corrupt { tree: &'static str, detail: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

const KEY_OWNER: &[u8] = b"owner";
const KEY_HEIGHT: &[u8] = b"height";
const KEY_DEPLOYMENT: &[u8] = b"deployment";
const MEMBER_VALUE: &[u8] = &[];

/// A file record at its position in an account's list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub owner: Address,
    pub index: u64,
    pub file: UserFile,
}

/// The keys one transaction changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    pub height: u64,
    /// New next-nonce per sender.
    pub nonces: Vec<(Address, u64)>,
    pub registered: Vec<Address>,
    pub unregistered: Vec<Address>,
    pub files: Vec<FileRecord>,
}

impl StateDelta {
    pub fn new(height: u64) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }
}

/// A [`StateDelta`] serialized ahead of the sled transaction, so the
/// transaction body (which sled may retry) only copies bytes.
struct EncodedDelta {
    height: [u8; 8],
    nonces: Vec<([u8; ADDRESS_LENGTH], [u8; 8])>,
    registered: Vec<[u8; ADDRESS_LENGTH]>,
    unregistered: Vec<[u8; ADDRESS_LENGTH]>,
    files: Vec<(Vec<u8>, Vec<u8>)>,
}

impl EncodedDelta {
    fn new(delta: &StateDelta) -> StoreResult<Self> {
        Ok(Self {
            height: delta.height.to_be_bytes(),
            nonces: delta
                .nonces
                .iter()
                .map(|(addr, nonce)| (*addr.as_bytes(), nonce.to_be_bytes()))
                .collect(),
            registered: delta.registered.iter().map(|a| *a.as_bytes()).collect(),
            unregistered: delta.unregistered.iter().map(|a| *a.as_bytes()).collect(),
            files: delta
                .files
                .iter()
                .map(|r| Ok((file_key(&r.owner, r.index), encode(&r.file)?)))
                .collect::<StoreResult<_>>()?,
        })
    }

    fn apply(
        &self,
        metadata: &TransactionalTree,
        members: &TransactionalTree,
        files: &TransactionalTree,
        nonces: &TransactionalTree,
    ) -> Result<(), ConflictableTransactionError<()>> {
        metadata.insert(KEY_HEIGHT, &self.height[..])?;
        for (addr, nonce) in &self.nonces {
            nonces.insert(&addr[..], &nonce[..])?;
        }
        for addr in &self.registered {
            members.insert(&addr[..], MEMBER_VALUE)?;
        }
        for addr in &self.unregistered {
            members.remove(&addr[..])?;
        }
        for (key, value) in &self.files {
            files.insert(key.as_slice(), value.as_slice())?;
        }
        Ok(())
    }
}

/// Persistent storage for chain state, deployment info and receipts.
///
/// Cheap to clone; clones share the same underlying database.
#[derive(Debug, Clone)]
pub struct ChainStore {
    db: Db,
    metadata: Tree,
    members: Tree,
    files: Tree,
    nonces: Tree,
    receipts: Tree,
}

impl ChainStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// A throwaway in-memory store, removed on drop.
    #[cfg(test)]
    pub fn open_temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let metadata = db.open_tree("metadata")?;
        let members = db.open_tree("members")?;
        let files = db.open_tree("files")?;
        let nonces = db.open_tree("nonces")?;
        let receipts = db.open_tree("receipts")?;
        Ok(Self {
            db,
            metadata,
            members,
            files,
            nonces,
            receipts,
        })
    }

    /// Whether genesis has been written.
    pub fn is_deployed(&self) -> StoreResult<bool> {
        Ok(self.metadata.contains_key(KEY_OWNER)?)
    }

    /// Rebuilds the latest committed chain state, or `None` before genesis.
    pub fn load_chain(&self) -> StoreResult<Option<ChainState>> {
        let Some(owner) = self.metadata.get(KEY_OWNER)? else {
            return Ok(None);
        };
        let owner = address_from(&owner, "metadata")?;
        let height = match self.metadata.get(KEY_HEIGHT)? {
            Some(raw) => u64_from(&raw, "metadata")?,
            None => 0,
        };

        let mut registered = BTreeSet::new();
        for entry in self.members.iter() {
            let (key, _) = entry?;
            registered.insert(address_from(&key, "members")?);
        }

        let mut user_files: BTreeMap<Address, Vec<UserFile>> = BTreeMap::new();
        for entry in self.files.iter() {
            let (key, value) = entry?;
            if key.len() != ADDRESS_LENGTH + 8 {
                return Err(corrupt("files", format!("key of {} bytes", key.len())));
            }
            let account = address_from(&key[..ADDRESS_LENGTH], "files")?;
            user_files.entry(account).or_default().push(decode(&value)?);
        }

        let mut nonces = BTreeMap::new();
        for entry in self.nonces.iter() {
            let (key, value) = entry?;
            nonces.insert(address_from(&key, "nonces")?, u64_from(&value, "nonces")?);
        }

        Ok(Some(ChainState {
            contract: IpfsHashStorage::restore(owner, registered, user_files),
            nonces,
            height,
        }))
    }

    pub fn load_deployment(&self) -> StoreResult<Option<DeploymentInfo>> {
        self.metadata
            .get(KEY_DEPLOYMENT)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Persists the deployment record and the genesis delta together.
    pub fn save_genesis(
        &self,
        owner: Address,
        deployment: &DeploymentInfo,
        delta: &StateDelta,
    ) -> StoreResult<()> {
        let encoded = EncodedDelta::new(delta)?;
        let deployment_bytes = encode(deployment)?;

        (&self.metadata, &self.members, &self.files, &self.nonces)
            .transaction(|(metadata, members, files, nonces)| {
                metadata.insert(KEY_OWNER, &owner.as_bytes()[..])?;
                metadata.insert(KEY_DEPLOYMENT, deployment_bytes.as_slice())?;
                encoded.apply(metadata, members, files, nonces)
            })
            .map_err(abort_to_store_error)?;
        self.db.flush()?;
        Ok(())
    }

    /// Atomically stores one transaction's changes and its receipt.
    pub fn commit(&self, delta: &StateDelta, receipt: &Receipt) -> StoreResult<()> {
        let encoded = EncodedDelta::new(delta)?;
        let receipt_bytes = encode(receipt)?;
        let receipt_key = receipt.tx_hash.as_bytes();

        (
            &self.metadata,
            &self.members,
            &self.files,
            &self.nonces,
            &self.receipts,
        )
            .transaction(|(metadata, members, files, nonces, receipts)| {
                encoded.apply(metadata, members, files, nonces)?;
                receipts.insert(receipt_key, receipt_bytes.as_slice())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(abort_to_store_error)
    }

    /// Looks up a receipt by transaction hash.
    pub fn receipt(&self, tx_hash: &str) -> StoreResult<Option<Receipt>> {
        self.receipts
            .get(tx_hash.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Flushes dirty buffers to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn file_key(owner: &Address, index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(ADDRESS_LENGTH + 8);
    key.extend_from_slice(owner.as_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

fn address_from(raw: &[u8], tree: &'static str) -> StoreResult<Address> {
    let bytes: [u8; ADDRESS_LENGTH] = raw
        .try_into()
        .map_err(|_| corrupt(tree, format!("address of {} bytes", raw.len())))?;
    Ok(Address::from_bytes(bytes))
}

fn u64_from(raw: &[u8], tree: &'static str) -> StoreResult<u64> {
    let bytes: [u8; 8] = raw
        .try_into()
        .map_err(|_| corrupt(tree, format!("integer of {} bytes", raw.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

fn corrupt(tree: &'static str, detail: String) -> StoreError {
    StoreError::Corrupt { tree, detail }
}

fn abort_to_store_error(err: TransactionError<()>) -> StoreError {
    match err {
        TransactionError::Storage(err) => StoreError::Sled(err),
        TransactionError::Abort(()) => StoreError::Serialization("commit transaction aborted".into()),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}
