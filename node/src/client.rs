//! # Storage Client
//!
//! The upload flow end to end: confirm we are talking to the expected
//! network, pin the file, record its CID on the registry with a signed
//! `addHash`, then read the caller's files back.

use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;

use ipfs_storage_contracts::{RegistryError, UserFile};

use crate::config::Network;
use crate::host::{ContractHost, HostError, Receipt};
use crate::pinning::{ContentPinner, PinError, PinnedContent};
use crate::transaction::{Call, Transaction, TransactionError};
use crate::wallet::Wallet;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("wrong network: expected chain {expected}, node is on chain {actual}")]
    WrongNetwork { expected: u64, actual: u64 },

    #[error("refusing to upload an empty file")]
    EmptyFile,

    #[error("pinning failed: {0}")]
    Pin(#[from] PinError),

    #[error("failed to sign transaction: {0}")]
    Sign(#[from] TransactionError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("registry refused the read: {0}")]
    Read(#[from] RegistryError),
}

/// A pinned file and the receipt that recorded it.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub pinned: PinnedContent,
    pub receipt: Receipt,
}

/// Uploads files on behalf of one wallet.
pub struct StorageClient {
    host: Arc<ContractHost>,
    pinner: Arc<dyn ContentPinner>,
    wallet: Wallet,
    expected: Network,
}

impl StorageClient {
    pub fn new(
        host: Arc<ContractHost>,
        pinner: Arc<dyn ContentPinner>,
        wallet: Wallet,
        expected: Network,
    ) -> Self {
        Self {
            host,
            pinner,
            wallet,
            expected,
        }
    }

    /// Fails unless the host serves the chain this client expects.
    pub fn check_network(&self) -> Result<(), ClientError> {
        let actual = self.host.chain_id();
        if actual != self.expected.chain_id() {
            return Err(ClientError::WrongNetwork {
                expected: self.expected.chain_id(),
                actual,
            });
        }
        Ok(())
    }

    /// Pins `data` and records its CID under `file_name`.
    pub async fn upload(&self, file_name: &str, data: Bytes) -> Result<UploadOutcome, ClientError> {
        self.check_network()?;
        if data.is_empty() {
            return Err(ClientError::EmptyFile);
        }

        let pinned = self.pinner.pin(data, file_name).await?;
        tracing::info!(cid = %pinned.cid, size = pinned.size, file = file_name, "file pinned");

        let receipt = self.submit(Call::AddHash {
            ipfs_hash: pinned.cid.clone(),
            file_name: file_name.to_string(),
        })?;
        Ok(UploadOutcome { pinned, receipt })
    }

    /// Signs and submits `call` with the wallet's next nonce.
    pub fn submit(&self, call: Call) -> Result<Receipt, ClientError> {
        self.check_network()?;
        let sender = self.wallet.address();
        let stx = Transaction::new(self.host.chain_id(), self.host.nonce(&sender), sender, call)
            .sign(&self.wallet)?;
        Ok(self.host.submit(&stx)?)
    }

    /// The wallet's own files, oldest first.
    pub fn stored_files(&self) -> Result<Vec<UserFile>, ClientError> {
        let me = self.wallet.address();
        Ok(self.host.user_files(me, &me)?)
    }

    /// The most recently stored file, if any.
    pub fn latest_file(&self) -> Result<Option<UserFile>, ClientError> {
        Ok(self.stored_files()?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pinning::MemoryPinner;
    use crate::store::ChainStore;
    use chrono::Utc;
    use ipfs_storage_contracts::Address;

    struct Fixture {
        host: Arc<ContractHost>,
        owner: Wallet,
        pinner: Arc<MemoryPinner>,
    }

    fn fixture(network: Network) -> Fixture {
        let owner = Wallet::from_seed(&[1u8; 32]);
        let host = ContractHost::deploy(
            ChainStore::open_temporary().unwrap(),
            network,
            owner.address(),
            Utc::now(),
        )
        .unwrap();
        Fixture {
            host: Arc::new(host),
            owner,
            pinner: Arc::new(MemoryPinner::new()),
        }
    }

    fn client(f: &Fixture, wallet: Wallet, expected: Network) -> StorageClient {
        StorageClient::new(f.host.clone(), f.pinner.clone(), wallet, expected)
    }

    fn register(f: &Fixture, user: Address) {
        let owner = Wallet::from_hex(&f.owner.secret_hex()).unwrap();
        client(f, owner, f.host.network())
            .submit(Call::RegisterUser { target: user })
            .unwrap();
    }

    #[tokio::test]
    async fn upload_pins_and_records_hash() {
        let f = fixture(Network::Devnet);
        let user = Wallet::from_seed(&[2u8; 32]);
        register(&f, user.address());

        let c = client(&f, user, Network::Devnet);
        let outcome = c
            .upload("test.txt", Bytes::from_static(b"hello ipfs"))
            .await
            .unwrap();
        assert!(outcome.receipt.succeeded());
        assert!(outcome.pinned.cid.starts_with("Qm"));

        let latest = c.latest_file().unwrap().unwrap();
        assert_eq!(latest.ipfs_hash, outcome.pinned.cid);
        assert_eq!(latest.file_name, "test.txt");
        assert_eq!(f.pinner.len(), 1);
    }

    #[tokio::test]
    async fn upload_refuses_wrong_network() {
        let f = fixture(Network::Devnet);
        let c = client(&f, Wallet::from_seed(&[1u8; 32]), Network::RskTestnet);
        let err = c
            .upload("a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::WrongNetwork {
                expected: 31,
                actual: 33
            }
        ));
        assert_eq!(f.pinner.len(), 0);
    }

    #[tokio::test]
    async fn empty_file_rejected_before_pinning() {
        let f = fixture(Network::Devnet);
        let c = client(&f, Wallet::from_seed(&[1u8; 32]), Network::Devnet);
        assert!(matches!(
            c.upload("empty.txt", Bytes::new()).await,
            Err(ClientError::EmptyFile)
        ));
        assert_eq!(f.pinner.len(), 0);
    }

    #[tokio::test]
    async fn unregistered_upload_reverts() {
        let f = fixture(Network::Devnet);
        let c = client(&f, Wallet::from_seed(&[8u8; 32]), Network::Devnet);
        let err = c
            .upload("a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Host(HostError::Reverted {
                reason: RegistryError::NotRegistered(_),
                ..
            })
        ));
        assert!(c.stored_files().unwrap().is_empty());
        assert!(c.latest_file().unwrap().is_none());
    }
}
