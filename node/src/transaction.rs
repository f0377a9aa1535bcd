//! # Registry Transactions
//!
//! State-changing calls reach the contract as signed transactions. A
//! [`Transaction`] names the chain, the sender's nonce, the sender and the
//! [`Call`]; its signable bytes are the bincode encoding of exactly those
//! four fields. Including the chain id keeps a transaction signed for one
//! network from being replayed on another.
//!
//! The transaction hash is BLAKE3 over the signable bytes followed by the
//! signature, rendered as `0x`-prefixed hex.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use ipfs_storage_contracts::Address;

use crate::wallet::{self, Wallet, WalletError};

/// Errors raised while encoding or authenticating a transaction.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("failed to encode transaction: {0}")]
    Encoding(String),

    #[error("bad signature: {0}")]
    Signature(#[from] WalletError),

    #[error("sender mismatch: transaction claims {claimed} but was signed by {signer}")]
    SenderMismatch { claimed: Address, signer: Address },
}

/// A state-changing contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Call {
    RegisterUser {
        target: Address,
    },
    UnregisterUser {
        target: Address,
    },
    AddHash {
        #[serde(rename = "ipfsHash")]
        ipfs_hash: String,
        #[serde(rename = "fileName")]
        file_name: String,
    },
}

impl Call {
    /// Entry point name, for logs and receipts.
    pub fn name(&self) -> &'static str {
        match self {
            Call::RegisterUser { .. } => "registerUser",
            Call::UnregisterUser { .. } => "unregisterUser",
            Call::AddHash { .. } => "addHash",
        }
    }
}

/// An unsigned transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub from: Address,
    pub call: Call,
}

impl Transaction {
    pub fn new(chain_id: u64, nonce: u64, from: Address, call: Call) -> Self {
        Self {
            chain_id,
            nonce,
            from,
            call,
        }
    }

    /// Canonical bytes covered by the signature.
    pub fn signable_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        bincode::serialize(self).map_err(|e| TransactionError::Encoding(e.to_string()))
    }

    /// Signs the transaction with `wallet`.
    ///
    /// The caller is responsible for `from` matching the wallet; a mismatch
    /// is caught at verification time, not here.
    pub fn sign(self, wallet: &Wallet) -> Result<SignedTransaction, TransactionError> {
        let signable = self.signable_bytes()?;
        let signature = wallet.sign(&signable);
        Ok(SignedTransaction {
            tx: self,
            public_key: wallet.public_key_hex(),
            signature: hex::encode(signature),
        })
    }
}

/// A transaction together with the signer's public key and signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub tx: Transaction,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    /// Hex-encoded Ed25519 signature over the signable bytes.
    pub signature: String,
}

impl SignedTransaction {
    /// Checks the signature and that the signing key controls `tx.from`.
    /// Returns the authenticated sender.
    pub fn verify(&self) -> Result<Address, TransactionError> {
        let signable = self.tx.signable_bytes()?;
        let public_key = wallet::verify_hex(&self.public_key, &signable, &self.signature)?;
        let signer = Address::from_public_key(&public_key);
        if signer != self.tx.from {
            return Err(TransactionError::SenderMismatch {
                claimed: self.tx.from,
                signer,
            });
        }
        Ok(signer)
    }

    /// Transaction hash, `0x`-prefixed hex.
    pub fn hash(&self) -> Result<String, TransactionError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.tx.signable_bytes()?);
        hasher.update(self.signature.as_bytes());
        Ok(format!("0x{}", hasher.finalize().to_hex()))
    }
}
