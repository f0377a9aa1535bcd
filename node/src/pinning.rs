//! # Content Pinning
//!
//! The registry only ever stores content identifiers; the bytes live with a
//! pinning service. [`ContentPinner`] is the narrow interface the upload
//! flow needs: pin some bytes, get a CID back, and fetch them again later.
//!
//! CIDs are CIDv0-shaped: base58btc of the SHA-256 multihash
//! (`0x12 0x20 ‖ digest`), so every identifier starts with `Qm` and
//! identical bytes always pin to the same CID.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use thiserror::Error;

/// Public gateway used to render links to pinned content.
pub const DEFAULT_GATEWAY: &str = "https://gateway.pinata.cloud/ipfs/";

/// Multihash prefix: SHA2-256, 32-byte digest.
const MULTIHASH_SHA256: [u8; 2] = [0x12, 0x20];

#[derive(Debug, Error)]
pub enum PinError {
    #[error("invalid content identifier: {0}")]
    InvalidCid(String),

    #[error("pin store i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of pinning a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinnedContent {
    pub cid: String,
    pub size: u64,
    pub file_name: String,
}

/// Computes the CIDv0 of `data`.
pub fn content_id(data: &[u8]) -> String {
    let mut multihash = Vec::with_capacity(34);
    multihash.extend_from_slice(&MULTIHASH_SHA256);
    multihash.extend_from_slice(&Sha256::digest(data));
    bs58::encode(multihash).into_string()
}

/// Checks that `cid` is a well-formed CIDv0.
pub fn validate_cid(cid: &str) -> Result<(), PinError> {
    let raw = bs58::decode(cid)
        .into_vec()
        .map_err(|_| PinError::InvalidCid(cid.to_string()))?;
    if raw.len() != 34 || raw[..2] != MULTIHASH_SHA256 {
        return Err(PinError::InvalidCid(cid.to_string()));
    }
    Ok(())
}

/// Gateway link for `cid`. A missing trailing slash on `gateway` is added.
pub fn gateway_url(gateway: &str, cid: &str) -> String {
    if gateway.ends_with('/') {
        format!("{gateway}{cid}")
    } else {
        format!("{gateway}/{cid}")
    }
}

/// A service that keeps content available by CID.
#[async_trait]
pub trait ContentPinner: Send + Sync {
    async fn pin(&self, data: Bytes, file_name: &str) -> Result<PinnedContent, PinError>;

    /// Returns `None` if nothing is pinned under `cid`.
    async fn fetch(&self, cid: &str) -> Result<Option<Bytes>, PinError>;
}

/// In-process pinner for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemoryPinner {
    blobs: parking_lot::RwLock<std::collections::HashMap<String, Bytes>>,
}

#[cfg(test)]
impl MemoryPinner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }
}

#[cfg(test)]
#[async_trait]
impl ContentPinner for MemoryPinner {
    async fn pin(&self, data: Bytes, file_name: &str) -> Result<PinnedContent, PinError> {
        let cid = content_id(&data);
        let size = data.len() as u64;
        self.blobs.write().insert(cid.clone(), data);
        Ok(PinnedContent {
            cid,
            size,
            file_name: file_name.to_string(),
        })
    }

    async fn fetch(&self, cid: &str) -> Result<Option<Bytes>, PinError> {
        Ok(self.blobs.read().get(cid).cloned())
    }
}

/// Pins blobs as files named by CID under a directory.
#[derive(Debug, Clone)]
pub struct FsPinner {
    root: PathBuf,
}

impl FsPinner {
    /// Opens (creating if needed) a blob directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, PinError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn blob_path(&self, cid: &str) -> Result<PathBuf, PinError> {
        // Only validated CIDs become path components.
        validate_cid(cid)?;
        Ok(self.root.join(cid))
    }
}

#[async_trait]
impl ContentPinner for FsPinner {
    async fn pin(&self, data: Bytes, file_name: &str) -> Result<PinnedContent, PinError> {
        let cid = content_id(&data);
        let path = self.blob_path(&cid)?;
        let size = data.len() as u64;

        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(cid = %cid, "content already pinned");
        } else {
            let tmp = path.with_extension("partial");
            tokio::fs::write(&tmp, &data).await?;
            tokio::fs::rename(&tmp, &path).await?;
            tracing::debug!(cid = %cid, size, "content pinned");
        }

        Ok(PinnedContent {
            cid,
            size,
            file_name: file_name.to_string(),
        })
    }

    async fn fetch(&self, cid: &str) -> Result<Option<Bytes>, PinError> {
        let path = self.blob_path(cid)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_is_deterministic_cidv0() {
        let a = content_id(b"hello world");
        assert_eq!(a, content_id(b"hello world"));
        assert_ne!(a, content_id(b"hello world!"));
        assert!(a.starts_with("Qm"));
        assert_eq!(a.len(), 46);
        assert!(validate_cid(&a).is_ok());
    }

    #[test]
    fn cid_decodes_to_sha256_multihash() {
        let raw = bs58::decode(content_id(b"abc")).into_vec().unwrap();
        assert_eq!(&raw[..2], &[0x12, 0x20]);
        assert_eq!(&raw[2..], Sha256::digest(b"abc").as_slice());
    }

    #[test]
    fn path_like_cids_are_rejected() {
        assert!(validate_cid("../etc/passwd").is_err());
        assert!(validate_cid("QmTest123").is_err());
        assert!(validate_cid("").is_err());
    }

    #[test]
    fn gateway_links() {
        assert_eq!(
            gateway_url(DEFAULT_GATEWAY, "QmX"),
            "https://gateway.pinata.cloud/ipfs/QmX"
        );
        assert_eq!(gateway_url("http://localhost:8080/ipfs", "QmX"), "http://localhost:8080/ipfs/QmX");
    }

    #[tokio::test]
    async fn memory_pinner_roundtrip() {
        let pinner = MemoryPinner::new();
        let pinned = pinner.pin(Bytes::from_static(b"data"), "a.txt").await.unwrap();
        assert_eq!(pinned.size, 4);
        assert_eq!(pinned.file_name, "a.txt");
        assert_eq!(
            pinner.fetch(&pinned.cid).await.unwrap(),
            Some(Bytes::from_static(b"data"))
        );
        assert_eq!(pinner.len(), 1);
    }

    #[tokio::test]
    async fn fs_pinner_persists_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let pinner = FsPinner::open(dir.path().join("blobs")).unwrap();
        let first = pinner.pin(Bytes::from_static(b"payload"), "p.bin").await.unwrap();
        let again = pinner.pin(Bytes::from_static(b"payload"), "copy.bin").await.unwrap();
        assert_eq!(first.cid, again.cid);

        let reopened = FsPinner::open(dir.path().join("blobs")).unwrap();
        assert_eq!(
            reopened.fetch(&first.cid).await.unwrap().as_deref(),
            Some(&b"payload"[..])
        );

        let missing = content_id(b"never pinned");
        assert!(reopened.fetch(&missing).await.unwrap().is_none());
        assert!(reopened.fetch("../secret").await.is_err());
    }
}
