//! # Wallet
//!
//! Ed25519 signing keys for accounts that talk to the registry. A wallet
//! owns one signing key, knows its [`Address`], and signs transaction
//! payloads. Key files hold the 32-byte secret as hex and are written with
//! owner-only permissions on Unix.
//!
//! Key bytes are never logged.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use ipfs_storage_contracts::Address;

/// Errors from key handling and signature checks.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid secret key: expected 32 hex-encoded bytes")]
    InvalidSecretKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid signature bytes: expected 64 bytes")]
    InvalidSignature,

    #[error("signature verification failed")]
    VerificationFailed,

    #[error("key file i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// An account's signing key.
pub struct Wallet {
    signing_key: SigningKey,
}

impl Wallet {
    /// Generates a fresh key from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Builds a wallet deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parses a hex-encoded secret key. Surrounding whitespace is ignored
    /// so key files with a trailing newline load cleanly.
    pub fn from_hex(hex_str: &str) -> Result<Self, WalletError> {
        let mut seed = [0u8; SECRET_KEY_LENGTH];
        hex::decode_to_slice(hex_str.trim(), &mut seed)
            .map_err(|_| WalletError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Loads a wallet from a key file.
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_hex(&raw)
    }

    /// Writes the secret key to `path`, readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        std::fs::write(path, self.secret_hex())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Hex export of the secret key. Handle with care.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// The account address this key controls.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key_bytes())
    }

    /// Signs `message`, returning the 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Verifies a signature given hex-encoded public key and signature.
pub fn verify_hex(
    public_key_hex: &str,
    message: &[u8],
    signature_hex: &str,
) -> Result<[u8; 32], WalletError> {
    let mut public_key = [0u8; 32];
    hex::decode_to_slice(public_key_hex, &mut public_key)
        .map_err(|_| WalletError::InvalidPublicKey)?;
    let mut signature = [0u8; 64];
    hex::decode_to_slice(signature_hex, &mut signature)
        .map_err(|_| WalletError::InvalidSignature)?;

    let verifying_key =
        VerifyingKey::from_bytes(&public_key).map_err(|_| WalletError::InvalidPublicKey)?;
    verifying_key
        .verify(message, &Signature::from_bytes(&signature))
        .map_err(|_| WalletError::VerificationFailed)?;
    Ok(public_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_deterministic() {
        let a = Wallet::from_seed(&[9u8; 32]);
        let b = Wallet::from_seed(&[9u8; 32]);
        assert_eq!(a.address(), b.address());
        assert_eq!(a.public_key_hex(), b.public_key_hex());
    }

    #[test]
    fn hex_roundtrip_preserves_address() {
        let w = Wallet::generate();
        let restored = Wallet::from_hex(&format!("{}\n", w.secret_hex())).unwrap();
        assert_eq!(restored.address(), w.address());
    }

    #[test]
    fn bad_hex_is_rejected() {
        assert!(matches!(
            Wallet::from_hex("abcd"),
            Err(WalletError::InvalidSecretKey)
        ));
        assert!(Wallet::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn signature_verifies_against_own_key() {
        let w = Wallet::generate();
        let sig = w.sign(b"register");
        let pk = verify_hex(&w.public_key_hex(), b"register", &hex::encode(sig)).unwrap();
        assert_eq!(Address::from_public_key(&pk), w.address());
    }

    #[test]
    fn tampered_message_fails() {
        let w = Wallet::generate();
        let sig = hex::encode(w.sign(b"register"));
        assert!(matches!(
            verify_hex(&w.public_key_hex(), b"unregister", &sig),
            Err(WalletError::VerificationFailed)
        ));
    }

    #[test]
    fn key_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.key");
        let w = Wallet::generate();
        w.save(&path).unwrap();
        assert_eq!(Wallet::load(&path).unwrap().address(), w.address());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let w = Wallet::from_seed(&[0x42u8; 32]);
        let dbg = format!("{:?}", w);
        assert!(!dbg.contains(&w.secret_hex()));
        assert!(dbg.contains("address"));
    }
}
