//! # IPFS Storage Contracts
//!
//! On-chain logic for the IPFS storage registry. The contract keeps a set
//! of registered accounts and, per account, an append-only list of IPFS
//! content identifiers with the file names they were uploaded under.
//!
//! - **Registry** — owner-administered membership, per-user file records,
//!   self-or-owner read access, and `HashAdded` notifications.
//! - **Address** — the 20-byte account identifier every call is keyed by.
//!
//! ## Design Principles
//!
//! 1. Preconditions are checked before any mutation. A failed call changes
//!    nothing, so the host can execute on its live state without a copy.
//! 2. Authorization is an explicit check at the top of each operation,
//!    driven by the caller in the [`CallContext`].
//! 3. The contract has no clock of its own. Block time arrives with the call.
//! 4. Every public type is serializable (serde) for wire transport and
//!    persistent storage.

pub mod address;
pub mod registry;

pub use address::{Address, AddressError};
pub use registry::{CallContext, IpfsHashStorage, RegistryError, RegistryEvent, UserFile};
