//! # IPFS Hash Storage Contract
//!
//! Records IPFS content identifiers per registered account. The deploying
//! account becomes the owner and is the only account allowed to register
//! or unregister users. Registered users append `(hash, file name)` records
//! to their own list; the owner and the user themselves may read it back.
//!
//! ## Lifecycle
//!
//! 1. **Initialize** — the deployer becomes the owner and is registered.
//! 2. **Register / Unregister** — owner-only membership changes. The owner
//!    can never be unregistered.
//! 3. **Add hash** — a registered caller appends a [`UserFile`] stamped
//!    with the block time.
//!
//! File lists are append-only. Unregistering an account does not remove
//! its records; it only stops further writes.
//!
//! ## Atomicity
//!
//! Every operation validates all of its preconditions before it mutates
//! anything, so a failed call leaves both state and the event buffer
//! exactly as they were. The host relies on this to execute calls in place
//! on its live state and treat a failed call as a revert.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::address::Address;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Reasons a registry call is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RegistryError {
    /// The caller lacks the privilege the operation requires.
    #[error("unauthorized: {caller} may not perform this call")]
    Unauthorized {
        /// The rejected caller.
        caller: Address,
    },

    /// The target account is already registered.
    #[error("user {0} is already registered")]
    AlreadyRegistered(Address),

    /// The owner account cannot be unregistered.
    #[error("cannot unregister the owner")]
    CannotRemoveOwner,

    /// The caller is not a registered user.
    #[error("user {0} is not registered")]
    NotRegistered(Address),

    /// The content identifier was empty.
    #[error("IPFS hash cannot be empty")]
    EmptyHash,
}

impl RegistryError {
    /// Stable, machine-friendly name of the error kind. Used for metric
    /// labels and API error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::Unauthorized { .. } => "unauthorized",
            RegistryError::AlreadyRegistered(_) => "already_registered",
            RegistryError::CannotRemoveOwner => "cannot_remove_owner",
            RegistryError::NotRegistered(_) => "not_registered",
            RegistryError::EmptyHash => "empty_hash",
        }
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Who is calling and when. Supplied by the host for every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// The account that signed the transaction (or issued the read).
    pub caller: Address,
    /// Block time in seconds since the Unix epoch.
    pub timestamp: u64,
}

impl CallContext {
    /// Builds a context with an explicit block time.
    pub fn new(caller: Address, timestamp: u64) -> Self {
        Self { caller, timestamp }
    }

    /// Builds a context stamped with the current wall-clock time.
    pub fn now(caller: Address) -> Self {
        let timestamp = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
        Self { caller, timestamp }
    }
}

/// A single stored file record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserFile {
    /// Content identifier returned by the pinning service.
    pub ipfs_hash: String,
    /// Original file name as supplied by the uploader.
    pub file_name: String,
    /// Block time at which the record was written.
    pub timestamp: u64,
}

/// Notifications emitted by successful state-changing calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// The owner registered a new user.
    UserRegistered { user: Address },
    /// The owner removed a user's registration.
    UserUnregistered { user: Address },
    /// A registered user recorded a new content identifier.
    HashAdded {
        caller: Address,
        #[serde(rename = "hash")]
        ipfs_hash: String,
        #[serde(rename = "fileName")]
        file_name: String,
    },
}

impl std::fmt::Display for RegistryEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryEvent::UserRegistered { user } => write!(f, "UserRegistered({})", user),
            RegistryEvent::UserUnregistered { user } => write!(f, "UserUnregistered({})", user),
            RegistryEvent::HashAdded {
                caller,
                ipfs_hash,
                file_name,
            } => write!(f, "HashAdded({}, {}, {})", caller, ipfs_hash, file_name),
        }
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The registry contract state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpfsHashStorage {
    owner: Address,
    registered_users: BTreeSet<Address>,
    user_files: BTreeMap<Address, Vec<UserFile>>,
    /// Events emitted by calls since the last [`drain_events`](Self::drain_events).
    #[serde(skip)]
    pending_events: Vec<RegistryEvent>,
}

impl IpfsHashStorage {
    /// Deploys a fresh contract. The caller becomes the owner and is
    /// registered immediately.
    pub fn initialize(ctx: &CallContext) -> Self {
        let mut registered_users = BTreeSet::new();
        registered_users.insert(ctx.caller);
        Self {
            owner: ctx.caller,
            registered_users,
            user_files: BTreeMap::new(),
            pending_events: Vec::new(),
        }
    }

    /// Rebuilds a contract from persisted parts. The owner is always
    /// registered, whether or not `registered_users` lists it.
    pub fn restore(
        owner: Address,
        mut registered_users: BTreeSet<Address>,
        user_files: BTreeMap<Address, Vec<UserFile>>,
    ) -> Self {
        registered_users.insert(owner);
        Self {
            owner,
            registered_users,
            user_files,
            pending_events: Vec::new(),
        }
    }

    /// The account that deployed the contract.
    pub fn owner(&self) -> Address {
        self.owner
    }

    fn is_owner(&self, caller: &Address) -> bool {
        *caller == self.owner
    }

    fn is_self_or_owner(&self, caller: &Address, target: &Address) -> bool {
        caller == target || self.is_owner(caller)
    }

    fn require_owner(&self, ctx: &CallContext) -> Result<(), RegistryError> {
        if self.is_owner(&ctx.caller) {
            Ok(())
        } else {
            Err(RegistryError::Unauthorized { caller: ctx.caller })
        }
    }

    /// Registers `target`. Owner only.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unauthorized`] for any caller but the owner.
    /// Returns [`RegistryError::AlreadyRegistered`] if `target` is a member.
    pub fn register_user(&mut self, ctx: &CallContext, target: Address) -> Result<(), RegistryError> {
        self.require_owner(ctx)?;
        if self.registered_users.contains(&target) {
            return Err(RegistryError::AlreadyRegistered(target));
        }

        self.registered_users.insert(target);
        self.pending_events
            .push(RegistryEvent::UserRegistered { user: target });
        Ok(())
    }

    /// Removes `target` from the registered set. Owner only.
    ///
    /// Unregistering an account that is not registered succeeds without
    /// changing anything and emits no event. Stored files are kept.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unauthorized`] for any caller but the owner.
    /// Returns [`RegistryError::CannotRemoveOwner`] if `target` is the owner.
    pub fn unregister_user(
        &mut self,
        ctx: &CallContext,
        target: Address,
    ) -> Result<(), RegistryError> {
        self.require_owner(ctx)?;
        if self.is_owner(&target) {
            return Err(RegistryError::CannotRemoveOwner);
        }

        if self.registered_users.remove(&target) {
            self.pending_events
                .push(RegistryEvent::UserUnregistered { user: target });
        }
        Ok(())
    }

    /// Appends a file record to the caller's list and emits
    /// [`RegistryEvent::HashAdded`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] if the caller is not a member.
    /// Returns [`RegistryError::EmptyHash`] if `ipfs_hash` is empty.
    pub fn add_hash(
        &mut self,
        ctx: &CallContext,
        ipfs_hash: String,
        file_name: String,
    ) -> Result<(), RegistryError> {
        if !self.registered_users.contains(&ctx.caller) {
            return Err(RegistryError::NotRegistered(ctx.caller));
        }
        if ipfs_hash.is_empty() {
            return Err(RegistryError::EmptyHash);
        }

        self.user_files
            .entry(ctx.caller)
            .or_default()
            .push(UserFile {
                ipfs_hash: ipfs_hash.clone(),
                file_name: file_name.clone(),
                timestamp: ctx.timestamp,
            });
        self.pending_events.push(RegistryEvent::HashAdded {
            caller: ctx.caller,
            ipfs_hash,
            file_name,
        });
        Ok(())
    }

    /// Returns every file `target` has recorded, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unauthorized`] unless the caller is `target`
    /// or the owner.
    pub fn get_user_files(
        &self,
        ctx: &CallContext,
        target: &Address,
    ) -> Result<Vec<UserFile>, RegistryError> {
        if !self.is_self_or_owner(&ctx.caller, target) {
            return Err(RegistryError::Unauthorized { caller: ctx.caller });
        }
        Ok(self.user_files.get(target).cloned().unwrap_or_default())
    }

    /// Number of files `target` has recorded. Unrestricted.
    pub fn get_user_file_count(&self, target: &Address) -> u64 {
        self.user_files
            .get(target)
            .map(|files| files.len() as u64)
            .unwrap_or(0)
    }

    /// Whether `address` is currently registered. Unrestricted.
    pub fn is_user_registered(&self, address: &Address) -> bool {
        self.registered_users.contains(address)
    }

    /// Number of registered accounts, owner included.
    pub fn registered_count(&self) -> usize {
        self.registered_users.len()
    }

    /// Total number of file records across all accounts.
    pub fn total_files(&self) -> u64 {
        self.user_files.values().map(|files| files.len() as u64).sum()
    }

    /// Takes the events emitted since the previous call to this method.
    pub fn drain_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.pending_events)
    }
}
