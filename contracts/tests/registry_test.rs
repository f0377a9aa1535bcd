//! Integration tests for the IPFS hash storage contract.
//!
//! These tests walk the contract through the same scenarios a deployment
//! sees: deploy, register users, record hashes, read them back, and the
//! access-control failures in between. Each test deploys its own contract.

use ipfs_storage_contracts::{
    Address, CallContext, IpfsHashStorage, RegistryError, RegistryEvent, UserFile,
};

const TEST_HASH: &str = "QmTest123";
const TEST_FILE_NAME: &str = "test.txt";

struct Accounts {
    owner: Address,
    user1: Address,
    user2: Address,
}

/// Helper: deploys a fresh contract with three well-known accounts.
fn deploy() -> (IpfsHashStorage, Accounts) {
    let accounts = Accounts {
        owner: Address::from_public_key(&[1u8; 32]),
        user1: Address::from_public_key(&[2u8; 32]),
        user2: Address::from_public_key(&[3u8; 32]),
    };
    let contract = IpfsHashStorage::initialize(&CallContext::new(accounts.owner, 1_000));
    (contract, accounts)
}

fn as_caller(caller: Address) -> CallContext {
    CallContext::new(caller, 1_000)
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

#[test]
fn deployer_becomes_owner() {
    let (c, a) = deploy();
    assert_eq!(c.owner(), a.owner);
}

#[test]
fn only_owner_registered_after_deploy() {
    let (c, a) = deploy();
    assert!(c.is_user_registered(&a.owner));
    assert!(!c.is_user_registered(&a.user1));
    assert!(!c.is_user_registered(&a.user2));
    assert!(!c.is_user_registered(&Address::ZERO));
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

#[test]
fn owner_registers_user() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    assert!(c.is_user_registered(&a.user1));
}

#[test]
fn non_owner_cannot_register() {
    let (mut c, a) = deploy();
    let err = c.register_user(&as_caller(a.user1), a.user2).unwrap_err();
    assert_eq!(err, RegistryError::Unauthorized { caller: a.user1 });
    assert!(!c.is_user_registered(&a.user2));
}

#[test]
fn registered_user_still_cannot_register_others() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    let err = c.register_user(&as_caller(a.user1), a.user2).unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));
}

#[test]
fn double_registration_rejected() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    let err = c.register_user(&as_caller(a.owner), a.user1).unwrap_err();
    assert_eq!(err, RegistryError::AlreadyRegistered(a.user1));
}

// ---------------------------------------------------------------------------
// Unregistration
// ---------------------------------------------------------------------------

#[test]
fn owner_unregisters_user() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    c.drain_events();

    c.unregister_user(&as_caller(a.owner), a.user1).unwrap();
    assert!(!c.is_user_registered(&a.user1));
    assert_eq!(
        c.drain_events(),
        vec![RegistryEvent::UserUnregistered { user: a.user1 }]
    );
}

#[test]
fn owner_cannot_be_unregistered_by_anyone() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();

    let err = c.unregister_user(&as_caller(a.owner), a.owner).unwrap_err();
    assert_eq!(err, RegistryError::CannotRemoveOwner);

    // A non-owner hits the privilege check first.
    let err = c.unregister_user(&as_caller(a.user1), a.owner).unwrap_err();
    assert!(matches!(err, RegistryError::Unauthorized { .. }));

    assert!(c.is_user_registered(&a.owner));
}

#[test]
fn non_owner_cannot_unregister() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    let err = c.unregister_user(&as_caller(a.user1), a.user2).unwrap_err();
    assert_eq!(err, RegistryError::Unauthorized { caller: a.user1 });
}

#[test]
fn unregistering_non_member_is_idempotent() {
    let (mut c, a) = deploy();
    c.unregister_user(&as_caller(a.owner), a.user2).unwrap();
    c.unregister_user(&as_caller(a.owner), a.user2).unwrap();
    assert!(!c.is_user_registered(&a.user2));
    assert!(c.drain_events().is_empty());
}

#[test]
fn user_can_be_registered_again_after_removal() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    c.unregister_user(&as_caller(a.owner), a.user1).unwrap();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    assert!(c.is_user_registered(&a.user1));
}

// ---------------------------------------------------------------------------
// Hash storage
// ---------------------------------------------------------------------------

#[test]
fn registered_user_adds_hash() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    c.drain_events();

    let ctx = CallContext::new(a.user1, 1_700_000_000);
    c.add_hash(&ctx, TEST_HASH.into(), TEST_FILE_NAME.into())
        .unwrap();

    let files = c.get_user_files(&as_caller(a.user1), &a.user1).unwrap();
    assert_eq!(
        files,
        vec![UserFile {
            ipfs_hash: TEST_HASH.into(),
            file_name: TEST_FILE_NAME.into(),
            timestamp: 1_700_000_000,
        }]
    );
    assert_eq!(
        c.drain_events(),
        vec![RegistryEvent::HashAdded {
            caller: a.user1,
            ipfs_hash: TEST_HASH.into(),
            file_name: TEST_FILE_NAME.into(),
        }]
    );
}

#[test]
fn unregistered_user_cannot_add_hash() {
    let (mut c, a) = deploy();
    let err = c
        .add_hash(&as_caller(a.user2), TEST_HASH.into(), TEST_FILE_NAME.into())
        .unwrap_err();
    assert_eq!(err, RegistryError::NotRegistered(a.user2));
    assert_eq!(c.get_user_file_count(&a.user2), 0);
}

#[test]
fn empty_hash_rejected() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    let err = c
        .add_hash(&as_caller(a.user1), String::new(), TEST_FILE_NAME.into())
        .unwrap_err();
    assert_eq!(err, RegistryError::EmptyHash);
    assert_eq!(c.get_user_file_count(&a.user1), 0);
}

#[test]
fn each_add_increments_count_by_one() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    for i in 0..5u64 {
        assert_eq!(c.get_user_file_count(&a.user1), i);
        c.add_hash(&as_caller(a.user1), format!("Qm{i}"), format!("f{i}"))
            .unwrap();
    }
    assert_eq!(c.get_user_file_count(&a.user1), 5);
}

#[test]
fn files_returned_in_insertion_order() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    let names = ["b.txt", "a.txt", "c.txt"];
    for (i, name) in names.iter().enumerate() {
        let ctx = CallContext::new(a.user1, 10 + i as u64);
        c.add_hash(&ctx, format!("Qm{name}"), name.to_string())
            .unwrap();
    }
    let files = c.get_user_files(&as_caller(a.owner), &a.user1).unwrap();
    let got: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
    assert_eq!(got, names);
    let stamps: Vec<_> = files.iter().map(|f| f.timestamp).collect();
    assert_eq!(stamps, vec![10, 11, 12]);
}

#[test]
fn duplicate_hashes_are_recorded_separately() {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    c.add_hash(&as_caller(a.user1), TEST_HASH.into(), "one".into())
        .unwrap();
    c.add_hash(&as_caller(a.user1), TEST_HASH.into(), "two".into())
        .unwrap();
    assert_eq!(c.get_user_file_count(&a.user1), 2);
}

#[test]
fn owner_can_add_hash_without_registration_call() {
    let (mut c, a) = deploy();
    c.add_hash(&as_caller(a.owner), TEST_HASH.into(), TEST_FILE_NAME.into())
        .unwrap();
    assert_eq!(c.get_user_file_count(&a.owner), 1);
}

// ---------------------------------------------------------------------------
// File access
// ---------------------------------------------------------------------------

fn with_one_file() -> (IpfsHashStorage, Accounts) {
    let (mut c, a) = deploy();
    c.register_user(&as_caller(a.owner), a.user1).unwrap();
    c.add_hash(&as_caller(a.user1), TEST_HASH.into(), TEST_FILE_NAME.into())
        .unwrap();
    (c, a)
}

#[test]
fn user_reads_own_files() {
    let (c, a) = with_one_file();
    let files = c.get_user_files(&as_caller(a.user1), &a.user1).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].ipfs_hash, TEST_HASH);
}

#[test]
fn owner_reads_any_users_files() {
    let (c, a) = with_one_file();
    let files = c.get_user_files(&as_caller(a.owner), &a.user1).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].ipfs_hash, TEST_HASH);
}

#[test]
fn third_party_cannot_read_files() {
    let (c, a) = with_one_file();
    let err = c
        .get_user_files(&as_caller(a.user2), &a.user1)
        .unwrap_err();
    assert_eq!(err, RegistryError::Unauthorized { caller: a.user2 });
}

#[test]
fn file_count_is_public() {
    let (c, a) = with_one_file();
    assert_eq!(c.get_user_file_count(&a.user1), 1);
    assert_eq!(c.get_user_file_count(&a.user2), 0);
}

#[test]
fn reading_empty_list_returns_empty() {
    let (c, a) = deploy();
    let files = c.get_user_files(&as_caller(a.user2), &a.user2).unwrap();
    assert!(files.is_empty());
}

#[test]
fn files_survive_unregistration() {
    let (mut c, a) = with_one_file();
    c.unregister_user(&as_caller(a.owner), a.user1).unwrap();

    assert!(!c.is_user_registered(&a.user1));
    let files = c.get_user_files(&as_caller(a.owner), &a.user1).unwrap();
    assert_eq!(files.len(), 1);

    // Further writes are refused, the old record stays.
    let err = c
        .add_hash(&as_caller(a.user1), "QmLater".into(), "later.txt".into())
        .unwrap_err();
    assert_eq!(err, RegistryError::NotRegistered(a.user1));
    assert_eq!(c.get_user_file_count(&a.user1), 1);
}

#[test]
fn unregistered_user_still_reads_own_files() {
    let (mut c, a) = with_one_file();
    c.unregister_user(&as_caller(a.owner), a.user1).unwrap();
    let files = c.get_user_files(&as_caller(a.user1), &a.user1).unwrap();
    assert_eq!(files.len(), 1);
}
