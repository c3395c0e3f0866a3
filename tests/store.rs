//! Integration tests for the SQLite store: ownership cascades, permission
//! uniqueness, document-collection transactionality, and reconciliation
//! against the identity directory.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use bibstack::error::Error;
use bibstack::store::{SCHEMA_HEX, SqliteStore, Store};
use bibstack::sync::{self, Directory, SqliteDirectory};
use bibstack::types::{AccessFlags, Library, User};
use tempfile::TempDir;

fn open_store(dir: &Path) -> SqliteStore {
    let store = SqliteStore::new(dir.join("bibstack.db")).unwrap();
    store.initialize().unwrap();
    store
}

fn codes(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn create_owned_library(store: &SqliteStore, owner: &User, name: &str) -> Library {
    let library = Library::new(name, None, false);
    store.create_library(owner.id, &library).unwrap();
    library
}

/// Builds an upstream accounts database holding the given identity numbers.
fn write_directory_db(path: &Path, uids: &[i64]) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY)")
        .unwrap();
    for uid in uids {
        conn.execute("INSERT INTO users (id) VALUES (?1)", [uid])
            .unwrap();
    }
}

struct UnreachableDirectory;

impl Directory for UnreachableDirectory {
    fn valid_uids(&self) -> bibstack::error::Result<HashSet<i64>> {
        Err(Error::DirectoryUnreachable("connection refused".to_string()))
    }
}

#[test]
fn test_create_library_creates_owner_permission() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let library = create_owned_library(&store, &owner, "reading list");

    let permission = store
        .get_permission(owner.id, &library.id)
        .unwrap()
        .unwrap();
    assert_eq!(permission.flags, AccessFlags::owner());

    let fetched = store.get_library(&library.id).unwrap().unwrap();
    assert_eq!(fetched.name, "reading list");
    assert!(fetched.bibcodes.is_empty());
}

#[test]
fn test_create_library_requires_existing_owner() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let library = Library::new("orphan", None, false);
    assert!(matches!(
        store.create_library(999, &library),
        Err(Error::NotFound)
    ));
    assert!(store.get_library(&library.id).unwrap().is_none());
}

#[test]
fn test_duplicate_permission_rejected_and_row_unchanged() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let guest = store.create_user(200).unwrap();
    let library = create_owned_library(&store, &owner, "shared");

    store
        .create_permission(guest.id, &library.id, AccessFlags::read_only())
        .unwrap();

    let duplicate = store.create_permission(guest.id, &library.id, AccessFlags::read_write());
    assert!(matches!(duplicate, Err(Error::AlreadyExists)));

    let existing = store.get_permission(guest.id, &library.id).unwrap().unwrap();
    assert_eq!(existing.flags, AccessFlags::read_only());
}

#[test]
fn test_permission_on_missing_references_is_not_found() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let library = create_owned_library(&store, &owner, "mine");

    let missing_user = store.create_permission(999, &library.id, AccessFlags::read_only());
    assert!(matches!(missing_user, Err(Error::NotFound)));

    let ghost = Library::new("ghost", None, false);
    let missing_library = store.create_permission(owner.id, &ghost.id, AccessFlags::read_only());
    assert!(matches!(missing_library, Err(Error::NotFound)));
}

#[test]
fn test_update_permission_changes_flags_in_place() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let guest = store.create_user(200).unwrap();
    let library = create_owned_library(&store, &owner, "shared");

    store
        .create_permission(guest.id, &library.id, AccessFlags::read_only())
        .unwrap();
    store
        .update_permission(guest.id, &library.id, AccessFlags::read_write())
        .unwrap();

    let updated = store.get_permission(guest.id, &library.id).unwrap().unwrap();
    assert_eq!(updated.flags, AccessFlags::read_write());

    let ghost = Library::new("ghost", None, false);
    assert!(matches!(
        store.update_permission(guest.id, &ghost.id, AccessFlags::read_only()),
        Err(Error::NotFound)
    ));
}

#[test]
fn test_revoke_missing_permission_is_not_found() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let guest = store.create_user(200).unwrap();
    let library = create_owned_library(&store, &owner, "private");

    assert!(matches!(
        store.revoke_permission(guest.id, &library.id),
        Err(Error::NotFound)
    ));
}

#[test]
fn test_delete_library_cascades_permissions() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let guests: Vec<User> = (1..=3)
        .map(|n| store.create_user(200 + n).unwrap())
        .collect();
    let library = create_owned_library(&store, &owner, "doomed");
    for guest in &guests {
        store
            .create_permission(guest.id, &library.id, AccessFlags::read_only())
            .unwrap();
    }
    assert_eq!(store.list_library_permissions(&library.id).unwrap().len(), 4);

    store.delete_library(&library.id).unwrap();

    assert!(store.get_library(&library.id).unwrap().is_none());
    assert!(store.list_library_permissions(&library.id).unwrap().is_empty());
    for guest in &guests {
        assert!(store.get_permission(guest.id, &library.id).unwrap().is_none());
        assert!(matches!(
            store.revoke_permission(guest.id, &library.id),
            Err(Error::NotFound)
        ));
    }

    assert!(matches!(
        store.delete_library(&library.id),
        Err(Error::NotFound)
    ));
}

#[test]
fn test_document_mutations_persist_and_bump_last_modified() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let library = create_owned_library(&store, &owner, "papers");

    let before = store.get_library(&library.id).unwrap().unwrap();
    std::thread::sleep(Duration::from_millis(10));

    store
        .append_document(&library.id, "2019A&A...622A.195B")
        .unwrap();
    store
        .extend_documents(&library.id, &codes(&["2020ApJ...900L..13A", "2021MNRAS.500.1708B"]))
        .unwrap();
    store
        .remove_document(&library.id, "2020ApJ...900L..13A")
        .unwrap();

    // Re-open to prove the list survives a fresh connection.
    drop(store);
    let store = SqliteStore::new(temp.path().join("bibstack.db")).unwrap();

    let after = store.get_library(&library.id).unwrap().unwrap();
    assert_eq!(
        after.bibcodes.as_slice(),
        codes(&["2019A&A...622A.195B", "2021MNRAS.500.1708B"])
    );
    assert!(after.date_last_modified > before.date_last_modified);
}

#[test]
fn test_noop_upsert_still_bumps_last_modified() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let library = create_owned_library(&store, &owner, "papers");
    store
        .extend_documents(&library.id, &codes(&["1", "2", "3", "4"]))
        .unwrap();

    let before = store.get_library(&library.id).unwrap().unwrap();
    std::thread::sleep(Duration::from_millis(10));

    // Every value already present; the list is unchanged but still flushed.
    store
        .upsert_documents(&library.id, &codes(&["1", "2", "3"]))
        .unwrap();

    let after = store.get_library(&library.id).unwrap().unwrap();
    assert_eq!(after.bibcodes.as_slice(), codes(&["1", "2", "3", "4"]));
    assert!(after.date_last_modified > before.date_last_modified);
}

#[test]
fn test_upsert_dedups_input_and_skips_existing() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let library = create_owned_library(&store, &owner, "papers");

    store
        .extend_documents(&library.id, &codes(&["1", "2", "3"]))
        .unwrap();
    store
        .upsert_documents(&library.id, &codes(&["2", "2", "3", "4", "4"]))
        .unwrap();

    let after = store.get_library(&library.id).unwrap().unwrap();
    assert_eq!(after.bibcodes.as_slice(), codes(&["1", "2", "3", "4"]));
}

#[test]
fn test_failed_shorten_rolls_back_entirely() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let library = create_owned_library(&store, &owner, "papers");
    store
        .extend_documents(&library.id, &codes(&["a", "b", "c"]))
        .unwrap();
    let before = store.get_library(&library.id).unwrap().unwrap();

    let result = store.shorten_documents(&library.id, &codes(&["a", "missing", "c"]));
    assert!(matches!(result, Err(Error::NotFound)));

    // In memory the list was partially shortened; the transaction was not.
    let after = store.get_library(&library.id).unwrap().unwrap();
    assert_eq!(after.bibcodes.as_slice(), codes(&["a", "b", "c"]));
    assert_eq!(after.date_last_modified, before.date_last_modified);
}

#[test]
fn test_document_ops_on_missing_library_are_not_found() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let ghost = Library::new("ghost", None, false);
    assert!(matches!(
        store.append_document(&ghost.id, "x"),
        Err(Error::NotFound)
    ));
}

#[test]
fn test_reconcile_purges_stale_user_and_owned_library() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let alice = store.create_user(1).unwrap();
    let bob = store.create_user(2).unwrap();

    let alices = create_owned_library(&store, &alice, "alice's");
    let bobs = create_owned_library(&store, &bob, "bob's");
    store
        .create_permission(alice.id, &bobs.id, AccessFlags::read_only())
        .unwrap();

    // Only alice remains upstream.
    let directory_path = temp.path().join("accounts.db");
    write_directory_db(&directory_path, &[1]);
    let report = sync::run(&store, &SqliteDirectory::new(&directory_path)).unwrap();

    assert_eq!(report.users_examined, 2);
    assert_eq!(report.stale_users, 1);
    assert_eq!(report.users_deleted, 1);
    assert_eq!(report.libraries_deleted, 1);
    assert_eq!(report.permissions_deleted, 2);
    assert_eq!(report.failures, 0);

    assert!(store.get_user(bob.id).unwrap().is_none());
    assert!(store.get_library(&bobs.id).unwrap().is_none());
    assert!(store.list_library_permissions(&bobs.id).unwrap().is_empty());

    assert!(store.get_user(alice.id).unwrap().is_some());
    assert!(store.get_library(&alices.id).unwrap().is_some());
    assert!(store.get_permission(alice.id, &alices.id).unwrap().is_some());
}

#[test]
fn test_reconcile_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let alice = store.create_user(1).unwrap();
    let bob = store.create_user(2).unwrap();
    create_owned_library(&store, &bob, "bob's");

    let directory_path = temp.path().join("accounts.db");
    write_directory_db(&directory_path, &[1]);
    let directory = SqliteDirectory::new(&directory_path);

    sync::run(&store, &directory).unwrap();
    let second = sync::run(&store, &directory).unwrap();

    assert_eq!(second.users_examined, 1);
    assert_eq!(second.stale_users, 0);
    assert_eq!(second.users_deleted, 0);
    assert!(store.get_user(alice.id).unwrap().is_some());
}

#[test]
fn test_unreachable_directory_aborts_before_any_deletion() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let bob = store.create_user(2).unwrap();
    let bobs = create_owned_library(&store, &bob, "bob's");

    let result = sync::run(&store, &UnreachableDirectory);
    assert!(matches!(result, Err(Error::DirectoryUnreachable(_))));

    assert!(store.get_user(bob.id).unwrap().is_some());
    assert!(store.get_library(&bobs.id).unwrap().is_some());
    assert!(store.get_permission(bob.id, &bobs.id).unwrap().is_some());
}

#[test]
fn test_reconcile_skips_user_on_constraint_and_commits_the_rest() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let alice = store.create_user(1).unwrap();
    let bob = store.create_user(2).unwrap();
    let carol = store.create_user(3).unwrap();

    let alices = create_owned_library(&store, &alice, "alice's");
    let bobs = create_owned_library(&store, &bob, "bob's");

    // Carol owns nothing but still holds access to alice's library, so her
    // user row cannot be deleted without violating the foreign key.
    store
        .create_permission(carol.id, &alices.id, AccessFlags::read_only())
        .unwrap();

    let directory_path = temp.path().join("accounts.db");
    write_directory_db(&directory_path, &[1]);
    let report = sync::run(&store, &SqliteDirectory::new(&directory_path)).unwrap();

    assert_eq!(report.stale_users, 2);
    assert_eq!(report.users_deleted, 1);
    assert_eq!(report.failures, 1);

    // Bob's purge committed despite carol's failure.
    assert!(store.get_user(bob.id).unwrap().is_none());
    assert!(store.get_library(&bobs.id).unwrap().is_none());

    // Carol was rolled back, grant intact.
    assert!(store.get_user(carol.id).unwrap().is_some());
    assert!(store.get_permission(carol.id, &alices.id).unwrap().is_some());
}

#[test]
fn test_hex_binding_round_trip() {
    let temp = TempDir::new().unwrap();
    let store = SqliteStore::new(temp.path().join("hex.db")).unwrap();
    store.initialize_with_schema(SCHEMA_HEX).unwrap();

    let owner = store.create_user(100).unwrap();
    let library = create_owned_library(&store, &owner, "hex-keyed");
    store.append_document(&library.id, "2019A&A...622A.195B").unwrap();

    let fetched = store.get_library(&library.id).unwrap().unwrap();
    assert_eq!(fetched.id, library.id);
    assert_eq!(fetched.bibcodes.as_slice(), codes(&["2019A&A...622A.195B"]));

    // The persisted key is the 32-character lowercase hex form.
    let stored: String = store
        .connection()
        .query_row("SELECT id FROM libraries", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, library.id.to_hex());
    assert_eq!(stored.len(), 32);
}

#[test]
fn test_binary_binding_stores_raw_bytes() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let owner = store.create_user(100).unwrap();
    let library = create_owned_library(&store, &owner, "blob-keyed");

    let stored: Vec<u8> = store
        .connection()
        .query_row("SELECT id FROM libraries", [], |row| row.get(0))
        .unwrap();
    assert_eq!(stored, library.id.as_bytes());
}

#[test]
fn test_list_user_libraries_follows_permissions() {
    let temp = TempDir::new().unwrap();
    let store = open_store(temp.path());

    let alice = store.create_user(1).unwrap();
    let bob = store.create_user(2).unwrap();

    create_owned_library(&store, &alice, "alice's");
    let bobs = create_owned_library(&store, &bob, "bob's");
    store
        .create_permission(alice.id, &bobs.id, AccessFlags::read_only())
        .unwrap();

    let names: Vec<String> = store
        .list_user_libraries(alice.id)
        .unwrap()
        .into_iter()
        .map(|l| l.name)
        .collect();
    assert_eq!(names, vec!["alice's".to_string(), "bob's".to_string()]);

    assert_eq!(store.list_user_libraries(bob.id).unwrap().len(), 1);
}
