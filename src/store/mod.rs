mod schema;
mod sqlite;

pub use schema::{DROP_SCHEMA, SCHEMA, SCHEMA_HEX};
pub use sqlite::SqliteStore;

use std::collections::HashSet;

use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::sync::SyncReport;
use crate::types::*;

/// Physical representation of a library identifier in the active backend.
///
/// Selected once per store from the declared type of `libraries.id` in the
/// live schema, never by sniffing individual values. `Binary` persists the
/// raw 16 bytes; `Hex` persists the 32-character lowercase hex string for
/// storage without raw 128-bit key support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdBinding {
    Binary,
    Hex,
}

impl IdBinding {
    /// Reads the backend capability from the live schema.
    pub fn detect(conn: &Connection) -> Result<Self> {
        let declared: Option<String> = conn
            .query_row(
                "SELECT type FROM pragma_table_info('libraries') WHERE name = 'id'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match declared {
            Some(ty) if ty.eq_ignore_ascii_case("BLOB") => Ok(IdBinding::Binary),
            Some(_) => Ok(IdBinding::Hex),
            None => Err(Error::Config(
                "libraries table missing; initialize the store first".to_string(),
            )),
        }
    }

    /// Converts an identifier to the parameter value the backend expects.
    #[must_use]
    pub fn bind(self, id: &LibraryId) -> Value {
        match self {
            IdBinding::Binary => Value::Blob(id.as_bytes().to_vec()),
            IdBinding::Hex => Value::Text(id.to_hex()),
        }
    }

    /// Reads an identifier back out of a column value.
    pub fn read(self, index: usize, value: ValueRef<'_>) -> rusqlite::Result<LibraryId> {
        let conversion_failure = |e: Error| {
            rusqlite::Error::FromSqlConversionFailure(index, value.data_type(), Box::new(e))
        };

        match self {
            IdBinding::Binary => {
                let bytes = value.as_blob().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(index, value.data_type(), Box::new(e))
                })?;
                LibraryId::from_bytes(bytes).map_err(conversion_failure)
            }
            IdBinding::Hex => {
                let text = value.as_str().map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(index, value.data_type(), Box::new(e))
                })?;
                LibraryId::from_hex(text).map_err(conversion_failure)
            }
        }
    }
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    /// Creates the full schema.
    fn initialize(&self) -> Result<()>;

    /// Drops the full schema, destroying all stored data.
    fn destroy(&self) -> Result<()>;

    // User operations
    fn create_user(&self, external_uid: i64) -> Result<User>;
    fn get_user(&self, id: i64) -> Result<Option<User>>;
    fn get_user_by_external_uid(&self, external_uid: i64) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;
    fn delete_user(&self, id: i64) -> Result<()>;

    // Library operations
    fn create_library(&self, owner_id: i64, library: &Library) -> Result<()>;
    fn get_library(&self, id: &LibraryId) -> Result<Option<Library>>;
    fn list_user_libraries(&self, user_id: i64) -> Result<Vec<Library>>;
    fn update_library(&self, library: &Library) -> Result<()>;
    fn delete_library(&self, id: &LibraryId) -> Result<()>;

    // Document collection operations; each runs in one transaction that
    // also bumps date_last_modified when the list reports itself dirty
    fn append_document(&self, id: &LibraryId, bibcode: &str) -> Result<()>;
    fn remove_document(&self, id: &LibraryId, bibcode: &str) -> Result<()>;
    fn extend_documents(&self, id: &LibraryId, bibcodes: &[String]) -> Result<()>;
    fn shorten_documents(&self, id: &LibraryId, bibcodes: &[String]) -> Result<()>;
    fn upsert_documents(&self, id: &LibraryId, bibcodes: &[String]) -> Result<()>;

    // Permission operations
    fn create_permission(
        &self,
        user_id: i64,
        library_id: &LibraryId,
        flags: AccessFlags,
    ) -> Result<Permission>;
    fn get_permission(&self, user_id: i64, library_id: &LibraryId) -> Result<Option<Permission>>;
    fn update_permission(
        &self,
        user_id: i64,
        library_id: &LibraryId,
        flags: AccessFlags,
    ) -> Result<()>;
    fn revoke_permission(&self, user_id: i64, library_id: &LibraryId) -> Result<()>;
    fn list_library_permissions(&self, library_id: &LibraryId) -> Result<Vec<Permission>>;
    fn list_user_permissions(&self, user_id: i64) -> Result<Vec<Permission>>;

    /// Deletes every local user whose external identity number is absent
    /// from `valid_uids`, tearing down their owned libraries first. A
    /// constraint failure rolls back that user only; the successful subset
    /// is committed at the end.
    fn reconcile_users(&self, valid_uids: &HashSet<i64>) -> Result<SyncReport>;
}
