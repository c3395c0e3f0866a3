use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::schema::{DROP_SCHEMA, SCHEMA};
use super::{IdBinding, Store};
use crate::error::{Error, Result};
use crate::sync::SyncReport;
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    binding: OnceLock<IdBinding>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
            binding: OnceLock::new(),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }

    /// Creates the schema from a caller-supplied DDL batch. Deployments
    /// migrated from text-keyed storage initialize with `SCHEMA_HEX`.
    pub fn initialize_with_schema(&self, schema: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(schema)?;
        let binding = IdBinding::detect(&conn)?;
        let _ = self.binding.set(binding);
        Ok(())
    }

    /// The identifier binding for this store, detected once from the live
    /// schema and cached.
    fn id_binding(&self, conn: &Connection) -> Result<IdBinding> {
        if let Some(binding) = self.binding.get() {
            return Ok(*binding);
        }
        let binding = IdBinding::detect(conn)?;
        let _ = self.binding.set(binding);
        Ok(binding)
    }

    /// Loads a library's document list, applies `apply`, and flushes the
    /// list together with `date_last_modified` iff the list reports itself
    /// dirty. One transaction end to end; any error rolls it back.
    fn mutate_documents<F>(&self, id: &LibraryId, apply: F) -> Result<()>
    where
        F: FnOnce(&mut BibcodeList) -> Result<()>,
    {
        let mut conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let tx = conn.transaction()?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT bibcodes FROM libraries WHERE id = ?1",
                params![binding.bind(id)],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or(Error::NotFound)?;
        let mut bibcodes: BibcodeList = serde_json::from_str(&raw)?;

        apply(&mut bibcodes)?;

        if bibcodes.take_dirty() {
            tx.execute(
                "UPDATE libraries SET bibcodes = ?1, date_last_modified = ?2 WHERE id = ?3",
                params![
                    serde_json::to_string(&bibcodes)?,
                    format_datetime(&Utc::now()),
                    binding.bind(id)
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

/// Maps storage-level integrity failures to `ConstraintViolation`,
/// passing every other database error through.
fn constraint_violation(e: rusqlite::Error) -> Error {
    match e {
        rusqlite::Error::SqliteFailure(err, msg)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::ConstraintViolation(msg.unwrap_or_else(|| "constraint violation".to_string()))
        }
        other => Error::Database(other),
    }
}

fn read_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        external_uid: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
    })
}

fn read_library(binding: IdBinding, row: &rusqlite::Row<'_>) -> rusqlite::Result<Library> {
    let raw: String = row.get(4)?;
    let bibcodes: BibcodeList = serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Library {
        id: binding.read(0, row.get_ref(0)?)?,
        name: row.get(1)?,
        description: row.get(2)?,
        public: row.get(3)?,
        bibcodes,
        date_created: parse_datetime(&row.get::<_, String>(5)?),
        date_last_modified: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn read_permission(binding: IdBinding, row: &rusqlite::Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: row.get(0)?,
        user_id: row.get(1)?,
        library_id: binding.read(2, row.get_ref(2)?)?,
        flags: AccessFlags {
            read: row.get(3)?,
            write: row.get(4)?,
            admin: row.get(5)?,
            owner: row.get(6)?,
        },
    })
}

struct Purged {
    libraries: usize,
    permissions: usize,
}

/// Tears down one stale user inside the caller's savepoint: every library
/// they own (permissions first, then the library row), then the user row.
/// Ownership of a library is the owner flag on the permission row; rows the
/// user holds on other owners' libraries are left alone, so the final user
/// delete fails on the foreign key if any exist.
fn purge_stale_user(conn: &Connection, binding: IdBinding, user_id: i64) -> Result<Purged> {
    let owned: Vec<LibraryId> = {
        let mut stmt =
            conn.prepare("SELECT library_id FROM permissions WHERE user_id = ?1 AND owner = 1")?;
        let rows = stmt.query_map(params![user_id], |row| binding.read(0, row.get_ref(0)?))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut purged = Purged {
        libraries: 0,
        permissions: 0,
    };

    for library_id in owned {
        purged.permissions += conn
            .execute(
                "DELETE FROM permissions WHERE library_id = ?1",
                params![binding.bind(&library_id)],
            )
            .map_err(constraint_violation)?;
        purged.libraries += conn
            .execute(
                "DELETE FROM libraries WHERE id = ?1",
                params![binding.bind(&library_id)],
            )
            .map_err(constraint_violation)?;
    }

    conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])
        .map_err(constraint_violation)?;

    Ok(purged)
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.initialize_with_schema(SCHEMA)
    }

    fn destroy(&self) -> Result<()> {
        self.conn().execute_batch(DROP_SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(&self, external_uid: i64) -> Result<User> {
        let conn = self.conn();
        let now = Utc::now();

        let result = conn.execute(
            "INSERT INTO users (external_uid, created_at) VALUES (?1, ?2)",
            params![external_uid, format_datetime(&now)],
        );

        match result {
            Ok(_) => Ok(User {
                id: conn.last_insert_rowid(),
                external_uid,
                created_at: now,
            }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::AlreadyExists)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, external_uid, created_at FROM users WHERE id = ?1",
            params![id],
            read_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_user_by_external_uid(&self, external_uid: i64) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, external_uid, created_at FROM users WHERE external_uid = ?1",
            params![external_uid],
            read_user,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id, external_uid, created_at FROM users ORDER BY id")?;

        let rows = stmt.query_map([], read_user)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_user(&self, id: i64) -> Result<()> {
        let conn = self.conn();
        let rows = conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])
            .map_err(constraint_violation)?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    // Library operations

    fn create_library(&self, owner_id: i64, library: &Library) -> Result<()> {
        let mut conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let tx = conn.transaction()?;

        let owner: Option<i64> = tx
            .query_row(
                "SELECT id FROM users WHERE id = ?1",
                params![owner_id],
                |row| row.get(0),
            )
            .optional()?;
        if owner.is_none() {
            return Err(Error::NotFound);
        }

        let result = tx.execute(
            "INSERT INTO libraries (id, name, description, public, bibcodes, date_created, date_last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                binding.bind(&library.id),
                library.name,
                library.description,
                library.public,
                serde_json::to_string(&library.bibcodes)?,
                format_datetime(&library.date_created),
                format_datetime(&library.date_last_modified),
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(Error::AlreadyExists);
            }
            Err(e) => return Err(Error::from(e)),
        }

        let flags = AccessFlags::owner();
        tx.execute(
            "INSERT INTO permissions (user_id, library_id, read, write, admin, owner)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                owner_id,
                binding.bind(&library.id),
                flags.read,
                flags.write,
                flags.admin,
                flags.owner
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn get_library(&self, id: &LibraryId) -> Result<Option<Library>> {
        let conn = self.conn();
        let binding = self.id_binding(&conn)?;
        conn.query_row(
            "SELECT id, name, description, public, bibcodes, date_created, date_last_modified
             FROM libraries WHERE id = ?1",
            params![binding.bind(id)],
            |row| read_library(binding, row),
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_user_libraries(&self, user_id: i64) -> Result<Vec<Library>> {
        let conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let mut stmt = conn.prepare(
            "SELECT l.id, l.name, l.description, l.public, l.bibcodes, l.date_created, l.date_last_modified
             FROM libraries l
             JOIN permissions p ON p.library_id = l.id
             WHERE p.user_id = ?1
             ORDER BY l.date_created",
        )?;

        let rows = stmt.query_map(params![user_id], |row| read_library(binding, row))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_library(&self, library: &Library) -> Result<()> {
        let conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let rows = conn.execute(
            "UPDATE libraries SET name = ?1, description = ?2, public = ?3, date_last_modified = ?4
             WHERE id = ?5",
            params![
                library.name,
                library.description,
                library.public,
                format_datetime(&Utc::now()),
                binding.bind(&library.id)
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_library(&self, id: &LibraryId) -> Result<()> {
        let mut conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM permissions WHERE library_id = ?1",
            params![binding.bind(id)],
        )?;

        let rows = tx.execute(
            "DELETE FROM libraries WHERE id = ?1",
            params![binding.bind(id)],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }

        tx.commit()?;
        Ok(())
    }

    // Document collection operations

    fn append_document(&self, id: &LibraryId, bibcode: &str) -> Result<()> {
        self.mutate_documents(id, |bibcodes| {
            bibcodes.append(bibcode);
            Ok(())
        })
    }

    fn remove_document(&self, id: &LibraryId, bibcode: &str) -> Result<()> {
        self.mutate_documents(id, |bibcodes| bibcodes.remove(bibcode))
    }

    fn extend_documents(&self, id: &LibraryId, new: &[String]) -> Result<()> {
        self.mutate_documents(id, |bibcodes| {
            bibcodes.extend(new.iter().cloned());
            Ok(())
        })
    }

    fn shorten_documents(&self, id: &LibraryId, remove: &[String]) -> Result<()> {
        self.mutate_documents(id, |bibcodes| {
            bibcodes.shorten(remove.iter().map(String::as_str))
        })
    }

    fn upsert_documents(&self, id: &LibraryId, new: &[String]) -> Result<()> {
        self.mutate_documents(id, |bibcodes| {
            bibcodes.upsert(new.iter().cloned());
            Ok(())
        })
    }

    // Permission operations

    fn create_permission(
        &self,
        user_id: i64,
        library_id: &LibraryId,
        flags: AccessFlags,
    ) -> Result<Permission> {
        let mut conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let tx = conn.transaction()?;

        let user: Option<i64> = tx
            .query_row(
                "SELECT id FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        let library: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM libraries WHERE id = ?1",
                params![binding.bind(library_id)],
                |row| row.get(0),
            )
            .optional()?;
        if user.is_none() || library.is_none() {
            return Err(Error::NotFound);
        }

        let result = tx.execute(
            "INSERT INTO permissions (user_id, library_id, read, write, admin, owner)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                binding.bind(library_id),
                flags.read,
                flags.write,
                flags.admin,
                flags.owner
            ],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(Error::AlreadyExists);
            }
            Err(e) => return Err(Error::from(e)),
        }

        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Permission {
            id,
            user_id,
            library_id: *library_id,
            flags,
        })
    }

    fn get_permission(&self, user_id: i64, library_id: &LibraryId) -> Result<Option<Permission>> {
        let conn = self.conn();
        let binding = self.id_binding(&conn)?;
        conn.query_row(
            "SELECT id, user_id, library_id, read, write, admin, owner
             FROM permissions WHERE user_id = ?1 AND library_id = ?2",
            params![user_id, binding.bind(library_id)],
            |row| read_permission(binding, row),
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_permission(
        &self,
        user_id: i64,
        library_id: &LibraryId,
        flags: AccessFlags,
    ) -> Result<()> {
        let conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let rows = conn.execute(
            "UPDATE permissions SET read = ?1, write = ?2, admin = ?3, owner = ?4
             WHERE user_id = ?5 AND library_id = ?6",
            params![
                flags.read,
                flags.write,
                flags.admin,
                flags.owner,
                user_id,
                binding.bind(library_id)
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn revoke_permission(&self, user_id: i64, library_id: &LibraryId) -> Result<()> {
        let conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let rows = conn.execute(
            "DELETE FROM permissions WHERE user_id = ?1 AND library_id = ?2",
            params![user_id, binding.bind(library_id)],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn list_library_permissions(&self, library_id: &LibraryId) -> Result<Vec<Permission>> {
        let conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, library_id, read, write, admin, owner
             FROM permissions WHERE library_id = ?1 ORDER BY user_id",
        )?;

        let rows = stmt.query_map(params![binding.bind(library_id)], |row| {
            read_permission(binding, row)
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_user_permissions(&self, user_id: i64) -> Result<Vec<Permission>> {
        let conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, library_id, read, write, admin, owner
             FROM permissions WHERE user_id = ?1 ORDER BY id",
        )?;

        let rows = stmt.query_map(params![user_id], |row| read_permission(binding, row))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn reconcile_users(&self, valid_uids: &HashSet<i64>) -> Result<SyncReport> {
        let mut conn = self.conn();
        let binding = self.id_binding(&conn)?;
        let mut tx = conn.transaction()?;
        let mut report = SyncReport::default();

        let users: Vec<User> = {
            let mut stmt =
                tx.prepare("SELECT id, external_uid, created_at FROM users ORDER BY id")?;
            let rows = stmt.query_map([], read_user)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        for user in users {
            report.users_examined += 1;
            if valid_uids.contains(&user.external_uid) {
                continue;
            }
            report.stale_users += 1;

            let sp = tx.savepoint()?;
            match purge_stale_user(&sp, binding, user.id) {
                Ok(purged) => {
                    sp.commit()?;
                    report.users_deleted += 1;
                    report.libraries_deleted += purged.libraries;
                    report.permissions_deleted += purged.permissions;
                }
                Err(Error::ConstraintViolation(reason)) => {
                    // Savepoint drop rolls this user back; the run goes on.
                    tracing::warn!(
                        user_id = user.id,
                        external_uid = user.external_uid,
                        %reason,
                        "stale user skipped"
                    );
                    report.failures += 1;
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit()?;
        Ok(report)
    }
}
