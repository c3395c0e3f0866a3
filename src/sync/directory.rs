use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::{Error, Result};

/// Read-only view of the authoritative identity store.
///
/// One call returns the complete set of currently-valid external identity
/// numbers, treated as a single atomic snapshot per reconciliation run.
/// Every failure maps to `DirectoryUnreachable`: a run that cannot read the
/// whole directory must not delete anything.
pub trait Directory: Send + Sync {
    fn valid_uids(&self) -> Result<HashSet<i64>>;
}

/// Directory backed by the upstream accounts database file.
pub struct SqliteDirectory {
    path: PathBuf,
}

impl SqliteDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Directory for SqliteDirectory {
    fn valid_uids(&self) -> Result<HashSet<i64>> {
        let unreachable = |e: rusqlite::Error| Error::DirectoryUnreachable(e.to_string());

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(unreachable)?;

        let mut stmt = conn.prepare("SELECT id FROM users").map_err(unreachable)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(unreachable)?;

        rows.collect::<rusqlite::Result<HashSet<i64>>>()
            .map_err(unreachable)
    }
}

/// Directory backed by an HTTP endpoint returning a JSON array of identity
/// numbers.
pub struct HttpDirectory {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpDirectory {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build directory client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Directory for HttpDirectory {
    fn valid_uids(&self) -> Result<HashSet<i64>> {
        let unreachable = |e: reqwest::Error| Error::DirectoryUnreachable(e.to_string());

        let response = self
            .client
            .get(&self.url)
            .send()
            .map_err(unreachable)?
            .error_for_status()
            .map_err(unreachable)?;

        let uids: Vec<i64> = response.json().map_err(unreachable)?;
        Ok(uids.into_iter().collect())
    }
}
