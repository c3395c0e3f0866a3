//! Reconciliation of local users against the external identity directory.
//!
//! A periodic, idempotent batch job: fetch one atomic snapshot of the
//! upstream identity numbers, then delete every local user absent from it,
//! tearing down their owned libraries first. The job never runs concurrently
//! with itself; the scheduler that triggers it holds that lock.

mod directory;

pub use directory::{Directory, HttpDirectory, SqliteDirectory};

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::store::Store;

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncReport {
    pub users_examined: usize,
    pub stale_users: usize,
    pub users_deleted: usize,
    pub libraries_deleted: usize,
    pub permissions_deleted: usize,
    /// Stale users left in place because their purge hit a constraint.
    pub failures: usize,
}

/// Runs one reconciliation pass.
///
/// An unreachable directory aborts the run before any local mutation; no
/// partial snapshot is ever used to decide staleness. Per-user constraint
/// failures are logged and skipped inside the store, and the successful
/// subset commits.
pub fn run(store: &dyn Store, directory: &dyn Directory) -> Result<SyncReport> {
    let valid_uids = directory.valid_uids()?;
    info!(valid = valid_uids.len(), "fetched identity snapshot");

    let report = store.reconcile_users(&valid_uids)?;
    info!(
        examined = report.users_examined,
        stale = report.stale_users,
        users_deleted = report.users_deleted,
        libraries_deleted = report.libraries_deleted,
        permissions_deleted = report.permissions_deleted,
        failures = report.failures,
        "reconciliation finished"
    );

    Ok(report)
}
