//! Integrity checking
//!
//! Wraps SQLite's `PRAGMA integrity_check`. The check is read-only and never
//! mutates schema, so it can run against the live handle or against a file
//! opened on the side (used to decide whether the live file is a safe source
//! for the shadow copy).

use std::path::Path;

use anyhow::{anyhow, Result};
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use super::handle::StorageHandle;

/// Collect the rows reported by `PRAGMA integrity_check`
///
/// A healthy database yields exactly one row, `ok`.
pub fn integrity_report(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("PRAGMA integrity_check")
        .map_err(|e| anyhow!("Failed to prepare integrity check: {}", e))?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| anyhow!("Failed to run integrity check: {}", e))?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| anyhow!("Failed to read integrity check result: {}", e))
}

pub(crate) fn report_is_ok(report: &[String]) -> bool {
    report.len() == 1 && report[0] == "ok"
}

/// Check an open database handle
///
/// Returns false both when the engine reports corruption and when the check
/// itself cannot run (e.g. the file is not a database at all).
pub fn check_integrity(handle: &dyn StorageHandle) -> bool {
    match handle.run_integrity_check() {
        Ok(true) => true,
        Ok(false) => {
            warn!("Integrity check reported corruption");
            false
        }
        Err(e) => {
            warn!("Integrity check failed to run: {}", e);
            false
        }
    }
}

/// Check a database file without keeping it open
///
/// A missing file cannot be verified and is reported as not intact.
pub fn check_file_integrity(path: &Path) -> bool {
    if !path.exists() {
        debug!("No database file at {:?} to verify", path);
        return false;
    }

    let conn = match Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    ) {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Failed to open {:?} for integrity check: {}", path, e);
            return false;
        }
    };

    match integrity_report(&conn) {
        Ok(report) if report_is_ok(&report) => true,
        Ok(report) => {
            warn!(
                "Integrity check of {:?} reported {} problem(s): {}",
                path,
                report.len(),
                report.join("; ")
            );
            false
        }
        Err(e) => {
            warn!("Integrity check of {:?} failed: {}", path, e);
            false
        }
    }
}
