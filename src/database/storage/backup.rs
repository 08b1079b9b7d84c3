//! Shadow-copy backup and restore
//!
//! The shadow copy lives next to the live database as `temp-<name>`. A backup
//! overwrites it with the current live file; a restore replaces the live file
//! with it. Both operate on closed files, so callers must quiesce writers
//! first (the lifecycle controller closes its own connection before a
//! restore).

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use super::copy_file;
use crate::database::core::check_file_integrity;

/// File name prefix of the shadow copy
pub const SHADOW_PREFIX: &str = "temp-";

/// SQLite sidecar files that must not outlive the file they belong to
const SIDECAR_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];

/// The single shadow copy of a managed database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShadowCopy {
    pub backing_path: PathBuf,
    pub source_database_name: String,
}

impl ShadowCopy {
    /// Shadow copy for `live_path`, placed in the same directory
    pub fn for_database(live_path: &Path, database_name: &str) -> Self {
        let dir = live_path.parent().unwrap_or_else(|| Path::new(""));
        Self {
            backing_path: dir.join(format!("{}{}", SHADOW_PREFIX, database_name)),
            source_database_name: database_name.to_string(),
        }
    }

    pub fn exists(&self) -> bool {
        self.backing_path.exists()
    }
}

/// Snapshots and restores the live database file
///
/// Cheap to clone, so a copy can be moved onto a background queue.
#[derive(Debug, Clone)]
pub struct BackupManager {
    live_path: PathBuf,
    shadow: ShadowCopy,
}

impl BackupManager {
    pub fn new(live_path: PathBuf, shadow: ShadowCopy) -> Self {
        Self { live_path, shadow }
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn shadow(&self) -> &ShadowCopy {
        &self.shadow
    }

    /// Replace the shadow copy with the current live file
    ///
    /// Returns false (after logging) when the live file is missing or the
    /// copy fails.
    pub fn backup(&self) -> bool {
        if !self.live_path.exists() {
            warn!("No live database at {:?} to back up", self.live_path);
            return false;
        }

        let backing = &self.shadow.backing_path;
        if backing.exists() {
            if let Err(e) = fs::remove_file(backing) {
                error!("Failed to delete previous backup {:?}: {}", backing, e);
                return false;
            }
        }

        match copy_file(&self.live_path, backing) {
            Ok(bytes) => {
                info!(
                    "Backed up {} to {:?} ({} bytes)",
                    self.shadow.source_database_name, backing, bytes
                );
                true
            }
            Err(e) => {
                error!("Backup of {} failed: {}", self.shadow.source_database_name, e);
                false
            }
        }
    }

    /// Overwrite the live file with the shadow copy
    ///
    /// The live file and its journal sidecars are deleted first. If that
    /// fails the restore is abandoned and the shadow is left untouched.
    pub fn restore_from_backup(&self) -> bool {
        let backing = &self.shadow.backing_path;
        if !backing.exists() {
            error!("No backup at {:?}; keeping live database", backing);
            return false;
        }

        if self.live_path.exists() {
            if let Err(e) = fs::remove_file(&self.live_path) {
                error!("Failed to delete DB {:?}: {}", self.live_path, e);
                return false;
            }
        }
        remove_sidecars(&self.live_path);

        match copy_file(backing, &self.live_path) {
            Ok(bytes) => {
                info!(
                    "Restored {} from {:?} ({} bytes)",
                    self.shadow.source_database_name, backing, bytes
                );
                true
            }
            Err(e) => {
                error!("Restore of {} failed: {}", self.shadow.source_database_name, e);
                false
            }
        }
    }

    /// Whether the shadow copy exists and passes the integrity check
    pub fn shadow_is_intact(&self) -> bool {
        check_file_integrity(&self.shadow.backing_path)
    }
}

fn remove_sidecars(db_path: &Path) {
    for suffix in SIDECAR_SUFFIXES {
        let mut name = db_path.as_os_str().to_owned();
        name.push(suffix);
        let sidecar = PathBuf::from(name);
        if sidecar.exists() {
            if let Err(e) = fs::remove_file(&sidecar) {
                warn!("Failed to remove {:?}: {}", sidecar, e);
            }
        }
    }
}
