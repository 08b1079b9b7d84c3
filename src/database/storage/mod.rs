//! On-disk file management
//!
//! - `provision`: first-time population of the live and shadow files
//! - `backup`: shadow-copy snapshots and restore
//!
//! Everything here is synchronous, whole-file I/O.

mod backup;
mod provision;

pub use backup::{BackupManager, ShadowCopy, SHADOW_PREFIX};
pub use provision::{ProvisionOutcome, ProvisionSource, Provisioner};

use anyhow::{anyhow, Result};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tracing::warn;

/// Stream `source` into a new file at `target`
///
/// Parent directories are created as needed. On failure the partially
/// written file is removed.
pub(crate) fn write_file_from(target: &Path, source: &mut dyn Read) -> Result<u64> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create directory {:?}: {}", parent, e))?;
        }
    }

    let result = (|| -> io::Result<u64> {
        let file = File::create(target)?;
        let mut writer = BufWriter::new(file);
        let bytes = io::copy(source, &mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(bytes)
    })();

    match result {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            if target.exists() {
                if let Err(rm) = fs::remove_file(target) {
                    warn!("Failed to remove partial file {:?}: {}", target, rm);
                }
            }
            Err(anyhow!("Failed to write {:?}: {}", target, e))
        }
    }
}

/// Copy one file to another path via [`write_file_from`]
pub(crate) fn copy_file(source: &Path, target: &Path) -> Result<u64> {
    let mut input =
        File::open(source).map_err(|e| anyhow!("Failed to open {:?}: {}", source, e))?;
    write_file_from(target, &mut input)
}
