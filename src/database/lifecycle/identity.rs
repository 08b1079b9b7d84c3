use anyhow::{anyhow, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Name, schema version and location of a managed database
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseIdentity {
    name: String,
    version: u32,
    storage_path: PathBuf,
}

impl DatabaseIdentity {
    /// Identity for `<data_dir>/<name>`
    ///
    /// Version 0 is what the engine reports for a file that was never
    /// initialised, so the configured version must be at least 1.
    pub fn new<P: AsRef<Path>>(name: &str, version: u32, data_dir: P) -> Result<Self> {
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(anyhow!("Invalid database name '{}'", name));
        }
        if version < 1 {
            return Err(anyhow!("Database version must be >= 1, was {}", version));
        }

        Ok(Self {
            name: name.to_string(),
            version,
            storage_path: data_dir.as_ref().join(name),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }
}
