//! Bundled resources
//!
//! Seed databases and migration scripts ship with the application as named
//! resources. [`ResourceProvider`] is the narrow interface the lifecycle code
//! reads them through. Two providers are included:
//!
//! - [`AssetDir`]: resources are files under an assets directory on disk
//! - [`EmbeddedAssets`]: resources are byte buffers held in memory (e.g. from
//!   `include_bytes!`)
//!
//! Resource names use `/` as separator, e.g. `migrations/3.sql`.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::PathBuf;

pub trait ResourceProvider: Send + Sync {
    /// List the resource names directly under `directory`
    ///
    /// Names are returned without the directory prefix. A missing directory
    /// yields an empty list.
    fn list_resources(&self, directory: &str) -> Result<Vec<String>>;

    /// Open a resource as a byte stream
    fn open_resource(&self, name: &str) -> Result<Box<dyn Read + Send + '_>>;

    fn contains(&self, name: &str) -> bool;
}

/// Resources stored as files under a directory
#[derive(Debug, Clone)]
pub struct AssetDir {
    root: PathBuf,
}

impl AssetDir {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn resolve(&self, name: &str) -> PathBuf {
        name.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl ResourceProvider for AssetDir {
    fn list_resources(&self, directory: &str) -> Result<Vec<String>> {
        let dir = self.resolve(directory);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&dir)
            .map_err(|e| anyhow!("Failed to list resources in {:?}: {}", dir, e))?;

        let mut names = Vec::new();
        for entry in entries.flatten() {
            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn open_resource(&self, name: &str) -> Result<Box<dyn Read + Send + '_>> {
        let path = self.resolve(name);
        let file = fs::File::open(&path)
            .map_err(|e| anyhow!("Failed to open resource '{}' at {:?}: {}", name, path, e))?;
        Ok(Box::new(file))
    }

    fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_file()
    }
}

/// In-memory resources
#[derive(Debug, Clone, Default)]
pub struct EmbeddedAssets {
    entries: BTreeMap<String, Vec<u8>>,
}

impl EmbeddedAssets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource, replacing any previous one with the same name
    pub fn insert<N: Into<String>, B: Into<Vec<u8>>>(&mut self, name: N, bytes: B) {
        self.entries.insert(name.into(), bytes.into());
    }

    pub fn with<N: Into<String>, B: Into<Vec<u8>>>(mut self, name: N, bytes: B) -> Self {
        self.insert(name, bytes);
        self
    }
}

impl ResourceProvider for EmbeddedAssets {
    fn list_resources(&self, directory: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", directory.trim_end_matches('/'));
        Ok(self
            .entries
            .keys()
            .filter_map(|name| name.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(|rest| rest.to_string())
            .collect())
    }

    fn open_resource(&self, name: &str) -> Result<Box<dyn Read + Send + '_>> {
        let bytes = self
            .entries
            .get(name)
            .ok_or_else(|| anyhow!("Resource '{}' not found", name))?;
        Ok(Box::new(Cursor::new(bytes.as_slice())))
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}
