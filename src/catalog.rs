//! Table metadata
//!
//! Schema creation reads its `CREATE TABLE` statements from a [`TableCatalog`].
//! The catalog is injected into the lifecycle controller rather than looked up
//! globally, so tests can supply a fixed set of tables.

use anyhow::{anyhow, Result};
use std::io::Read;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::resources::ResourceProvider;

/// Directory holding one `<table>.sql` file per table for [`AssetCatalog`]
pub const TABLES_PATH: &str = "tables";

/// A table and the statement that creates it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub create_sql: String,
}

impl TableDefinition {
    pub fn new<N: Into<String>, S: Into<String>>(name: N, create_sql: S) -> Self {
        Self {
            name: name.into(),
            create_sql: create_sql.into(),
        }
    }

    /// Whether re-running the statement on an existing table is harmless
    ///
    /// Upgrades re-apply every definition, so definitions without
    /// `IF NOT EXISTS` fail once the table exists.
    pub fn is_idempotent(&self) -> bool {
        self.create_sql
            .to_ascii_uppercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .windows(3)
            .any(|w| w == ["IF", "NOT", "EXISTS"])
    }
}

/// Source of table definitions for schema creation
pub trait TableCatalog: Send + Sync {
    /// Definitions in creation order
    fn table_definitions(&self) -> Result<Vec<TableDefinition>>;

    /// Drop any cached metadata; called after migrations changed the schema
    fn invalidate(&self) {}
}

/// Fixed list of table definitions
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tables: Vec<TableDefinition>,
}

impl StaticCatalog {
    pub fn new(tables: Vec<TableDefinition>) -> Self {
        Self { tables }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl TableCatalog for StaticCatalog {
    fn table_definitions(&self) -> Result<Vec<TableDefinition>> {
        Ok(self.tables.clone())
    }
}

/// Table definitions loaded from `tables/<name>.sql` resources
///
/// The parsed definitions are cached until [`TableCatalog::invalidate`].
pub struct AssetCatalog {
    resources: Arc<dyn ResourceProvider>,
    cached: RwLock<Option<Vec<TableDefinition>>>,
}

impl AssetCatalog {
    pub fn new(resources: Arc<dyn ResourceProvider>) -> Self {
        Self {
            resources,
            cached: RwLock::new(None),
        }
    }

    fn load(&self) -> Result<Vec<TableDefinition>> {
        let mut names = self.resources.list_resources(TABLES_PATH)?;
        names.sort();

        let mut tables = Vec::with_capacity(names.len());
        for file in names {
            let Some(name) = file.strip_suffix(".sql") else {
                debug!("Ignoring non-SQL table resource: {}", file);
                continue;
            };

            let resource = format!("{}/{}", TABLES_PATH, file);
            let mut create_sql = String::new();
            self.resources
                .open_resource(&resource)?
                .read_to_string(&mut create_sql)
                .map_err(|e| anyhow!("Failed to read table definition '{}': {}", resource, e))?;

            let table = TableDefinition::new(name, create_sql.trim());
            if !table.is_idempotent() {
                warn!(
                    "Table definition '{}' lacks IF NOT EXISTS and will fail on upgrade",
                    table.name
                );
            }
            tables.push(table);
        }

        Ok(tables)
    }
}

impl TableCatalog for AssetCatalog {
    fn table_definitions(&self) -> Result<Vec<TableDefinition>> {
        if let Ok(guard) = self.cached.read() {
            if let Some(tables) = guard.as_ref() {
                return Ok(tables.clone());
            }
        }

        let tables = self.load()?;
        if let Ok(mut guard) = self.cached.write() {
            *guard = Some(tables.clone());
        }
        Ok(tables)
    }

    fn invalidate(&self) {
        if let Ok(mut guard) = self.cached.write() {
            *guard = None;
        }
    }
}
