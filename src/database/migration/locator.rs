//! Migration script discovery
//!
//! Scripts live under `migrations/` and are named `<version>.sql`. Names that
//! do not parse as a version are skipped with a warning.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::io::{BufRead, BufReader};
use tracing::{error, warn};

use crate::resources::ResourceProvider;

/// Resource directory holding migration scripts
pub const MIGRATION_PATH: &str = "migrations";

/// Suffix stripped from script names before parsing the version
pub const SCRIPT_SUFFIX: &str = ".sql";

/// A versioned migration script
///
/// Only the name is known up front; statements are read from the resource
/// when the script is applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationScript {
    pub version: u32,
    /// Full resource name, e.g. `migrations/3.sql`
    pub resource_name: String,
}

impl MigrationScript {
    /// Build a script from a file name found under [`MIGRATION_PATH`]
    pub fn from_file_name(file: &str) -> Result<Self> {
        let stem = file.strip_suffix(SCRIPT_SUFFIX).unwrap_or(file);
        let version = stem
            .trim()
            .parse::<u32>()
            .map_err(|e| anyhow!("Invalid migration name '{}': {}", file, e))?;

        Ok(Self {
            version,
            resource_name: format!("{}/{}", MIGRATION_PATH, file),
        })
    }

    pub fn file_name(&self) -> &str {
        self.resource_name
            .rsplit('/')
            .next()
            .unwrap_or(self.resource_name.as_str())
    }

    /// Read the script's statements
    ///
    /// One statement per line. Terminators are stripped and blank or
    /// comment-only lines are dropped.
    pub fn load_statements(&self, resources: &dyn ResourceProvider) -> Result<Vec<String>> {
        let reader = BufReader::new(resources.open_resource(&self.resource_name)?);

        let mut statements = Vec::new();
        for line in reader.lines() {
            let line =
                line.map_err(|e| anyhow!("Failed to read {}: {}", self.resource_name, e))?;
            let statement = line.replace(';', "");
            let statement = statement.trim();
            if statement.is_empty() || statement.starts_with("--") {
                continue;
            }
            statements.push(statement.to_string());
        }
        Ok(statements)
    }
}

/// Lists migration scripts in ascending version order
pub struct ScriptLocator<'a> {
    resources: &'a dyn ResourceProvider,
}

impl<'a> ScriptLocator<'a> {
    pub fn new(resources: &'a dyn ResourceProvider) -> Self {
        Self { resources }
    }

    /// All valid scripts, sorted by version
    ///
    /// A listing failure is logged and yields no scripts. Scripts sharing a
    /// version are ordered by resource name.
    pub fn list_migrations(&self) -> Vec<MigrationScript> {
        let files = match self.resources.list_resources(MIGRATION_PATH) {
            Ok(files) => files,
            Err(e) => {
                error!("Failed to list migrations: {}", e);
                return Vec::new();
            }
        };

        let mut scripts: Vec<MigrationScript> = files
            .iter()
            .filter_map(|file| match MigrationScript::from_file_name(file) {
                Ok(script) => Some(script),
                Err(e) => {
                    warn!("Skipping invalidly named file: {}", e);
                    None
                }
            })
            .collect();

        scripts.sort_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.resource_name.cmp(&b.resource_name))
        });

        for pair in scripts.windows(2) {
            if pair[0].version == pair[1].version {
                warn!(
                    "Migrations {} and {} share version {}; both will run",
                    pair[0].resource_name, pair[1].resource_name, pair[0].version
                );
            }
        }

        scripts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::EmbeddedAssets;

    fn versions(scripts: &[MigrationScript]) -> Vec<u32> {
        scripts.iter().map(|s| s.version).collect()
    }

    #[test]
    fn test_numeric_order_not_lexicographic() {
        let assets = EmbeddedAssets::new()
            .with("migrations/2.sql", "")
            .with("migrations/10.sql", "")
            .with("migrations/1.sql", "");

        let scripts = ScriptLocator::new(&assets).list_migrations();
        assert_eq!(versions(&scripts), vec![1, 2, 10]);
        assert_eq!(scripts[2].resource_name, "migrations/10.sql");
    }

    #[test]
    fn test_invalid_names_are_skipped() {
        let mut assets = EmbeddedAssets::new().with("migrations/abc.sql", "");
        for v in 1..=12 {
            assets.insert(format!("migrations/{}.sql", v), "");
        }

        let scripts = ScriptLocator::new(&assets).list_migrations();
        assert_eq!(scripts.len(), 12);
        assert_eq!(versions(&scripts), (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_names_without_suffix_are_accepted() {
        let assets = EmbeddedAssets::new()
            .with("migrations/3", "")
            .with("migrations/abc", "")
            .with("migrations/-1.sql", "");

        let scripts = ScriptLocator::new(&assets).list_migrations();
        assert_eq!(versions(&scripts), vec![3]);
        assert_eq!(scripts[0].file_name(), "3");
    }

    #[test]
    fn test_order_is_stable_for_duplicate_versions() {
        let assets = EmbeddedAssets::new()
            .with("migrations/02.sql", "")
            .with("migrations/2.sql", "")
            .with("migrations/1.sql", "");

        let first = ScriptLocator::new(&assets).list_migrations();
        let second = ScriptLocator::new(&assets).list_migrations();
        assert_eq!(first, second);
        assert_eq!(first[1].file_name(), "02.sql");
        assert_eq!(first[2].file_name(), "2.sql");
    }

    #[test]
    fn test_empty_directory() {
        let assets = EmbeddedAssets::new();
        assert!(ScriptLocator::new(&assets).list_migrations().is_empty());
    }

    #[test]
    fn test_load_statements_strips_terminators() {
        let assets = EmbeddedAssets::new().with(
            "migrations/4.sql",
            "ALTER TABLE notes ADD COLUMN body TEXT;\n\n-- backfill\nUPDATE notes SET body = '';\r\n",
        );
        let script = MigrationScript::from_file_name("4.sql").unwrap();

        let statements = script.load_statements(&assets).unwrap();
        assert_eq!(
            statements,
            vec![
                "ALTER TABLE notes ADD COLUMN body TEXT".to_string(),
                "UPDATE notes SET body = ''".to_string(),
            ]
        );
    }
}
