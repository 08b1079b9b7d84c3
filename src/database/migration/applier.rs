//! Schema creation and migration application
//!
//! Each triggering event (create or upgrade) runs table creation in one
//! transaction and the selected migration scripts in a second one, which also
//! records the new stored version.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

use super::locator::{MigrationScript, ScriptLocator};
use crate::catalog::TableCatalog;
use crate::database::core::StorageHandle;
use crate::resources::ResourceProvider;

/// How a failing migration script affects its batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationPolicy {
    /// The first failure rolls back every script in the batch
    Strict,
    /// A failing script is rolled back on its own; the rest of the batch commits
    #[default]
    BestEffort,
}

impl FromStr for MigrationPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(MigrationPolicy::Strict),
            "best-effort" | "best_effort" | "besteffort" => Ok(MigrationPolicy::BestEffort),
            other => Err(anyhow!(
                "Unknown migration policy '{}', expected 'strict' or 'best-effort'",
                other
            )),
        }
    }
}

impl fmt::Display for MigrationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationPolicy::Strict => write!(f, "strict"),
            MigrationPolicy::BestEffort => write!(f, "best-effort"),
        }
    }
}

/// Versions a migration batch covers: `after < version <= up_to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    /// `None` on create, where every script up to `up_to` applies
    pub after: Option<u32>,
    pub up_to: u32,
}

impl VersionRange {
    pub fn all_up_to(up_to: u32) -> Self {
        Self { after: None, up_to }
    }

    pub fn between(old: u32, new: u32) -> Self {
        Self {
            after: Some(old),
            up_to: new,
        }
    }

    pub fn contains(&self, version: u32) -> bool {
        self.after.map_or(true, |after| version > after) && version <= self.up_to
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.after {
            Some(after) => write!(f, "({}, {}]", after, self.up_to),
            None => write!(f, "[0, {}]", self.up_to),
        }
    }
}

/// A script that failed under [`MigrationPolicy::BestEffort`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFailure {
    pub version: u32,
    pub resource_name: String,
    pub error: String,
}

/// Result of a committed migration batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MigrationOutcome {
    NothingToApply,
    Applied {
        versions: Vec<u32>,
    },
    /// The batch committed but some scripts were rolled back
    Degraded {
        applied: Vec<u32>,
        failed: Vec<MigrationFailure>,
    },
}

impl MigrationOutcome {
    /// Whether at least one script changed the schema
    pub fn executed_any(&self) -> bool {
        match self {
            MigrationOutcome::NothingToApply => false,
            MigrationOutcome::Applied { versions } => !versions.is_empty(),
            MigrationOutcome::Degraded { applied, .. } => !applied.is_empty(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, MigrationOutcome::Degraded { .. })
    }
}

/// Runs table creation and migration scripts against a storage handle
pub struct SchemaApplier<'a> {
    resources: &'a dyn ResourceProvider,
    catalog: &'a dyn TableCatalog,
    policy: MigrationPolicy,
}

impl<'a> SchemaApplier<'a> {
    pub fn new(
        resources: &'a dyn ResourceProvider,
        catalog: &'a dyn TableCatalog,
        policy: MigrationPolicy,
    ) -> Self {
        Self {
            resources,
            catalog,
            policy,
        }
    }

    /// Create every catalog table in one transaction
    ///
    /// Returns the number of definitions executed. Any failure rolls back the
    /// whole batch.
    pub fn create_schema(&self, handle: &dyn StorageHandle) -> Result<usize> {
        let tables = self.catalog.table_definitions()?;

        handle.begin_transaction()?;
        for table in &tables {
            if let Err(e) = handle.execute(&table.create_sql) {
                rollback_quietly(handle);
                return Err(anyhow!("Failed to create table '{}': {}", table.name, e));
            }
        }
        if let Err(e) = handle.commit() {
            rollback_quietly(handle);
            return Err(e);
        }

        info!("Created {} table(s)", tables.len());
        Ok(tables.len())
    }

    /// Apply every listed script whose version falls in `range`, then record
    /// `range.up_to` as the stored version
    pub fn apply_migrations(
        &self,
        handle: &dyn StorageHandle,
        range: VersionRange,
    ) -> Result<MigrationOutcome> {
        let scripts = ScriptLocator::new(self.resources).list_migrations();
        self.apply_scripts(handle, &scripts, range)
    }

    /// Apply the in-range subset of `scripts` inside a single transaction
    ///
    /// The stored version is set to `range.up_to` in the same transaction, so
    /// scripts and version commit or roll back together. Under
    /// [`MigrationPolicy::Strict`] an error is returned and nothing is
    /// committed. Under [`MigrationPolicy::BestEffort`] each script runs in its
    /// own savepoint, so a failing script leaves no partial effect.
    pub fn apply_scripts(
        &self,
        handle: &dyn StorageHandle,
        scripts: &[MigrationScript],
        range: VersionRange,
    ) -> Result<MigrationOutcome> {
        let selected: Vec<&MigrationScript> =
            scripts.iter().filter(|s| range.contains(s.version)).collect();
        if selected.is_empty() {
            handle.set_stored_version(range.up_to)?;
            return Ok(MigrationOutcome::NothingToApply);
        }

        let mut applied = Vec::new();
        let mut failed = Vec::new();

        handle.begin_transaction()?;
        for script in selected {
            let result = match self.policy {
                MigrationPolicy::Strict => self.run_script(handle, script),
                MigrationPolicy::BestEffort => {
                    match self.run_script_in_savepoint(handle, script) {
                        Ok(result) => result,
                        Err(e) => {
                            rollback_quietly(handle);
                            return Err(anyhow!(
                                "Savepoint for {} could not be unwound, batch {} rolled back: {}",
                                script.file_name(),
                                range,
                                e
                            ));
                        }
                    }
                }
            };

            match result {
                Ok(()) => {
                    info!("{} executed successfully.", script.file_name());
                    applied.push(script.version);
                }
                Err(e) if self.policy == MigrationPolicy::Strict => {
                    rollback_quietly(handle);
                    return Err(anyhow!(
                        "Migration {} failed, batch {} rolled back: {}",
                        script.file_name(),
                        range,
                        e
                    ));
                }
                Err(e) => {
                    error!("Failed to execute {}: {}", script.file_name(), e);
                    failed.push(MigrationFailure {
                        version: script.version,
                        resource_name: script.resource_name.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = handle.set_stored_version(range.up_to) {
            rollback_quietly(handle);
            return Err(anyhow!(
                "Failed to record version {}, batch {} rolled back: {}",
                range.up_to,
                range,
                e
            ));
        }
        if let Err(e) = handle.commit() {
            rollback_quietly(handle);
            return Err(e);
        }

        if failed.is_empty() {
            Ok(MigrationOutcome::Applied { versions: applied })
        } else {
            warn!(
                "Migration batch {} committed with {} failed script(s)",
                range,
                failed.len()
            );
            Ok(MigrationOutcome::Degraded { applied, failed })
        }
    }

    fn run_script(&self, handle: &dyn StorageHandle, script: &MigrationScript) -> Result<()> {
        for statement in script.load_statements(self.resources)? {
            handle.execute(&statement)?;
        }
        Ok(())
    }

    /// Run `script` between `SAVEPOINT` and `RELEASE`
    ///
    /// The inner result is the script's own. The outer error means the
    /// savepoint itself could not be opened or unwound, leaving the enclosing
    /// transaction in an unknown state.
    fn run_script_in_savepoint(
        &self,
        handle: &dyn StorageHandle,
        script: &MigrationScript,
    ) -> Result<Result<()>> {
        let savepoint = format!("migration_{}", script.version);
        handle.execute(&format!("SAVEPOINT {}", savepoint))?;

        match self.run_script(handle, script) {
            Ok(()) => {
                handle.execute(&format!("RELEASE {}", savepoint))?;
                Ok(Ok(()))
            }
            Err(e) => {
                handle.execute(&format!("ROLLBACK TO {}", savepoint))?;
                handle.execute(&format!("RELEASE {}", savepoint))?;
                Ok(Err(e))
            }
        }
    }
}

fn rollback_quietly(handle: &dyn StorageHandle) {
    if let Err(e) = handle.rollback() {
        error!("Rollback failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{StaticCatalog, TableDefinition};
    use crate::database::core::testing::RecordingHandle;
    use crate::database::core::DatabaseConn;
    use crate::resources::EmbeddedAssets;

    fn numbered_assets(count: u32) -> EmbeddedAssets {
        let mut assets = EmbeddedAssets::new();
        for v in 1..=count {
            assets.insert(
                format!("migrations/{}.sql", v),
                format!("INSERT INTO log VALUES ({});\n", v),
            );
        }
        assets
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(vec![
            TableDefinition::new("log", "CREATE TABLE IF NOT EXISTS log (v INTEGER)"),
            TableDefinition::new("notes", "CREATE TABLE IF NOT EXISTS notes (id INTEGER)"),
        ])
    }

    #[test]
    fn test_version_range() {
        let create = VersionRange::all_up_to(3);
        assert!(create.contains(0));
        assert!(create.contains(3));
        assert!(!create.contains(4));

        let upgrade = VersionRange::between(2, 5);
        assert!(!upgrade.contains(2));
        assert!(upgrade.contains(3));
        assert!(upgrade.contains(5));
        assert!(!upgrade.contains(6));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "strict".parse::<MigrationPolicy>().unwrap(),
            MigrationPolicy::Strict
        );
        assert_eq!(
            "Best-Effort".parse::<MigrationPolicy>().unwrap(),
            MigrationPolicy::BestEffort
        );
        assert!("sometimes".parse::<MigrationPolicy>().is_err());
    }

    #[test]
    fn test_create_schema_single_transaction() {
        let assets = EmbeddedAssets::new();
        let catalog = catalog();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::Strict);
        let handle = RecordingHandle::new();

        assert_eq!(applier.create_schema(&handle).unwrap(), 2);
        let log = handle.entries();
        assert_eq!(log.first().map(String::as_str), Some("BEGIN"));
        assert_eq!(log.last().map(String::as_str), Some("COMMIT"));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_create_schema_is_all_or_nothing() {
        let assets = EmbeddedAssets::new();
        let catalog = catalog();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::Strict);
        let handle = RecordingHandle::failing_on("notes");

        assert!(applier.create_schema(&handle).is_err());
        let log = handle.entries();
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.contains(&"COMMIT".to_string()));
    }

    #[test]
    fn test_upgrade_applies_only_range() {
        let assets = numbered_assets(7);
        let catalog = catalog();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::BestEffort);
        let handle = RecordingHandle::with_version(2);

        let outcome = applier
            .apply_migrations(&handle, VersionRange::between(2, 5))
            .unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Applied {
                versions: vec![3, 4, 5]
            }
        );
        assert_eq!(
            handle.entries(),
            vec![
                "BEGIN",
                "SAVEPOINT migration_3",
                "INSERT INTO log VALUES (3)",
                "RELEASE migration_3",
                "SAVEPOINT migration_4",
                "INSERT INTO log VALUES (4)",
                "RELEASE migration_4",
                "SAVEPOINT migration_5",
                "INSERT INTO log VALUES (5)",
                "RELEASE migration_5",
                "PRAGMA user_version = 5",
                "COMMIT",
            ]
        );
        assert_eq!(handle.version.get(), 5);
    }

    #[test]
    fn test_strict_upgrade_runs_without_savepoints() {
        let assets = numbered_assets(7);
        let catalog = catalog();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::Strict);
        let handle = RecordingHandle::with_version(2);

        applier
            .apply_migrations(&handle, VersionRange::between(2, 5))
            .unwrap();
        assert_eq!(
            handle.entries(),
            vec![
                "BEGIN",
                "INSERT INTO log VALUES (3)",
                "INSERT INTO log VALUES (4)",
                "INSERT INTO log VALUES (5)",
                "PRAGMA user_version = 5",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_nothing_to_apply_opens_no_transaction() {
        let assets = numbered_assets(3);
        let catalog = catalog();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::BestEffort);
        let handle = RecordingHandle::with_version(3);

        let outcome = applier
            .apply_migrations(&handle, VersionRange::between(3, 4))
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::NothingToApply);
        assert!(!outcome.executed_any());
        assert_eq!(handle.entries(), vec!["PRAGMA user_version = 4"]);
        assert_eq!(handle.version.get(), 4);
    }

    #[test]
    fn test_strict_failure_rolls_back_batch() {
        let assets = numbered_assets(4);
        let catalog = catalog();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::Strict);
        let handle = RecordingHandle::failing_on("VALUES (3)");

        let result = applier.apply_migrations(&handle, VersionRange::all_up_to(4));
        assert!(result.is_err());

        let log = handle.entries();
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.contains(&"INSERT INTO log VALUES (4)".to_string()));
        assert!(!log.iter().any(|s| s.starts_with("PRAGMA user_version")));
        assert_eq!(handle.version.get(), 0);
    }

    #[test]
    fn test_failed_version_write_rolls_back_scripts() {
        let assets = numbered_assets(2);
        let catalog = catalog();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::BestEffort);
        let handle = RecordingHandle::failing_on("user_version");

        assert!(applier
            .apply_migrations(&handle, VersionRange::all_up_to(2))
            .is_err());
        let log = handle.entries();
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.contains(&"COMMIT".to_string()));
        assert_eq!(handle.version.get(), 0);
    }

    #[test]
    fn test_unwind_failure_aborts_best_effort_batch() {
        let assets = numbered_assets(4);
        let catalog = catalog();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::BestEffort);
        let handle = RecordingHandle::failing_on_any(&["VALUES (3)", "ROLLBACK TO"]);

        let result = applier.apply_migrations(&handle, VersionRange::all_up_to(4));
        assert!(result.is_err());

        let log = handle.entries();
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.contains(&"COMMIT".to_string()));
        assert!(!log.contains(&"INSERT INTO log VALUES (4)".to_string()));
        assert_eq!(handle.version.get(), 0);
    }

    #[test]
    fn test_best_effort_reports_degraded() {
        let assets = numbered_assets(4);
        let catalog = catalog();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::BestEffort);
        let handle = RecordingHandle::failing_on("VALUES (3)");

        let outcome = applier
            .apply_migrations(&handle, VersionRange::all_up_to(4))
            .unwrap();
        match &outcome {
            MigrationOutcome::Degraded { applied, failed } => {
                assert_eq!(applied, &vec![1, 2, 4]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].version, 3);
                assert_eq!(failed[0].resource_name, "migrations/3.sql");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(outcome.executed_any());
        assert!(handle.entries().contains(&"ROLLBACK TO migration_3".to_string()));
        assert_eq!(handle.entries().last().map(String::as_str), Some("COMMIT"));
    }

    #[test]
    fn test_best_effort_on_sqlite_discards_partial_script() {
        let assets = EmbeddedAssets::new()
            .with("migrations/1.sql", "CREATE TABLE a (id INTEGER);\n")
            .with(
                "migrations/2.sql",
                "CREATE TABLE b (id INTEGER);\nINSERT INTO missing VALUES (1);\n",
            )
            .with("migrations/3.sql", "CREATE TABLE c (id INTEGER);\n");
        let catalog = StaticCatalog::empty();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::BestEffort);
        let db = DatabaseConn::open_in_memory().unwrap();

        let outcome = applier
            .apply_migrations(&db, VersionRange::all_up_to(3))
            .unwrap();
        assert!(outcome.is_degraded());
        assert!(db.table_exists("a").unwrap());
        assert!(!db.table_exists("b").unwrap());
        assert!(db.table_exists("c").unwrap());
        assert_eq!(db.stored_version().unwrap(), 3);
    }

    #[test]
    fn test_strict_on_sqlite_leaves_no_trace() {
        let assets = EmbeddedAssets::new()
            .with("migrations/1.sql", "CREATE TABLE a (id INTEGER);\n")
            .with("migrations/2.sql", "INSERT INTO missing VALUES (1);\n");
        let catalog = StaticCatalog::empty();
        let applier = SchemaApplier::new(&assets, &catalog, MigrationPolicy::Strict);
        let db = DatabaseConn::open_in_memory().unwrap();

        assert!(applier
            .apply_migrations(&db, VersionRange::all_up_to(2))
            .is_err());
        assert!(!db.table_exists("a").unwrap());
        assert_eq!(db.stored_version().unwrap(), 0);
    }
}
