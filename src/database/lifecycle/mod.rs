//! Lifecycle controller
//!
//! [`LifecycleController`] owns one managed database file. It decides, from
//! the version stored in the file, whether opening it means creating the
//! schema or upgrading it, runs the matching steps exactly once, and keeps the
//! shadow copy used for restores.
//!
//! ```rust,ignore
//! use custodian::{AssetCatalog, AssetDir, DatabaseIdentity, LifecycleController};
//! use std::sync::Arc;
//!
//! let assets = Arc::new(AssetDir::new("assets"));
//! let catalog = Arc::new(AssetCatalog::new(assets.clone()));
//! let identity = DatabaseIdentity::new("app.db", 4, "/var/lib/app")?;
//!
//! let mut controller = LifecycleController::new(identity, catalog, assets);
//! let db = controller.open()?;
//! ```

mod identity;
mod observer;
mod state;

pub use identity::DatabaseIdentity;
pub use observer::LifecycleObserver;
pub use state::LifecycleState;

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::catalog::TableCatalog;
use crate::database::core::{check_file_integrity, check_integrity, DatabaseConn, StorageHandle};
use crate::database::migration::{
    MigrationOutcome, MigrationPolicy, MigrationScript, SchemaApplier, ScriptLocator, VersionRange,
};
use crate::database::storage::{BackupManager, ProvisionOutcome, Provisioner, ShadowCopy};
use crate::database::worker::SerialQueue;
use crate::resources::ResourceProvider;

/// Behaviour switches for a [`LifecycleController`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
    pub migration_policy: MigrationPolicy,
    /// Run `PRAGMA foreign_keys=ON` on open, create and upgrade
    pub foreign_keys: bool,
    /// Provision and migrate the shadow copy on every open
    pub maintain_shadow: bool,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            migration_policy: MigrationPolicy::default(),
            foreign_keys: true,
            maintain_shadow: true,
        }
    }
}

/// What opening a file at `stored` version requires to reach `target`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchemaStep {
    Current,
    Create,
    Upgrade { from: u32, to: u32 },
}

fn plan_step(stored: u32, target: u32) -> Result<SchemaStep> {
    if stored == target {
        Ok(SchemaStep::Current)
    } else if stored == 0 {
        Ok(SchemaStep::Create)
    } else if stored < target {
        Ok(SchemaStep::Upgrade {
            from: stored,
            to: target,
        })
    } else {
        Err(anyhow!(
            "Can't downgrade database from version {} to {}",
            stored,
            target
        ))
    }
}

/// Schema steps shared by the live database and its shadow copy
///
/// The stored version is written by the migration batch itself, inside the
/// same transaction as the scripts.
struct SchemaRoutine<'a> {
    applier: SchemaApplier<'a>,
    foreign_keys: bool,
}

impl<'a> SchemaRoutine<'a> {
    fn pragmas(&self, handle: &dyn StorageHandle) -> Result<()> {
        if self.foreign_keys {
            handle.execute("PRAGMA foreign_keys=ON")?;
            debug!("Foreign keys enabled");
        }
        Ok(())
    }

    fn create(&self, handle: &dyn StorageHandle, version: u32) -> Result<MigrationOutcome> {
        self.pragmas(handle)?;
        self.applier.create_schema(handle)?;
        self.applier
            .apply_migrations(handle, VersionRange::all_up_to(version))
    }

    fn upgrade(&self, handle: &dyn StorageHandle, old: u32, new: u32) -> Result<MigrationOutcome> {
        self.pragmas(handle)?;
        self.applier.create_schema(handle)?;
        self.applier
            .apply_migrations(handle, VersionRange::between(old, new))
    }
}

/// Owns a managed database across open, create, upgrade, verify and restore
pub struct LifecycleController {
    identity: DatabaseIdentity,
    catalog: Arc<dyn TableCatalog>,
    resources: Arc<dyn ResourceProvider>,
    options: LifecycleOptions,
    observer: Option<Box<dyn LifecycleObserver>>,
    backup: BackupManager,
    state: LifecycleState,
    conn: Option<DatabaseConn>,
    last_outcome: Option<MigrationOutcome>,
}

impl LifecycleController {
    pub fn new(
        identity: DatabaseIdentity,
        catalog: Arc<dyn TableCatalog>,
        resources: Arc<dyn ResourceProvider>,
    ) -> Self {
        let live = identity.storage_path().to_path_buf();
        let shadow = ShadowCopy::for_database(&live, identity.name());

        Self {
            identity,
            catalog,
            resources,
            options: LifecycleOptions::default(),
            observer: None,
            backup: BackupManager::new(live, shadow),
            state: LifecycleState::Uninitialized,
            conn: None,
            last_outcome: None,
        }
    }

    pub fn with_options(mut self, options: LifecycleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_observer(&mut self, observer: Box<dyn LifecycleObserver>) {
        self.observer = Some(observer);
    }

    pub fn identity(&self) -> &DatabaseIdentity {
        &self.identity
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn options(&self) -> LifecycleOptions {
        self.options
    }

    pub fn shadow(&self) -> &ShadowCopy {
        self.backup.shadow()
    }

    pub fn backup_manager(&self) -> &BackupManager {
        &self.backup
    }

    /// Outcome of the most recent migration batch run by this controller
    ///
    /// A `Degraded` value means the schema committed with failed scripts.
    pub fn last_migration_outcome(&self) -> Option<&MigrationOutcome> {
        self.last_outcome.as_ref()
    }

    /// The open connection, if any
    pub fn connection(&self) -> Option<&DatabaseConn> {
        self.conn.as_ref()
    }

    /// Migration scripts available to this database, in application order
    pub fn migrations(&self) -> Vec<MigrationScript> {
        ScriptLocator::new(self.resources.as_ref()).list_migrations()
    }

    fn routine(&self) -> SchemaRoutine<'_> {
        SchemaRoutine {
            applier: SchemaApplier::new(
                self.resources.as_ref(),
                self.catalog.as_ref(),
                self.options.migration_policy,
            ),
            foreign_keys: self.options.foreign_keys,
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        if !self.state.allows(next) {
            warn!(
                "Unexpected lifecycle transition {} -> {} for {}",
                self.state,
                next,
                self.identity.name()
            );
        }
        debug!("{}: {} -> {}", self.identity.name(), self.state, next);
        self.state = next;
    }

    /// Open the live database, creating or upgrading it as needed
    ///
    /// Idempotent while open. On first access a bundled seed named after the
    /// database is copied into place if the file does not exist yet.
    pub fn open(&mut self) -> Result<&DatabaseConn> {
        if self.state == LifecycleState::Open && self.conn.is_some() {
            return self
                .conn
                .as_ref()
                .ok_or_else(|| anyhow!("Database {} is not open", self.identity.name()));
        }

        let live = self.identity.storage_path().to_path_buf();
        let provisioned =
            Provisioner::new(self.resources.as_ref()).provision_if_absent(&live, self.identity.name());
        if let ProvisionOutcome::Failed { error } = &provisioned {
            warn!(
                "Seeding {} failed, continuing with a fresh file: {}",
                self.identity.name(),
                error
            );
        }

        if let Some(parent) = live.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create data directory {:?}: {}", parent, e))?;
        }
        let path = live
            .to_str()
            .ok_or_else(|| anyhow!("Database path {:?} is not valid UTF-8", live))?;
        let conn = DatabaseConn::open_path(path)?;

        if let Err(e) = self.prepare(&conn) {
            error!("Failed to open {}: {}", self.identity.name(), e);
            self.transition(LifecycleState::Closed);
            return Err(e);
        }

        if self.options.maintain_shadow {
            self.prepare_shadow();
        }

        self.transition(LifecycleState::Open);
        info!(
            "Opened {} at version {}",
            self.identity.name(),
            self.identity.version()
        );
        Ok(&*self.conn.insert(conn))
    }

    /// Bring an opened handle to the configured version, then run open hooks
    fn prepare(&mut self, handle: &dyn StorageHandle) -> Result<()> {
        let stored = handle.stored_version()?;
        match plan_step(stored, self.identity.version())? {
            SchemaStep::Current => {}
            SchemaStep::Create => {
                self.on_create(handle)?;
            }
            SchemaStep::Upgrade { from, to } => {
                self.on_upgrade(handle, from, to)?;
            }
        }
        self.on_open(handle)
    }

    /// Create the schema on a file that has never been initialised
    ///
    /// Every migration up to the configured version applies.
    pub fn on_create(&mut self, handle: &dyn StorageHandle) -> Result<MigrationOutcome> {
        self.transition(LifecycleState::Provisioning);
        if let Some(observer) = &self.observer {
            observer.on_create(handle);
        }

        info!(
            "Creating {} at version {}",
            self.identity.name(),
            self.identity.version()
        );
        debug_assert!(
            self.state.mutates_schema(),
            "schema step outside a schema-changing state"
        );
        let outcome = self.routine().create(handle, self.identity.version())?;
        self.record_outcome(outcome.clone());
        Ok(outcome)
    }

    /// Upgrade a file whose stored version is below the configured one
    ///
    /// Applies migrations with `old_version < version <= new_version`.
    pub fn on_upgrade(
        &mut self,
        handle: &dyn StorageHandle,
        old_version: u32,
        new_version: u32,
    ) -> Result<MigrationOutcome> {
        self.transition(LifecycleState::Upgrading);
        if let Some(observer) = &self.observer {
            observer.on_upgrade(handle, old_version, new_version);
        }

        info!(
            "Upgrading {} from version {} to {}",
            self.identity.name(),
            old_version,
            new_version
        );
        debug_assert!(
            self.state.mutates_schema(),
            "schema step outside a schema-changing state"
        );
        let outcome = self.routine().upgrade(handle, old_version, new_version)?;
        self.record_outcome(outcome.clone());
        Ok(outcome)
    }

    fn on_open(&self, handle: &dyn StorageHandle) -> Result<()> {
        if let Some(observer) = &self.observer {
            observer.on_open(handle);
        }
        self.routine().pragmas(handle)
    }

    fn record_outcome(&mut self, outcome: MigrationOutcome) {
        if outcome.executed_any() {
            self.catalog.invalidate();
        }
        if let MigrationOutcome::Degraded { failed, .. } = &outcome {
            warn!(
                "{} is at version {} with {} failed migration(s)",
                self.identity.name(),
                self.identity.version(),
                failed.len()
            );
        }
        self.last_outcome = Some(outcome);
    }

    /// Make sure the shadow copy exists and matches the configured version
    ///
    /// Runs the same create/upgrade steps as the live file, without observer
    /// notifications. Failures are logged.
    fn prepare_shadow(&self) -> bool {
        let shadow = self.backup.shadow().backing_path.clone();
        let outcome = Provisioner::new(self.resources.as_ref()).provision_shadow_if_absent(
            &shadow,
            self.identity.storage_path(),
            self.identity.name(),
        );
        if let ProvisionOutcome::Failed { error } = outcome {
            error!("Failed to provision shadow {:?}: {}", shadow, error);
            return false;
        }

        match self.migrate_file(&shadow) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to prepare shadow {:?}: {}", shadow, e);
                false
            }
        }
    }

    fn migrate_file(&self, path: &Path) -> Result<()> {
        let path = path
            .to_str()
            .ok_or_else(|| anyhow!("Path {:?} is not valid UTF-8", path))?;
        let conn = DatabaseConn::open_path(path)?;
        let routine = self.routine();

        match plan_step(conn.stored_version()?, self.identity.version())? {
            SchemaStep::Current => routine.pragmas(&conn),
            SchemaStep::Create => routine.create(&conn, self.identity.version()).map(|_| ()),
            SchemaStep::Upgrade { from, to } => routine.upgrade(&conn, from, to).map(|_| ()),
        }
    }

    /// Run the engine's integrity check
    ///
    /// Uses the open connection when there is one, otherwise checks the file
    /// on disk. Never changes the schema.
    pub fn check_integrity(&mut self) -> bool {
        if self.state != LifecycleState::Open || self.conn.is_none() {
            return check_file_integrity(self.identity.storage_path());
        }

        self.transition(LifecycleState::Verifying);
        let intact = self.conn.as_ref().map_or(false, |conn| check_integrity(conn));
        self.transition(LifecycleState::Open);

        if !intact {
            warn!("{} failed its integrity check", self.identity.name());
        }
        intact
    }

    /// Snapshot the live file into the shadow copy on the calling thread
    pub fn backup(&self) -> bool {
        self.backup.backup()
    }

    /// Snapshot the live file on `queue`
    pub fn queue_backup(&self, queue: &SerialQueue) -> Result<()> {
        let manager = self.backup.clone();
        queue.submit(move || {
            manager.backup();
        })
    }

    /// Replace the live file with the shadow copy
    ///
    /// The controller's connection is closed first and the controller ends
    /// up `Closed`; call [`open`](Self::open) again to use the restored file.
    pub fn restore_from_backup(&mut self) -> bool {
        self.conn = None;
        self.transition(LifecycleState::Restoring);
        let restored = self.backup.restore_from_backup();
        self.transition(LifecycleState::Closed);
        restored
    }

    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            info!("Closed {}", self.identity.name());
        }
        if self.state != LifecycleState::Closed {
            self.transition(LifecycleState::Closed);
        }
    }
}
