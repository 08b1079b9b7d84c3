#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Custodian - lifecycle management for embedded SQLite databases
//!
//! Custodian owns an application's local database file: it seeds the file
//! from bundled assets, creates or upgrades the schema based on the version
//! stored in the file, runs versioned migration scripts exactly once, checks
//! integrity and keeps a shadow copy to restore from. It can be used as both a
//! command-line application and a library.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | (none) | Lifecycle library | `rusqlite`, `config`, `tracing` |
//! | `display` | Table formatting with `tabled` | `tabled` |
//! | `cli` | The `custodian` binary | All above + `clap`, `tracing-subscriber` |
//!
//! ```toml
//! # Library only
//! custodian = { version = "0.1", default-features = false }
//!
//! # Default (CLI binary)
//! custodian = "0.1"
//! ```
//!
//! # Architecture
//!
//! - **[`database`]**: Connection, migrations, whole-file storage and the
//!   [`LifecycleController`]
//! - **[`resources`]**: Read-only bundled assets ([`AssetDir`], [`EmbeddedAssets`])
//! - **[`catalog`]**: Table definitions for schema creation
//! - **[`config`]**: Configuration management
//!
//! # Assets Layout
//!
//! ```text
//! assets/
//! ├── <database name>     # optional seed database, copied on first open
//! ├── tables/*.sql        # one CREATE TABLE IF NOT EXISTS per file
//! └── migrations/<N>.sql  # one statement per line
//! ```
//!
//! # Quick Start
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
//! controller.open()?;
//!
//! // Snapshot after a successful session
//! controller.close();
//! controller.backup();
//!
//! // Later, when the file turns out to be damaged
//! if !controller.check_integrity() {
//!     controller.restore_from_backup();
//!     controller.open()?;
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod database;
pub mod resources;

// =============================================================================
// Configuration
// =============================================================================

pub use config::CustodianConfig;

pub use config::{format_size, get_sqlite_info, get_status_info, DatabaseStatusInfo, SqliteDatabaseInfo};

// =============================================================================
// Database Module - Re-export commonly used types
// =============================================================================

// Lifecycle
pub use database::{
    DatabaseIdentity, LifecycleController, LifecycleObserver, LifecycleOptions, LifecycleState,
};

// Migrations
pub use database::{
    MigrationFailure, MigrationOutcome, MigrationPolicy, MigrationScript, SchemaApplier,
    ScriptLocator, VersionRange,
};

// Whole-file storage
pub use database::{BackupManager, ProvisionOutcome, ProvisionSource, Provisioner, ShadowCopy};

// Core types
pub use database::{DatabaseConn, SerialQueue, StorageHandle};

// =============================================================================
// Collaborators
// =============================================================================

pub use catalog::{AssetCatalog, StaticCatalog, TableCatalog, TableDefinition};
pub use resources::{AssetDir, EmbeddedAssets, ResourceProvider};
