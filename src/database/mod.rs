//! Database module
//!
//! This module provides everything custodian does to a managed SQLite file,
//! organized into:
//!
//! - **core**: SQLite connection, the storage handle seam, integrity checks
//! - **migration**: Script discovery and schema application
//! - **storage**: Seed provisioning, shadow copy backup and restore
//! - **lifecycle**: The controller tying the above into open/create/upgrade
//!
//! # Architecture
//!
//! ```text
//! database/
//! ├── core/           # Foundation
//! │   ├── connection  # SQLite DatabaseConn wrapper
//! │   ├── handle      # StorageHandle trait
//! │   └── integrity   # PRAGMA integrity_check helpers
//! │
//! ├── migration/      # Schema changes
//! │   ├── locator     # migrations/<version>.sql discovery
//! │   └── applier     # Table creation and versioned scripts
//! │
//! ├── storage/        # Whole-file operations
//! │   ├── provision   # Copy bundled seeds into place
//! │   └── backup      # Shadow copy backup and restore
//! │
//! ├── lifecycle/      # LifecycleController, identity, states, observer
//! └── worker          # Serial background queue
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use custodian::database::{DatabaseIdentity, LifecycleController};
//!
//! let mut controller = LifecycleController::new(identity, catalog, assets);
//! let db = controller.open()?;
//!
//! if !controller.check_integrity() {
//!     controller.restore_from_backup();
//! }
//! ```

pub mod core;
pub mod lifecycle;
pub mod migration;
pub mod storage;
pub mod worker;

// Connection and the engine seam
pub use core::{check_file_integrity, check_integrity, DatabaseConn, StorageHandle};

// Lifecycle
pub use lifecycle::{
    DatabaseIdentity, LifecycleController, LifecycleObserver, LifecycleOptions, LifecycleState,
};

// Migrations
pub use migration::{
    MigrationFailure, MigrationOutcome, MigrationPolicy, MigrationScript, SchemaApplier,
    ScriptLocator, VersionRange, MIGRATION_PATH,
};

// Whole-file storage
pub use storage::{
    BackupManager, ProvisionOutcome, ProvisionSource, Provisioner, ShadowCopy, SHADOW_PREFIX,
};

pub use worker::SerialQueue;

