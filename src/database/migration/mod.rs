//! Versioned migrations
//!
//! - `locator`: finds `migrations/<version>.sql` resources and orders them
//! - `applier`: runs table creation and in-range scripts transactionally

mod applier;
mod locator;

pub use applier::{
    MigrationFailure, MigrationOutcome, MigrationPolicy, SchemaApplier, VersionRange,
};
pub use locator::{MigrationScript, ScriptLocator, MIGRATION_PATH, SCRIPT_SUFFIX};
