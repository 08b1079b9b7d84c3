//! Storage engine handle abstraction
//!
//! The lifecycle code never talks to `rusqlite` directly. It drives the engine
//! through [`StorageHandle`], which [`DatabaseConn`](super::DatabaseConn)
//! implements and which tests replace with a recording fake.

use anyhow::Result;

/// Minimal surface of an open database that schema management needs.
pub trait StorageHandle {
    /// Execute a single SQL statement
    fn execute(&self, sql: &str) -> Result<()>;

    fn begin_transaction(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Schema version recorded in the database file (0 for a fresh file)
    fn stored_version(&self) -> Result<u32>;

    fn set_stored_version(&self, version: u32) -> Result<()>;

    /// Run the engine's structural consistency check
    ///
    /// `Ok(false)` means the check ran and reported corruption.
    fn run_integrity_check(&self) -> Result<bool>;
}
