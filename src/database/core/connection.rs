//! Database connection management
//!
//! This module provides the SQLite connection wrapper that the lifecycle
//! controller hands out to application code.

use anyhow::{anyhow, Result};
use rusqlite::Connection;

use super::handle::StorageHandle;
use super::integrity;

/// Core database connection wrapper
///
/// `DatabaseConn` provides a thin wrapper around SQLite connections,
/// handling both file-based and in-memory databases with consistent
/// configuration and error handling.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| anyhow!("Failed to open database at '{}': {}", p, e))?,
            None => Connection::open_in_memory()
                .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?,
        };

        let db = DatabaseConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Open a database at the specified path (convenience method)
    pub fn open_path(path: &str) -> Result<Self> {
        Self::open(Some(path))
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(None)
    }

    /// Configure the connection
    ///
    /// Foreign keys are not touched here; they belong to the lifecycle's
    /// pragma setup step.
    fn configure(&self) -> Result<()> {
        // Rollback journal keeps every committed page in the main file, so a
        // closed database can be copied as a single file.
        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=DELETE", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to set journal mode: {}", e))?;

        self.conn
            .execute("PRAGMA synchronous=FULL", [])
            .map_err(|e| anyhow!("Failed to set synchronous mode: {}", e))?;

        self.conn
            .execute("PRAGMA temp_store=MEMORY", [])
            .map_err(|e| anyhow!("Failed to set temp store: {}", e))?;

        Ok(())
    }

    /// Execute a SQL statement with parameters
    pub fn execute_with_params<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<usize> {
        self.conn
            .execute(sql, params)
            .map_err(|e| anyhow!("Failed to execute SQL with params: {}", e))
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i32 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [table_name],
                |row| row.get(0),
            )
            .map_err(|e| anyhow!("Failed to check table existence: {}", e))?;
        Ok(count > 0)
    }

    /// Get the row count for a table
    pub fn table_count(&self, table_name: &str) -> Result<u64> {
        let query = format!("SELECT COUNT(*) FROM {}", table_name);
        let count: u64 = self
            .conn
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to get table count: {}", e))?;
        Ok(count)
    }
}

impl StorageHandle for DatabaseConn {
    fn execute(&self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| anyhow!("Failed to execute SQL '{}': {}", sql, e))
    }

    fn begin_transaction(&self) -> Result<()> {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| anyhow!("Failed to begin transaction: {}", e))
    }

    fn commit(&self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| anyhow!("Failed to commit transaction: {}", e))
    }

    fn rollback(&self) -> Result<()> {
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| anyhow!("Failed to roll back transaction: {}", e))
    }

    fn stored_version(&self) -> Result<u32> {
        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| anyhow!("Failed to read user_version: {}", e))?;
        u32::try_from(version).map_err(|_| anyhow!("Invalid stored version: {}", version))
    }

    fn set_stored_version(&self, version: u32) -> Result<()> {
        self.conn
            .execute_batch(&format!("PRAGMA user_version = {}", version))
            .map_err(|e| anyhow!("Failed to set user_version to {}: {}", version, e))
    }

    fn run_integrity_check(&self) -> Result<bool> {
        let report = integrity::integrity_report(&self.conn)?;
        Ok(integrity::report_is_ok(&report))
    }
}
