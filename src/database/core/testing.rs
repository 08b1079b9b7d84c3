//! Recording storage handle used by unit tests

use std::cell::{Cell, RefCell};

use anyhow::{anyhow, Result};

use super::handle::StorageHandle;

/// Fake engine that records every call as a line of text
///
/// Transaction control shows up as `BEGIN`, `COMMIT` and `ROLLBACK`, and a
/// version write as `PRAGMA user_version = N`, so tests can assert on ordering
/// and transaction boundaries.
#[derive(Default)]
pub struct RecordingHandle {
    pub log: RefCell<Vec<String>>,
    pub version: Cell<u32>,
    /// Statements containing any of these markers fail
    pub fail_on: Vec<String>,
    pub healthy: bool,
}

impl RecordingHandle {
    pub fn new() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self::failing_on_any(&[marker])
    }

    pub fn failing_on_any(markers: &[&str]) -> Self {
        Self {
            fail_on: markers.iter().map(|m| m.to_string()).collect(),
            ..Self::new()
        }
    }

    fn record(&self, sql: &str) -> Result<()> {
        if self.fail_on.iter().any(|marker| sql.contains(marker.as_str())) {
            return Err(anyhow!("Failed to execute SQL '{}': simulated", sql));
        }
        self.log.borrow_mut().push(sql.to_string());
        Ok(())
    }

    pub fn with_version(version: u32) -> Self {
        let handle = Self::new();
        handle.version.set(version);
        handle
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    /// Executed statements, excluding transaction control and savepoints
    pub fn statements(&self) -> Vec<String> {
        self.log
            .borrow()
            .iter()
            .filter(|s| {
                !matches!(s.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK")
                    && !s.starts_with("SAVEPOINT")
                    && !s.starts_with("RELEASE")
                    && !s.starts_with("ROLLBACK TO")
                    && !s.starts_with("PRAGMA user_version")
            })
            .cloned()
            .collect()
    }
}

impl StorageHandle for RecordingHandle {
    fn execute(&self, sql: &str) -> Result<()> {
        self.record(sql)
    }

    fn begin_transaction(&self) -> Result<()> {
        self.log.borrow_mut().push("BEGIN".to_string());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.log.borrow_mut().push("COMMIT".to_string());
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.log.borrow_mut().push("ROLLBACK".to_string());
        Ok(())
    }

    fn stored_version(&self) -> Result<u32> {
        Ok(self.version.get())
    }

    fn set_stored_version(&self, version: u32) -> Result<()> {
        self.record(&format!("PRAGMA user_version = {}", version))?;
        self.version.set(version);
        Ok(())
    }

    fn run_integrity_check(&self) -> Result<bool> {
        Ok(self.healthy)
    }
}
