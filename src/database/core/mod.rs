//! Core database infrastructure
//!
//! This module provides the foundational database components:
//! - `DatabaseConn`: Core SQLite connection wrapper with configuration
//! - `StorageHandle`: The engine surface used by schema management
//! - `integrity`: Engine-native consistency checks

mod connection;
mod handle;
pub mod integrity;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::DatabaseConn;
pub use handle::StorageHandle;
pub use integrity::{check_file_integrity, check_integrity};
