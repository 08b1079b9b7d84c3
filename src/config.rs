use anyhow::{anyhow, Result};
use config::Config;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::database::{
    check_file_integrity, DatabaseIdentity, LifecycleOptions, MigrationPolicy, ShadowCopy,
};

pub struct CustodianConfig {
    /// Directory holding the live database and its shadow copy
    pub data_dir: String,

    /// Directory holding seeds, `migrations/` and `tables/`
    pub assets_dir: String,

    /// File name of the managed database
    pub database_name: String,

    /// Configured schema version (>= 1)
    pub database_version: u32,

    /// What to do when a migration script fails
    pub migration_policy: MigrationPolicy,

    /// Enable foreign key enforcement on every open
    pub foreign_keys: bool,

    /// Keep the shadow copy provisioned and migrated on open
    pub maintain_shadow: bool,
}

const EMPTY_CONFIG: &str = r#"### custodian configuration file

### directory holding the managed database and its shadow copy
# data_dir = "~/.custodian"

### directory holding seed databases, migrations/ and tables/
# assets_dir = "~/.custodian/assets"

### managed database
# database_name = "custodian.sqlite3"
# database_version = 1

### migration failure handling: "best-effort" or "strict"
# migration_policy = "best-effort"

# foreign_keys = true
# maintain_shadow = true
"#;

const DEFAULT_DATABASE_NAME: &str = "custodian.sqlite3";

impl Default for CustodianConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string());

        Self {
            data_dir: format!("{}/.custodian", home_dir),
            assets_dir: format!("{}/.custodian/assets", home_dir),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            database_version: 1,
            migration_policy: MigrationPolicy::default(),
            foreign_keys: true,
            maintain_shadow: true,
        }
    }
}

fn parse_bool(config: &HashMap<String, String>, key: &str, default: bool) -> Result<bool> {
    match config.get(key) {
        Some(value) => value
            .trim()
            .parse::<bool>()
            .map_err(|e| anyhow!("Invalid value '{}' for {}: {}", value, key, e)),
        None => Ok(default),
    }
}

impl CustodianConfig {
    /// Function to create and initialize a new configuration
    pub fn new(path: &Option<String>) -> Result<CustodianConfig> {
        let mut builder = Config::builder();

        // By default use $HOME/.custodian/custodian.toml as the configuration file path
        let home_dir = dirs::home_dir()
            .ok_or_else(|| anyhow!("Could not find home directory"))?
            .to_str()
            .ok_or_else(|| anyhow!("Could not convert home directory path to string"))?
            .to_owned();

        // Config dir
        let custodian_dir = format!("{}/.custodian", home_dir.as_str());

        // Add in toml configuration file
        match path {
            Some(p) => {
                let path = Path::new(p.as_str());
                if path.exists() {
                    let path_str = path
                        .to_str()
                        .ok_or_else(|| anyhow!("Could not convert path to string"))?;
                    builder = builder.add_source(config::File::with_name(path_str));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG)
                        .map_err(|e| anyhow!("Unable to create config file: {}", e))?;
                }
            }
            None => {
                std::fs::create_dir_all(custodian_dir.as_str())
                    .map_err(|e| anyhow!("Unable to create custodian directory: {}", e))?;
                let p = format!("{}/custodian.toml", custodian_dir.as_str());
                if Path::new(p.as_str()).exists() {
                    builder = builder.add_source(config::File::with_name(p.as_str()));
                } else {
                    std::fs::write(p.as_str(), EMPTY_CONFIG).map_err(|e| {
                        anyhow!("Unable to create config file {}: {}", p.as_str(), e)
                    })?;
                }
            }
        }

        // Add in settings from the environment (with a prefix of CUSTODIAN)
        // E.g., `CUSTODIAN_DATABASE_VERSION=4 ./custodian open` would set the version
        builder = builder.add_source(config::Environment::with_prefix("CUSTODIAN"));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let config = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        let data_dir = match config.get("data_dir") {
            Some(p) => p.trim_end_matches('/').to_string(),
            None => custodian_dir.clone(),
        };

        let assets_dir = match config.get("assets_dir") {
            Some(p) => p.trim_end_matches('/').to_string(),
            None => format!("{}/assets", custodian_dir),
        };

        let database_name = config
            .get("database_name")
            .cloned()
            .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());

        let database_version = match config.get("database_version") {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .map_err(|e| anyhow!("Invalid database_version '{}': {}", v, e))?,
            None => 1,
        };

        let migration_policy = match config.get("migration_policy") {
            Some(p) => MigrationPolicy::from_str(p)?,
            None => MigrationPolicy::default(),
        };

        let foreign_keys = parse_bool(&config, "foreign_keys", true)?;
        let maintain_shadow = parse_bool(&config, "maintain_shadow", true)?;

        Ok(CustodianConfig {
            data_dir,
            assets_dir,
            database_name,
            database_version,
            migration_policy,
            foreign_keys,
            maintain_shadow,
        })
    }

    /// Get the path to the live database file
    pub fn sqlite_path(&self) -> String {
        let data_dir = self.data_dir.trim_end_matches('/');
        format!("{}/{}", data_dir, self.database_name)
    }

    /// Get the path to the shadow copy
    pub fn shadow_path(&self) -> String {
        ShadowCopy::for_database(Path::new(&self.sqlite_path()), &self.database_name)
            .backing_path
            .to_string_lossy()
            .to_string()
    }

    /// Identity of the configured database
    pub fn identity(&self) -> Result<DatabaseIdentity> {
        DatabaseIdentity::new(
            &self.database_name,
            self.database_version,
            self.data_dir.trim_end_matches('/'),
        )
    }

    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            migration_policy: self.migration_policy,
            foreign_keys: self.foreign_keys,
            maintain_shadow: self.maintain_shadow,
        }
    }

    /// Display configuration summary
    pub fn summary(&self) -> String {
        [
            format!("Data Directory:     {}", self.data_dir),
            format!("Assets Directory:   {}", self.assets_dir),
            format!("SQLite Path:        {}", self.sqlite_path()),
            format!("Shadow Path:        {}", self.shadow_path()),
            format!("Database Version:   {}", self.database_version),
            format!("Migration Policy:   {}", self.migration_policy),
            format!("Foreign Keys:       {}", self.foreign_keys),
            format!("Maintain Shadow:    {}", self.maintain_shadow),
        ]
        .join("\n")
    }

    /// Get the config file path
    pub fn config_file_path() -> String {
        let home_dir = dirs::home_dir()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|| "~".to_string());
        format!("{}/.custodian/custodian.toml", home_dir)
    }
}

// =============================================================================
// Database file info (used by the status command)
// =============================================================================

/// Information about one database file on disk
#[derive(Debug, Serialize, Clone)]
pub struct SqliteDatabaseInfo {
    pub path: String,
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_version: Option<u32>,
    pub intact: bool,
}

/// Live database and shadow copy, side by side
#[derive(Debug, Serialize, Clone)]
pub struct DatabaseStatusInfo {
    pub database_name: String,
    pub configured_version: u32,
    pub live: SqliteDatabaseInfo,
    pub shadow: SqliteDatabaseInfo,
}

/// Read `PRAGMA user_version` without creating or modifying the file
fn read_stored_version(path: &Path) -> Result<u32> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| anyhow!("Failed to open {:?}: {}", path, e))?;
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| anyhow!("Failed to read user_version of {:?}: {}", path, e))?;
    u32::try_from(version).map_err(|_| anyhow!("Invalid user_version {} in {:?}", version, path))
}

/// Get information about a database file
pub fn get_sqlite_info(path: &str) -> SqliteDatabaseInfo {
    let file = Path::new(path);
    let metadata = std::fs::metadata(file).ok();
    let exists = metadata.is_some();

    let last_modified = metadata.as_ref().and_then(|m| m.modified().ok()).map(|t| {
        chrono::DateTime::<chrono::Utc>::from(t)
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string()
    });

    SqliteDatabaseInfo {
        path: path.to_string(),
        exists,
        size_bytes: metadata.as_ref().map(|m| m.len()),
        last_modified,
        stored_version: if exists {
            read_stored_version(file).ok()
        } else {
            None
        },
        intact: exists && check_file_integrity(file),
    }
}

/// Get status of the configured database and its shadow copy
pub fn get_status_info(config: &CustodianConfig) -> DatabaseStatusInfo {
    DatabaseStatusInfo {
        database_name: config.database_name.clone(),
        configured_version: config.database_version,
        live: get_sqlite_info(&config.sqlite_path()),
        shadow: get_sqlite_info(&config.shadow_path()),
    }
}

/// Format bytes as human-readable size
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
