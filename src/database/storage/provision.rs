//! Seed provisioning
//!
//! Before the engine opens a database for the first time, the live file may
//! be populated from a seed database bundled with the application. The
//! shadow copy is provisioned the same way, preferring the live file when it
//! exists and passes an integrity check.

use serde::Serialize;
use std::path::Path;
use tracing::{debug, error, info};

use super::{copy_file, write_file_from};
use crate::database::core::check_file_integrity;
use crate::resources::ResourceProvider;

/// Where a provisioned file was copied from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionSource {
    Seed,
    LiveDatabase,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// Target already existed; nothing was copied
    AlreadyPresent,
    /// No seed bundled and no usable live file; the engine will create the file
    NoSource,
    Copied {
        source: ProvisionSource,
        bytes: u64,
    },
    /// Copy failed and was logged; no file was left behind
    Failed {
        error: String,
    },
}

impl ProvisionOutcome {
    pub fn copied(&self) -> bool {
        matches!(self, ProvisionOutcome::Copied { .. })
    }
}

pub struct Provisioner<'a> {
    resources: &'a dyn ResourceProvider,
}

impl<'a> Provisioner<'a> {
    pub fn new(resources: &'a dyn ResourceProvider) -> Self {
        Self { resources }
    }

    /// Copy the bundled seed to `target` unless `target` already exists
    pub fn provision_if_absent(&self, target: &Path, seed_resource: &str) -> ProvisionOutcome {
        if target.exists() {
            return ProvisionOutcome::AlreadyPresent;
        }
        self.copy_seed(target, seed_resource)
    }

    /// Provision the shadow copy unless it already exists
    ///
    /// An intact live file is preferred over the bundled seed.
    pub fn provision_shadow_if_absent(
        &self,
        shadow: &Path,
        live: &Path,
        seed_resource: &str,
    ) -> ProvisionOutcome {
        if shadow.exists() {
            return ProvisionOutcome::AlreadyPresent;
        }

        if live.exists() && check_file_integrity(live) {
            return match copy_file(live, shadow) {
                Ok(bytes) => {
                    info!("Provisioned shadow {:?} from live database", shadow);
                    ProvisionOutcome::Copied {
                        source: ProvisionSource::LiveDatabase,
                        bytes,
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    ProvisionOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
        }

        self.copy_seed(shadow, seed_resource)
    }

    fn copy_seed(&self, target: &Path, seed_resource: &str) -> ProvisionOutcome {
        if !self.resources.contains(seed_resource) {
            debug!("No bundled seed '{}' for {:?}", seed_resource, target);
            return ProvisionOutcome::NoSource;
        }

        let result = self
            .resources
            .open_resource(seed_resource)
            .and_then(|mut reader| write_file_from(target, &mut reader));

        match result {
            Ok(bytes) => {
                info!(
                    "Provisioned {:?} from seed '{}' ({} bytes)",
                    target, seed_resource, bytes
                );
                ProvisionOutcome::Copied {
                    source: ProvisionSource::Seed,
                    bytes,
                }
            }
            Err(e) => {
                error!("Failed to provision {:?} from '{}': {}", target, seed_resource, e);
                ProvisionOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::core::{DatabaseConn, StorageHandle};
    use crate::resources::EmbeddedAssets;
    use anyhow::Result;
    use std::fs;
    use std::io::Read;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Counts how often a resource is opened
    struct CountingAssets {
        inner: EmbeddedAssets,
        opens: AtomicUsize,
    }

    impl ResourceProvider for CountingAssets {
        fn list_resources(&self, directory: &str) -> Result<Vec<String>> {
            self.inner.list_resources(directory)
        }

        fn open_resource(&self, name: &str) -> Result<Box<dyn Read + Send + '_>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.open_resource(name)
        }

        fn contains(&self, name: &str) -> bool {
            self.inner.contains(name)
        }
    }

    fn sqlite_bytes(table: &str) -> Vec<u8> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seed.db");
        let db = DatabaseConn::open_path(path.to_str().unwrap()).unwrap();
        db.execute(&format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", table))
            .unwrap();
        drop(db);
        fs::read(&path).unwrap()
    }

    #[test]
    fn test_provision_copies_seed_once() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("databases").join("app.db");
        let assets = CountingAssets {
            inner: EmbeddedAssets::new().with("app.db", vec![7u8; 1000]),
            opens: AtomicUsize::new(0),
        };
        let provisioner = Provisioner::new(&assets);

        let first = provisioner.provision_if_absent(&target, "app.db");
        assert_eq!(
            first,
            ProvisionOutcome::Copied {
                source: ProvisionSource::Seed,
                bytes: 1000
            }
        );
        assert_eq!(assets.opens.load(Ordering::SeqCst), 1);

        let second = provisioner.provision_if_absent(&target, "app.db");
        assert_eq!(second, ProvisionOutcome::AlreadyPresent);
        assert_eq!(assets.opens.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&target).unwrap(), vec![7u8; 1000]);
    }

    #[test]
    fn test_provision_without_seed() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("app.db");
        let assets = EmbeddedAssets::new();

        let outcome = Provisioner::new(&assets).provision_if_absent(&target, "app.db");
        assert_eq!(outcome, ProvisionOutcome::NoSource);
        assert!(!target.exists());
    }

    #[test]
    fn test_shadow_prefers_intact_live_file() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("app.db");
        let shadow = dir.path().join("temp-app.db");
        fs::write(&live, sqlite_bytes("from_live")).unwrap();
        let assets = EmbeddedAssets::new().with("app.db", sqlite_bytes("from_seed"));

        let outcome =
            Provisioner::new(&assets).provision_shadow_if_absent(&shadow, &live, "app.db");
        assert!(matches!(
            outcome,
            ProvisionOutcome::Copied {
                source: ProvisionSource::LiveDatabase,
                ..
            }
        ));
        assert_eq!(fs::read(&shadow).unwrap(), fs::read(&live).unwrap());
    }

    #[test]
    fn test_shadow_falls_back_to_seed_when_live_corrupt() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("app.db");
        let shadow = dir.path().join("temp-app.db");
        fs::write(&live, vec![0xFFu8; 4096]).unwrap();
        let seed = sqlite_bytes("from_seed");
        let assets = EmbeddedAssets::new().with("app.db", seed.clone());

        let outcome =
            Provisioner::new(&assets).provision_shadow_if_absent(&shadow, &live, "app.db");
        assert!(matches!(
            outcome,
            ProvisionOutcome::Copied {
                source: ProvisionSource::Seed,
                ..
            }
        ));
        assert_eq!(fs::read(&shadow).unwrap(), seed);
    }

    #[test]
    fn test_existing_shadow_is_left_alone() {
        let dir = tempdir().unwrap();
        let live = dir.path().join("app.db");
        let shadow = dir.path().join("temp-app.db");
        fs::write(&shadow, b"previous").unwrap();
        let assets = EmbeddedAssets::new();

        let outcome =
            Provisioner::new(&assets).provision_shadow_if_absent(&shadow, &live, "app.db");
        assert_eq!(outcome, ProvisionOutcome::AlreadyPresent);
        assert_eq!(fs::read(&shadow).unwrap(), b"previous");
    }
}
