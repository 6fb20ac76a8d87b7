// src/install/record.rs

//! Installed package records
//!
//! The `installed` blob maps package name to the version installed, when it
//! was installed and which files it placed under the target directory.

use crate::error::{Error, Result};
use crate::repository::PackageInfo;
use crate::store::BlobStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info, warn};

/// Blob holding installed records
pub const INSTALLED_BLOB: &str = "installed";

/// What one install left behind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub version: String,
    /// RFC 3339 timestamp
    pub installed_at: String,
    /// Paths relative to the target directory
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InstalledDocument {
    #[serde(default)]
    installed: BTreeMap<String, InstalledPackage>,
}

/// Access to installed records in a store
pub struct InstalledRecords<'a> {
    store: &'a BlobStore,
}

impl<'a> InstalledRecords<'a> {
    pub fn new(store: &'a BlobStore) -> Self {
        Self { store }
    }

    fn load(&self) -> Result<InstalledDocument> {
        match self.store.get_yaml(INSTALLED_BLOB) {
            Ok(doc) => Ok(doc),
            Err(e) if e.is_not_found() => Ok(InstalledDocument::default()),
            Err(e) => Err(e),
        }
    }

    /// All installed packages, sorted by name
    pub fn list(&self) -> Result<BTreeMap<String, InstalledPackage>> {
        Ok(self.load()?.installed)
    }

    pub fn get(&self, name: &str) -> Result<Option<InstalledPackage>> {
        Ok(self.load()?.installed.remove(name))
    }

    /// Record `package` as installed, replacing any earlier record
    pub fn record(&self, package: &PackageInfo, files: Vec<String>) -> Result<()> {
        let record = InstalledPackage {
            version: package.version.clone(),
            installed_at: chrono::Utc::now().to_rfc3339(),
            files,
        };
        self.store
            .update_yaml(INSTALLED_BLOB, |doc: &mut InstalledDocument| {
                if let Some(previous) = doc.installed.insert(package.name.clone(), record) {
                    debug!(
                        "Replacing installed record for {} {}",
                        package.name, previous.version
                    );
                }
                Ok(())
            })
    }

    /// Drop the record for `name`, returning it
    pub fn forget(&self, name: &str) -> Result<InstalledPackage> {
        self.store
            .update_yaml(INSTALLED_BLOB, |doc: &mut InstalledDocument| {
                doc.installed
                    .remove(name)
                    .ok_or_else(|| Error::NotFound(format!("installed package {}", name)))
            })
    }
}

/// Remove an installed package's files and its record
///
/// Files already gone are skipped. Directories left empty are removed up to,
/// but not including, `target_dir`.
///
/// # Returns
///
/// * `Result<usize>` - Number of files deleted
pub fn remove_package(store: &BlobStore, target_dir: &Path, name: &str) -> Result<usize> {
    let records = InstalledRecords::new(store);
    let record = records
        .get(name)?
        .ok_or_else(|| Error::NotFound(format!("installed package {}", name)))?;

    let mut removed = 0;
    for file in &record.files {
        let path = target_dir.join(file);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("File already removed: {}", path.display());
            }
            Err(e) => {
                return Err(Error::IoError(format!(
                    "Failed to remove {}: {}",
                    path.display(),
                    e
                )));
            }
        }
        prune_empty_parents(&path, target_dir);
    }

    records.forget(name)?;
    info!("Removed {} {} ({} files)", name, record.version, removed);
    Ok(removed)
}

pub(crate) fn prune_empty_parents(path: &Path, target_dir: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == target_dir || !dir.starts_with(target_dir) {
            break;
        }
        // Fails on non-empty directories, which ends the walk
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
