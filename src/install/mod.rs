// src/install/mod.rs

//! Install pipeline
//!
//! Packages are installed one at a time, in resolution order. For each one:
//! download the artifact into a private work directory, verify its digest
//! when the index advertises one, extract it, copy `TARGET/` into the target
//! directory, run `post-install.sh` if present and record the install.
//!
//! The first failure stops the run. Packages already installed stay
//! installed. The failing package is not recorded and the files it newly
//! created in the target directory are removed again; files it overwrote
//! keep their new contents.

pub mod extract;
pub mod hook;
pub mod record;

pub use record::{INSTALLED_BLOB, InstalledPackage, InstalledRecords, remove_package};

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::repository::PackageInfo;
use crate::store::BlobStore;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Payload subdirectory copied into the target directory
pub const PAYLOAD_DIR: &str = "TARGET";

/// Callbacks observing an install run
pub trait InstallProgress {
    fn package_started(&mut self, _position: usize, _total: usize, _package: &PackageInfo) {}

    fn download_progress(&mut self, _package: &PackageInfo, _downloaded: u64, _total: Option<u64>) {}

    fn package_finished(&mut self, _position: usize, _total: usize, _package: &PackageInfo) {}
}

/// Reports progress through the log, download progress in 25% steps
#[derive(Debug, Default)]
pub struct LogProgress {
    reported_percent: u64,
}

impl InstallProgress for LogProgress {
    fn package_started(&mut self, position: usize, total: usize, package: &PackageInfo) {
        self.reported_percent = 0;
        info!(
            "[{}/{}] Installing {} {}",
            position, total, package.name, package.version
        );
    }

    fn download_progress(&mut self, package: &PackageInfo, downloaded: u64, total: Option<u64>) {
        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };
        let step = (downloaded * 100 / total).min(100) / 25 * 25;
        if step > self.reported_percent {
            self.reported_percent = step;
            info!(
                "Downloading {}: {}% ({} / {} bytes)",
                package.name, step, downloaded, total
            );
        }
    }

    fn package_finished(&mut self, position: usize, total: usize, package: &PackageInfo) {
        info!(
            "[{}/{}] Installed {} {}",
            position, total, package.name, package.version
        );
    }
}

/// Progress sink that ignores everything
pub struct NoProgress;

impl InstallProgress for NoProgress {}

/// Installs resolved packages into a target directory
pub struct Installer<'a> {
    store: &'a BlobStore,
    fetcher: &'a dyn Fetcher,
    target_dir: PathBuf,
    work_dir: Option<PathBuf>,
}

impl<'a> Installer<'a> {
    pub fn new(store: &'a BlobStore, fetcher: &'a dyn Fetcher, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            fetcher,
            target_dir: target_dir.into(),
            work_dir: None,
        }
    }

    /// Create per-package work directories under `dir` instead of the
    /// system temp directory
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Install `packages` in order
    ///
    /// # Arguments
    ///
    /// * `packages` - Resolver output, dependencies first
    /// * `progress` - Receives per-package and download callbacks
    pub fn install(&self, packages: &[PackageInfo], progress: &mut dyn InstallProgress) -> Result<()> {
        let total = packages.len();
        for (i, package) in packages.iter().enumerate() {
            progress.package_started(i + 1, total, package);

            if let Err(e) = self.install_one(package, progress) {
                error!("Failed to install {}: {}", package.name, e);
                return Err(e);
            }

            progress.package_finished(i + 1, total, package);
        }

        info!(
            "Installed {} package(s) into {}",
            total,
            self.target_dir.display()
        );
        Ok(())
    }

    fn install_one(&self, package: &PackageInfo, progress: &mut dyn InstallProgress) -> Result<()> {
        if package.url.is_empty() {
            return Err(Error::Invalid(format!(
                "package {} has no download URL",
                package.name
            )));
        }

        let work = self.create_work_dir(&package.name)?;
        let artifact = work.path().join("artifact");

        self.fetcher
            .download(&package.url, &artifact, &mut |downloaded, total| {
                progress.download_progress(package, downloaded, total)
            })?;

        if let Some(expected) = &package.sha256 {
            verify_checksum(&artifact, expected)?;
        }

        let payload = work.path().join("payload");
        extract::unpack(&artifact, &payload)?;

        let mut copied = CopiedPayload::default();
        let result = copy_payload(&payload.join(PAYLOAD_DIR), &self.target_dir, &mut copied)
            .and_then(|()| {
                debug!("{} placed {} files", package.name, copied.files.len());
                hook::run_post_install(package, &payload, &self.target_dir)
            })
            .and_then(|_| InstalledRecords::new(self.store).record(package, copied.files.clone()));

        if let Err(e) = result {
            self.roll_back(package, &copied);
            return Err(e);
        }
        Ok(())
    }

    /// Remove the files a failed install created
    fn roll_back(&self, package: &PackageInfo, copied: &CopiedPayload) {
        if copied.created.is_empty() {
            return;
        }

        warn!(
            "Removing {} new files placed by {}",
            copied.created.len(),
            package.name
        );
        for path in copied.created.iter().rev() {
            if let Err(e) = fs::remove_file(path) {
                warn!("Failed to remove {}: {}", path.display(), e);
                continue;
            }
            record::prune_empty_parents(path, &self.target_dir);
        }
    }

    fn create_work_dir(&self, name: &str) -> Result<TempDir> {
        let prefix = format!("openspm-{}-", name);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match &self.work_dir {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        };
        dir.map_err(|e| Error::IoError(format!("Failed to create work directory: {}", e)))
    }
}

/// Check a file's SHA-256 digest against a hex string
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    debug!("Verifying checksum for {}", path.display());

    let mut file = File::open(path)
        .map_err(|e| Error::IoError(format!("Failed to open file for checksum: {}", e)))?;

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::IoError(format!("Failed to read file for checksum: {}", e)))?;

    let actual = format!("{:x}", hasher.finalize());
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    debug!("Checksum verified: {}", expected);
    Ok(())
}

/// Files placed by one package's payload copy
#[derive(Debug, Default)]
struct CopiedPayload {
    /// Every copied file, relative to the target directory
    files: Vec<String>,
    /// Destination paths that did not exist before the copy
    created: Vec<PathBuf>,
}

/// Copy the payload tree into `dest_root`, overwriting existing files
///
/// `copied` is filled in as files land, so it is accurate even when the
/// copy fails part way.
fn copy_payload(src_root: &Path, dest_root: &Path, copied: &mut CopiedPayload) -> Result<()> {
    if !src_root.is_dir() {
        warn!("Package payload has no {}/ directory, nothing to copy", PAYLOAD_DIR);
        return Ok(());
    }

    fs::create_dir_all(dest_root).map_err(|e| {
        Error::IoError(format!("Failed to create {}: {}", dest_root.display(), e))
    })?;

    for entry in WalkDir::new(src_root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::IoError(format!("Failed to walk payload: {}", e)))?;
        let relative = entry
            .path()
            .strip_prefix(src_root)
            .map_err(|e| Error::IoError(format!("Unexpected payload path: {}", e)))?;
        let dest = dest_root.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest).map_err(|e| {
                Error::IoError(format!("Failed to create {}: {}", dest.display(), e))
            })?;
            continue;
        }

        // Replace rather than write through an existing symlink
        let existed = dest.symlink_metadata().is_ok();
        if existed {
            fs::remove_file(&dest).map_err(|e| {
                Error::IoError(format!("Failed to replace {}: {}", dest.display(), e))
            })?;
        }

        if file_type.is_symlink() {
            copy_symlink(entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest).map_err(|e| {
                Error::IoError(format!(
                    "Failed to copy {} to {}: {}",
                    entry.path().display(),
                    dest.display(),
                    e
                ))
            })?;
        }

        debug!("Installed {}", dest.display());
        copied.files.push(relative.to_string_lossy().to_string());
        if !existed {
            copied.created.push(dest);
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(&link, dest).map_err(|e| {
        Error::IoError(format!("Failed to create symlink {}: {}", dest.display(), e))
    })
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> Result<()> {
    fs::copy(src, dest)?;
    Ok(())
}
