// src/repository/mod.rs

//! Repository management
//!
//! This module provides functionality for:
//! - Registering and removing remote repositories
//! - Caching each repository's descriptive metadata in the data store
//! - Refreshing that metadata from the network
//!
//! The package index built from these repositories lives in [`index`].

pub mod index;

use crate::error::{Error, Result};
use crate::fetch::{Fetcher, join_url};
use crate::store::BlobStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

pub use index::{IndexBuilder, PackageIndex, PackageInfo};

/// Store blob holding the URL -> metadata map
pub const REPOSITORIES_BLOB: &str = "repositories";

/// Metadata document served at a repository's base URL
pub const REPOSITORY_DOCUMENT: &str = "repository.yaml";

/// Descriptive metadata for one repository; identity is `url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryInfo {
    pub url: String,
    pub name: String,
    pub description: String,
    pub maintainer: String,
}

/// What to do when one repository cannot be fetched during a bulk refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryErrorPolicy {
    /// Report the repository and continue with the rest
    #[default]
    Skip,
    /// Fail the whole operation on the first unreachable repository
    Abort,
}

/// Outcome of [`Registry::refresh_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: usize,
    pub failed: Vec<String>,
}

/// On-disk and on-wire form of the metadata (URL is the map key / base URL)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct RepositoryRecord {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default, rename = "mantainer", alias = "maintainer")]
    maintainer: String,
}

impl RepositoryRecord {
    fn into_info(self, url: &str) -> RepositoryInfo {
        RepositoryInfo {
            url: url.to_string(),
            name: self.name,
            description: self.description,
            maintainer: self.maintainer,
        }
    }
}

impl From<&RepositoryInfo> for RepositoryRecord {
    fn from(info: &RepositoryInfo) -> Self {
        Self {
            name: info.name.clone(),
            description: info.description.clone(),
            maintainer: info.maintainer.clone(),
        }
    }
}

type RepositoryMap = BTreeMap<String, RepositoryRecord>;

/// Check that every field of `info` is filled in
pub fn validate_repository_info(info: &RepositoryInfo) -> Result<()> {
    let missing: Vec<&str> = [
        ("url", &info.url),
        ("name", &info.name),
        ("description", &info.description),
        ("maintainer", &info.maintainer),
    ]
    .into_iter()
    .filter(|(_, value)| value.trim().is_empty())
    .map(|(field, _)| field)
    .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::Invalid(format!(
            "Repository info for '{}' is missing: {}",
            info.url,
            missing.join(", ")
        )))
    }
}

/// Configured repositories and their cached metadata
pub struct Registry<'a> {
    store: &'a BlobStore,
    fetcher: &'a dyn Fetcher,
    policy: RepositoryErrorPolicy,
}

impl<'a> Registry<'a> {
    pub fn new(store: &'a BlobStore, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            store,
            fetcher,
            policy: RepositoryErrorPolicy::default(),
        }
    }

    /// Set the per-repository failure policy used by `refresh_all`
    pub fn with_policy(mut self, policy: RepositoryErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn load(&self) -> Result<RepositoryMap> {
        match self.store.get_yaml(REPOSITORIES_BLOB) {
            Ok(repos) => Ok(repos),
            Err(e) if e.is_not_found() => Ok(RepositoryMap::new()),
            Err(e) => Err(e),
        }
    }

    /// Locked read-modify-write of the repository map
    fn update<R>(&self, update: impl FnOnce(&mut RepositoryMap) -> Result<R>) -> Result<R> {
        self.store.update_yaml(REPOSITORIES_BLOB, update)
    }

    /// All configured repository URLs; empty means none configured
    pub fn list_urls(&self) -> Result<Vec<String>> {
        Ok(self.load()?.into_keys().collect())
    }

    /// All configured repositories with their cached metadata
    pub fn list(&self) -> Result<Vec<RepositoryInfo>> {
        Ok(self
            .load()?
            .into_iter()
            .map(|(url, record)| record.into_info(&url))
            .collect())
    }

    /// Download `<url>/repository.yaml`
    pub fn fetch_info(&self, url: &str) -> Result<RepositoryInfo> {
        warn_if_insecure(url);
        let document_url = join_url(url, REPOSITORY_DOCUMENT);
        let body = self.fetcher.fetch_text(&document_url)?;
        let record: RepositoryRecord = serde_yaml::from_str(&body).map_err(|e| {
            Error::Invalid(format!("Invalid repository document at {}: {}", document_url, e))
        })?;
        Ok(record.into_info(url))
    }

    /// Cached metadata for `url`, falling back to the network
    ///
    /// A fetched value is returned as-is and is not written to the store.
    pub fn get_info(&self, url: &str) -> Result<RepositoryInfo> {
        if let Some(record) = self.load()?.remove(url) {
            return Ok(record.into_info(url));
        }

        debug!("Repository {} not cached, fetching metadata", url);
        self.fetch_info(url)
    }

    /// Register a new repository
    pub fn add(&self, info: RepositoryInfo) -> Result<()> {
        validate_repository_info(&info)?;
        warn_if_insecure(&info.url);

        self.update(|repos| {
            if repos.contains_key(&info.url) {
                warn!("Repository already exists: {}", info.url);
                return Err(Error::AlreadyExists(format!("repository {}", info.url)));
            }
            repos.insert(info.url.clone(), RepositoryRecord::from(&info));
            Ok(())
        })?;

        info!("Added repository: {} ({})", info.name, info.url);
        Ok(())
    }

    /// Unregister a repository
    pub fn remove(&self, url: &str) -> Result<()> {
        self.update(|repos| {
            if repos.remove(url).is_none() {
                warn!("Repository not found: {}", url);
                return Err(Error::NotFound(format!("repository {}", url)));
            }
            Ok(())
        })?;

        info!("Removed repository: {}", url);
        Ok(())
    }

    /// Re-fetch every repository's metadata and replace the cached records
    ///
    /// Fetching happens outside the store lock; repositories removed in the
    /// meantime are not re-added.
    pub fn refresh_all(&self) -> Result<RefreshReport> {
        let urls = self.list_urls()?;
        if urls.is_empty() {
            return Err(Error::NoRepositories);
        }

        let mut report = RefreshReport::default();
        let mut fetched = Vec::new();

        for url in urls {
            let result = self.fetch_info(&url).and_then(|info| {
                validate_repository_info(&info)?;
                Ok(info)
            });

            match result {
                Ok(info) => fetched.push(info),
                Err(e) => {
                    error!("Failed to fetch repository info: {} ({})", url, e);
                    if self.policy == RepositoryErrorPolicy::Abort {
                        return Err(e);
                    }
                    report.failed.push(url);
                }
            }
        }

        report.refreshed = self.update(|repos| {
            let mut refreshed = 0;
            for info in &fetched {
                match repos.get_mut(&info.url) {
                    Some(record) => {
                        *record = RepositoryRecord::from(info);
                        refreshed += 1;
                    }
                    None => debug!("Repository {} was removed during refresh", info.url),
                }
            }
            Ok(refreshed)
        })?;

        info!(
            "Refreshed {} repositories ({} failed)",
            report.refreshed,
            report.failed.len()
        );
        Ok(report)
    }
}

/// Repositories are expected to be served over HTTPS
fn is_secure_url(url: &str) -> bool {
    url.trim_start().to_ascii_lowercase().starts_with("https://")
}

fn warn_if_insecure(url: &str) {
    if !is_secure_url(url) {
        warn!("Repository URL is not using HTTPS: {}", url);
    }
}
