// src/repository/index.rs

//! Package index
//!
//! The index is rebuilt wholesale from the network: every configured
//! repository's `pkg-list.yaml` is fetched (following its `depend` list of
//! further repositories), records are merged by package name with the last
//! one winning, and the result replaces the `packages` blob.

use super::{Registry, RepositoryErrorPolicy};
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, join_url};
use crate::store::BlobStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, warn};

/// Store blob holding the merged index
pub const PACKAGES_BLOB: &str = "packages";

/// Package list document served at a repository's base URL
pub const PACKAGE_LIST_DOCUMENT: &str = "pkg-list.yaml";

/// Package metadata as published by a repository; identity is `name`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub maintainer: String,
    /// Names of packages that must be installed first
    pub dependencies: Vec<String>,
    /// Semicolon-separated tags the host must support
    pub tags: String,
    /// Artifact download URL
    pub url: String,
    /// Optional hex SHA-256 of the artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Remote `pkg-list.yaml`
#[derive(Debug, Deserialize)]
struct PackageListDocument {
    #[serde(default)]
    depend: Vec<String>,
    packages: Vec<PackageInfo>,
}

/// Stored `packages` blob
#[derive(Debug, Serialize, Deserialize)]
struct IndexDocument {
    packages: Vec<PackageInfo>,
}

/// Merged, name-keyed view of every known package
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageIndex {
    packages: BTreeMap<String, PackageInfo>,
}

impl PackageIndex {
    /// Build an index; a later package with an existing name replaces it
    pub fn from_packages(packages: impl IntoIterator<Item = PackageInfo>) -> Self {
        let mut index = Self::default();
        for package in packages {
            index.insert(package);
        }
        index
    }

    fn insert(&mut self, package: PackageInfo) {
        if let Some(previous) = self.packages.insert(package.name.clone(), package) {
            debug!(
                "Package {} {} overridden by a later repository",
                previous.name, previous.version
            );
        }
    }

    /// Load the index stored by the last rebuild
    pub fn load(store: &BlobStore) -> Result<Self> {
        let document: IndexDocument = store.get_yaml(PACKAGES_BLOB).map_err(|e| {
            if e.is_not_found() {
                Error::NotFound("package index (run `openspm update-packages` first)".to_string())
            } else {
                e
            }
        })?;
        Ok(Self::from_packages(document.packages))
    }

    /// Replace the stored index with this one
    pub fn save(&self, store: &BlobStore) -> Result<()> {
        let document = IndexDocument {
            packages: self.packages.values().cloned().collect(),
        };
        store.put_yaml(PACKAGES_BLOB, &document)
    }

    pub fn get(&self, name: &str) -> Option<&PackageInfo> {
        self.packages.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageInfo> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Case-insensitive substring match on name and description
    pub fn search(&self, pattern: &str) -> Vec<&PackageInfo> {
        let pattern = pattern.to_lowercase();
        self.iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&pattern)
                    || p.description.to_lowercase().contains(&pattern)
            })
            .collect()
    }
}

/// Rebuilds the package index from all configured repositories
pub struct IndexBuilder<'a> {
    store: &'a BlobStore,
    fetcher: &'a dyn Fetcher,
    policy: RepositoryErrorPolicy,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(store: &'a BlobStore, fetcher: &'a dyn Fetcher) -> Self {
        Self {
            store,
            fetcher,
            policy: RepositoryErrorPolicy::default(),
        }
    }

    /// Set the per-repository failure policy
    pub fn with_policy(mut self, policy: RepositoryErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Fetch every repository's package list, merge, and store the result
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of packages in the new index
    pub fn rebuild(&self) -> Result<usize> {
        let urls = Registry::new(self.store, self.fetcher).list_urls()?;
        if urls.is_empty() {
            warn!("No repositories found. Cannot update packages.");
            return Err(Error::NoRepositories);
        }

        let mut index = PackageIndex::default();
        for url in &urls {
            let mut visited = HashSet::new();
            let mut packages = Vec::new();
            match self.fetch_tree(url, &mut visited, &mut packages) {
                Ok(()) => {
                    debug!("Repository {} contributed {} packages", url, packages.len());
                    for package in packages {
                        index.insert(package);
                    }
                }
                Err(e) if self.policy == RepositoryErrorPolicy::Abort => {
                    error!("Failed to fetch packages from repository: {} ({})", url, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Failed to fetch packages from repository: {} ({}). Skipping.", url, e);
                }
            }
        }

        index.save(self.store).map_err(|e| {
            error!("Failed to write package index: {}", e);
            e
        })?;

        info!("Successfully updated packages list ({} packages)", index.len());
        Ok(index.len())
    }

    /// Collect `url`'s packages, preceded by those of its `depend` repositories
    fn fetch_tree(
        &self,
        url: &str,
        visited: &mut HashSet<String>,
        out: &mut Vec<PackageInfo>,
    ) -> Result<()> {
        if !visited.insert(url.trim_end_matches('/').to_string()) {
            debug!("Repository {} already fetched in this tree", url);
            return Ok(());
        }

        let document = self.fetch_package_list(url)?;

        for dependency in &document.depend {
            match self.fetch_tree(dependency, visited, out) {
                Ok(()) => {}
                Err(e) if self.policy == RepositoryErrorPolicy::Abort => return Err(e),
                Err(e) => warn!(
                    "Failed to fetch dependent repository: {} ({}). Skipping.",
                    dependency, e
                ),
            }
        }

        for package in document.packages {
            if package.name.trim().is_empty() {
                warn!("Ignoring package without a name in {}", url);
                continue;
            }
            out.push(package);
        }
        Ok(())
    }

    fn fetch_package_list(&self, url: &str) -> Result<PackageListDocument> {
        let document_url = join_url(url, PACKAGE_LIST_DOCUMENT);
        let body = self.fetcher.fetch_text(&document_url)?;
        serde_yaml::from_str(&body).map_err(|e| {
            error!("Invalid package index format in repository: {}", url);
            Error::Invalid(format!("Invalid package list at {}: {}", document_url, e))
        })
    }
}
