// src/resolver.rs

//! Dependency resolution
//!
//! Resolution is name-based reachability over the package index with a flat
//! tag filter. The result lists every package that must be installed,
//! dependencies before dependents, each name once.

use crate::error::{Error, Result};
use crate::repository::{PackageIndex, PackageInfo};
use crate::tags::TagSet;
use std::collections::HashSet;
use tracing::{debug, error};

/// Computes install sets against one index and one supported tag set
pub struct Resolver<'a> {
    index: &'a PackageIndex,
    supported: TagSet,
}

/// Accumulated state for one `resolve` call
#[derive(Default)]
struct Resolution {
    collected: Vec<PackageInfo>,
    finalized: HashSet<String>,
    /// Packages whose dependencies are still being resolved, outermost first
    resolving: Vec<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(index: &'a PackageIndex, supported_tags: &str) -> Self {
        Self {
            index,
            supported: TagSet::parse(supported_tags),
        }
    }

    /// Resolve `name` into an ordered, duplicate-free install set
    ///
    /// # Errors
    ///
    /// * `NotFound` - `name` or one of its dependencies is not in the index
    /// * `Incompatible` - a package needs tags the host does not support
    /// * `CyclicDependency` - a package transitively depends on itself
    pub fn resolve(&self, name: &str) -> Result<Vec<PackageInfo>> {
        let mut state = Resolution::default();
        self.visit(name, None, &mut state)?;

        debug!(
            "Resolved {} into {} packages: {}",
            name,
            state.collected.len(),
            state
                .collected
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(state.collected)
    }

    fn visit(&self, name: &str, required_by: Option<&str>, state: &mut Resolution) -> Result<()> {
        let package = self.index.get(name).ok_or_else(|| {
            let what = match required_by {
                Some(parent) => format!("package {} (required by {})", name, parent),
                None => format!("package {}", name),
            };
            error!("Package not found: {}", what);
            Error::NotFound(what)
        })?;

        if !self.supported.satisfies(&package.tags) {
            error!(
                "Package {} is not compatible: missing tags {}",
                name,
                self.supported.missing(&package.tags).join(";")
            );
            return Err(Error::Incompatible {
                package: name.to_string(),
                tags: package.tags.clone(),
            });
        }

        state.resolving.push(name.to_string());
        for dependency in &package.dependencies {
            if state.finalized.contains(dependency) {
                continue;
            }
            if let Some(start) = state.resolving.iter().position(|n| n == dependency) {
                let mut cycle = state.resolving[start..].to_vec();
                cycle.push(dependency.clone());
                let cycle = cycle.join(" -> ");
                error!("Dependency cycle detected: {}", cycle);
                return Err(Error::CyclicDependency(cycle));
            }
            self.visit(dependency, Some(name), state)?;
        }
        state.resolving.pop();

        state.finalized.insert(name.to_string());
        state.collected.push(package.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST_TAGS: &str = "bin;linux-x86_64;gcc";

    fn package(name: &str, dependencies: &[&str]) -> PackageInfo {
        PackageInfo {
            name: name.to_string(),
            version: "1.0".to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            tags: "bin;linux-x86_64".to_string(),
            ..Default::default()
        }
    }

    fn names(resolved: &[PackageInfo]) -> Vec<&str> {
        resolved.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_chain_resolves_dependencies_first() {
        let index = PackageIndex::from_packages([
            package("a", &["b"]),
            package("b", &["c"]),
            package("c", &[]),
        ]);

        let resolved = Resolver::new(&index, HOST_TAGS).resolve("a").unwrap();
        assert_eq!(names(&resolved), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_shared_dependency_listed_once() {
        for deps in [&["b", "c"][..], &["c", "b"][..]] {
            let index = PackageIndex::from_packages([
                package("a", deps),
                package("b", &["c"]),
                package("c", &[]),
            ]);

            let resolved = Resolver::new(&index, HOST_TAGS).resolve("a").unwrap();
            assert_eq!(names(&resolved), vec!["c", "b", "a"]);
        }
    }

    #[test]
    fn test_diamond() {
        let index = PackageIndex::from_packages([
            package("app", &["left", "right"]),
            package("left", &["base"]),
            package("right", &["base"]),
            package("base", &[]),
        ]);

        let resolved = Resolver::new(&index, HOST_TAGS).resolve("app").unwrap();
        assert_eq!(names(&resolved), vec!["base", "left", "right", "app"]);
    }

    #[test]
    fn test_missing_package() {
        let index = PackageIndex::from_packages([package("a", &[])]);

        let result = Resolver::new(&index, HOST_TAGS).resolve("nope");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_missing_dependency_names_parent() {
        let index = PackageIndex::from_packages([package("a", &["ghost"])]);

        match Resolver::new(&index, HOST_TAGS).resolve("a") {
            Err(Error::NotFound(what)) => {
                assert!(what.contains("ghost"));
                assert!(what.contains("required by a"));
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_incompatible_package() {
        let index = PackageIndex::from_packages([package("foo", &[])]);

        let result = Resolver::new(&index, "bin;windows-x86_64").resolve("foo");
        match result {
            Err(Error::Incompatible { package, tags }) => {
                assert_eq!(package, "foo");
                assert_eq!(tags, "bin;linux-x86_64");
            }
            other => panic!("expected Incompatible, got {:?}", other),
        }
    }

    #[test]
    fn test_incompatible_dependency_fails_whole_resolution() {
        let mut native = package("native", &[]);
        native.tags = "bin;linux-aarch64".to_string();
        let index = PackageIndex::from_packages([package("app", &["native"]), native]);

        let result = Resolver::new(&index, HOST_TAGS).resolve("app");
        assert!(matches!(result, Err(Error::Incompatible { package, .. }) if package == "native"));
    }

    #[test]
    fn test_untagged_package_is_always_compatible() {
        let mut plain = package("plain", &[]);
        plain.tags.clear();
        let index = PackageIndex::from_packages([plain]);

        assert!(Resolver::new(&index, "").resolve("plain").is_ok());
    }

    #[test]
    fn test_cycle_is_detected() {
        let index = PackageIndex::from_packages([
            package("a", &["b"]),
            package("b", &["c"]),
            package("c", &["a"]),
        ]);

        match Resolver::new(&index, HOST_TAGS).resolve("a") {
            Err(Error::CyclicDependency(cycle)) => assert_eq!(cycle, "a -> b -> c -> a"),
            other => panic!("expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let index = PackageIndex::from_packages([package("a", &["a"])]);

        let result = Resolver::new(&index, HOST_TAGS).resolve("a");
        assert!(matches!(result, Err(Error::CyclicDependency(_))));
    }
}
