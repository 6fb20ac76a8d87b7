// src/tags.rs

//! Tag-based compatibility filtering
//!
//! Tags are semicolon-separated capability tokens such as `bin`,
//! `linux-x86_64` or `gcc-13`. A package is installable when every tag it
//! requires is in the host's supported set.

use std::collections::HashSet;

/// Split a semicolon-separated tag string, dropping empty tokens
pub fn split_tags(tags: &str) -> Vec<&str> {
    tags.split(';')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// True iff every tag in `required` appears in `supported`
pub fn compatible(supported: &str, required: &str) -> bool {
    TagSet::parse(supported).satisfies(required)
}

/// Parsed set of supported tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: HashSet<String>,
}

impl TagSet {
    /// Parse a semicolon-separated tag string
    pub fn parse(tags: &str) -> Self {
        Self {
            tags: split_tags(tags).into_iter().map(str::to_string).collect(),
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Check a package's required tag string against this set
    pub fn satisfies(&self, required: &str) -> bool {
        split_tags(required).into_iter().all(|tag| self.contains(tag))
    }

    /// Required tags that are not in this set
    pub fn missing<'a>(&self, required: &'a str) -> Vec<&'a str> {
        split_tags(required)
            .into_iter()
            .filter(|tag| !self.contains(tag))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}
