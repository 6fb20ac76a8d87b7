// src/error.rs

use thiserror::Error;

/// Core error types for OpenSPM
#[derive(Error, Debug)]
pub enum Error {
    /// Missing blob, repository, package or installed record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity already registered
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Malformed repository info, document or store archive
    #[error("Invalid data: {0}")]
    Invalid(String),

    /// Unreachable host or non-success response
    #[error("Request to {url} failed: {}", status.map_or_else(|| "no response".to_string(), |s| format!("HTTP {s}")))]
    Network { url: String, status: Option<u16> },

    /// Package tags not covered by the supported tag set
    #[error("Package {package} is not compatible with this system (requires tags: {tags})")]
    Incompatible { package: String, tags: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// YAML (de)serialization errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Post-install script exited unsuccessfully
    #[error("Post-install script for {package} failed with {}", code.map_or_else(|| "a signal".to_string(), |c| format!("exit code {c}")))]
    Script { package: String, code: Option<i32> },

    /// No repositories are configured
    #[error("No repositories configured")]
    NoRepositories,

    /// A package depends on itself through its dependency chain
    #[error("Cyclic dependency: {0}")]
    CyclicDependency(String),

    /// Downloaded artifact does not match the advertised digest
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

/// Result type alias using OpenSPM's Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for the `NotFound` class of failures
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
