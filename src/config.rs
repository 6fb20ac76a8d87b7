// src/config.rs

//! OpenSPM configuration
//!
//! Loaded once per invocation from a YAML file, then adjusted by command
//! line flags. Every key is optional.

use crate::error::{Error, Result};
use crate::repository::RepositoryErrorPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/openspm/config.yaml";

/// Store file name inside the data directory
pub const DATA_ARCHIVE: &str = "data.bin";

fn default_data_dir() -> PathBuf {
    PathBuf::from("/etc/openspm/")
}

fn default_target_dir() -> PathBuf {
    PathBuf::from("/usr/local/")
}

/// `<os>-<arch>` of the running host, e.g. `linux-x86_64`
pub fn host_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

fn default_true() -> bool {
    true
}

fn default_http_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "dataDir", default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(rename = "targetDir", default = "default_target_dir")]
    pub target_dir: PathBuf,

    #[serde(default = "host_platform")]
    pub platform: String,

    /// Semicolon-delimited tags; `bin;<platform>` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_tags: Option<String>,

    #[serde(rename = "colorOutput", default = "default_true")]
    pub color_output: bool,

    #[serde(default)]
    pub debug: bool,

    /// False on hosts where OpenSPM must not run
    #[serde(default = "default_true")]
    pub supported: bool,

    #[serde(default)]
    pub unsupported_msg: String,

    #[serde(rename = "onRepositoryError", default)]
    pub on_repository_error: RepositoryErrorPolicy,

    #[serde(rename = "httpTimeoutSecs", default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            target_dir: default_target_dir(),
            platform: host_platform(),
            supported_tags: None,
            color_output: true,
            debug: false,
            supported: true,
            unsupported_msg: String::new(),
            on_repository_error: RepositoryErrorPolicy::default(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

/// Where a loaded configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No (or an empty) file; built-in defaults
    Defaults,
}

/// Command line values that take precedence over the file
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub target_dir: Option<PathBuf>,
    pub supported_tags: Option<String>,
    pub no_color: bool,
    pub debug: bool,
}

impl Config {
    /// Load configuration from `path`
    ///
    /// A missing or empty file yields the defaults, reported as
    /// `ConfigSource::Defaults` so the caller can log it once logging is up.
    /// An unreadable or malformed file is an error.
    pub fn load(path: &Path) -> Result<(Self, ConfigSource)> {
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read config {}: {}", path.display(), e))
        })?;

        if content.trim().is_empty() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            Error::Invalid(format!("config {}: {}", path.display(), e))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok((config, ConfigSource::File))
    }

    /// Write the configuration to `path` as YAML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        fs::write(path, self.to_yaml()?).map_err(|e| {
            Error::IoError(format!("Failed to write config {}: {}", path.display(), e))
        })?;
        info!("Wrote config to {}", path.display());
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(dir) = &overrides.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(dir) = &overrides.target_dir {
            self.target_dir = dir.clone();
        }
        if let Some(tags) = &overrides.supported_tags {
            self.supported_tags = Some(tags.clone());
        }
        if overrides.no_color {
            self.color_output = false;
        }
        if overrides.debug {
            self.debug = true;
        }
    }

    /// Effective supported tag string
    pub fn supported_tags(&self) -> String {
        self.supported_tags
            .clone()
            .unwrap_or_else(|| format!("bin;{}", self.platform))
    }

    pub fn data_archive_path(&self) -> PathBuf {
        self.data_dir.join(DATA_ARCHIVE)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }
}
