// src/install/hook.rs

//! Post-install script execution

use crate::error::{Error, Result};
use crate::repository::PackageInfo;
use std::path::Path;
use std::process::Command;
use tracing::{debug, error, info, warn};

/// Script looked up at the root of the extracted payload
pub const POST_INSTALL_SCRIPT: &str = "post-install.sh";

/// Environment handed to the post-install script
pub fn hook_env(
    package: &PackageInfo,
    target_dir: &Path,
    source_dir: &Path,
) -> Vec<(&'static str, String)> {
    vec![
        ("SPM_PACKAGE_NAME", package.name.clone()),
        ("SPM_PACKAGE_VERSION", package.version.clone()),
        ("SPM_PACKAGE_MAINTAINER", package.maintainer.clone()),
        ("SPM_PACKAGE_DESCRIPTION", package.description.clone()),
        ("SPM_PACKAGE_TAGS", package.tags.clone()),
        ("SPM_TARGET_DIR", target_dir.display().to_string()),
        ("SPM_SOURCE_DIR", source_dir.display().to_string()),
    ]
}

/// Run the package's post-install script, if it ships one
///
/// The script runs under `sh` with the payload directory as working
/// directory. Returns `false` when the payload has no script.
///
/// # Errors
///
/// `Script` when the script exits unsuccessfully, `IoError` when it cannot
/// be started.
pub fn run_post_install(package: &PackageInfo, payload_dir: &Path, target_dir: &Path) -> Result<bool> {
    let script = payload_dir.join(POST_INSTALL_SCRIPT);
    if !script.is_file() {
        debug!("{} has no post-install script", package.name);
        return Ok(false);
    }

    info!("Running post-install script for {}", package.name);
    let output = Command::new("sh")
        .arg(&script)
        .current_dir(payload_dir)
        .envs(hook_env(package, target_dir, payload_dir))
        .output()
        .map_err(|e| {
            Error::IoError(format!(
                "Failed to run post-install script for {}: {}",
                package.name, e
            ))
        })?;

    for line in String::from_utf8_lossy(&output.stdout).lines() {
        debug!("[{}] {}", package.name, line);
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        warn!("[{}] {}", package.name, line);
    }

    if !output.status.success() {
        error!(
            "Post-install script for {} exited with {}",
            package.name, output.status
        );
        return Err(Error::Script {
            package: package.name.clone(),
            code: output.status.code(),
        });
    }

    Ok(true)
}
