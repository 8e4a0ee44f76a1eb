use crate::config::types::{JailError, Result};
/// Configuration loading from firejail.json
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/firejail/firejail.json";

/// System-wide sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JailConfig {
    /// Base run directory, `/run/<app>`
    pub run_base: PathBuf,
    /// Bind /dev and X11 into chroot roots and run the desktop hooks
    pub chroot_desktop: bool,
    /// Allow the chroot strategy
    pub chroot: bool,
    /// Allow the overlay strategy
    pub overlayfs: bool,
    /// Remount /proc and /sys and blacklist kernel-sensitive paths
    pub remount_proc_sys: bool,
    /// Keep kernel symbol information visible
    pub allow_debuggers: bool,
    /// Stage a private copy of cp in the mnt tmpfs while building
    pub stage_copy_tool: bool,
    /// Write the fs log to `<mnt>/fslogger`
    pub fslogger: bool,
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            run_base: PathBuf::from("/run/firejail"),
            chroot_desktop: true,
            chroot: true,
            overlayfs: true,
            remount_proc_sys: true,
            allow_debuggers: false,
            stage_copy_tool: false,
            fslogger: true,
        }
    }
}

impl JailConfig {
    /// Load configuration; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("{} not found, using default configuration", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            JailError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: JailConfig = serde_json::from_str(&content).map_err(|e| {
            JailError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        if !config.run_base.is_absolute() {
            return Err(JailError::Config(format!(
                "run_base must be absolute: {}",
                config.run_base.display()
            )));
        }
        Ok(config)
    }
}
