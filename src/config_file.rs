//! Workflow configuration file handling.
//!
//! Policies the storage workflow leaves to the deployment (default scheme,
//! size thresholds, password rules, unlock skip behaviour, firmware) are
//! loaded from JSON. Missing fields fall back to defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::hardware::{BootRequirements, FirmwareMode};
use crate::types::{Filesystem, FirmwareSetting, Scheme, UnlockSkipPolicy};

/// Smallest layout an automatic scheme will build (5 GB)
pub const DEFAULT_MIN_INSTALL_SIZE: u64 = 5_000_000_000;
/// Minimum passphrase length for disk encryption
pub const DEFAULT_PASSWORD_MIN_LENGTH: usize = 8;

/// Storage workflow configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Scheme preselected on the installation method step
    pub default_scheme: Scheme,
    /// Bytes an automatic layout needs on the selected disks
    pub min_install_size: u64,
    pub password_min_length: usize,
    pub unlock_skip_policy: UnlockSkipPolicy,
    /// Format type used when reformatting a device with no known filesystem
    pub default_filesystem: Filesystem,
    pub firmware: FirmwareSetting,
    /// Whether `/boot` must be assigned in a manual layout
    pub require_boot: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_scheme: Scheme::EraseAll,
            min_install_size: DEFAULT_MIN_INSTALL_SIZE,
            password_min_length: DEFAULT_PASSWORD_MIN_LENGTH,
            unlock_skip_policy: UnlockSkipPolicy::Reprompt,
            default_filesystem: Filesystem::Xfs,
            firmware: FirmwareSetting::Auto,
            require_boot: false,
        }
    }
}

impl WorkflowConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.password_min_length == 0 {
            anyhow::bail!("password_min_length must be at least 1");
        }
        if self.min_install_size == 0 {
            anyhow::bail!("min_install_size must be greater than zero");
        }
        if !self.default_filesystem.is_mountable() {
            anyhow::bail!(
                "default_filesystem '{}' cannot hold a mount point",
                self.default_filesystem
            );
        }
        Ok(())
    }

    /// Boot requirements after resolving the firmware setting.
    pub fn boot_requirements(&self) -> BootRequirements {
        BootRequirements::new(FirmwareMode::resolve(self.firmware), self.require_boot)
    }
}
