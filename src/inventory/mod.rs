//! Disk inventory
//!
//! Holds the installer's view of the host's block devices. The view is a
//! snapshot: devices attached after the last scan stay invisible until
//! `rescan()` is called, even though they are physically present.
//!
//! Enumeration itself is delegated to a `DeviceSource` (lsblk on a real host,
//! a JSON fixture in tests and demos).

pub mod fixture;
pub mod lsblk;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, StorageError};
use crate::types::Filesystem;

pub use fixture::FixtureSource;
pub use lsblk::LsblkSource;

/// Encryption state of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncryptionStatus {
    #[default]
    Plain,
    /// LUKS container whose contents are not visible yet
    LuksLocked,
    /// LUKS container opened; `Partition::filesystem` is the inner filesystem
    LuksUnlocked,
}

/// A partition on a disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Device name, e.g. `vda1`
    pub name: String,
    /// Name of the owning disk
    pub disk: String,
    /// 1-based partition number
    pub index: u32,
    pub size: u64,
    pub label: Option<String>,
    /// On-disk filesystem; `None` when unformatted or still locked
    pub filesystem: Option<Filesystem>,
    pub encryption: EncryptionStatus,
}

impl Partition {
    /// Returns true if the partition is an encrypted container that is still locked
    pub fn is_locked(&self) -> bool {
        self.encryption == EncryptionStatus::LuksLocked
    }

    /// Returns true if the partition may carry a mount point once unlocked
    pub fn is_mountable(&self) -> bool {
        match self.filesystem {
            Some(fs) => fs.is_mountable(),
            None => true,
        }
    }

    /// Format type shown next to the device, `"luks"` while locked
    pub fn format_label(&self) -> String {
        match (self.encryption, self.filesystem) {
            (EncryptionStatus::LuksLocked, _) => "luks".to_string(),
            (_, Some(fs)) => fs.to_string(),
            (_, None) => "unformatted".to_string(),
        }
    }
}

/// A block device with its partition table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Device name, e.g. `vda`
    pub name: String,
    /// Capacity in bytes
    pub size: u64,
    /// Partitions in table order
    pub partitions: Vec<Partition>,
}

impl Disk {
    /// Unpartitioned space in bytes
    pub fn free_space(&self) -> u64 {
        let used: u64 = self.partitions.iter().map(|p| p.size).sum();
        self.size.saturating_sub(used)
    }

    /// Find a partition on this disk by device name
    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Zero-size devices (empty card readers, unloaded media) cannot be targeted
    pub fn is_usable(&self) -> bool {
        self.size > 0
    }
}

impl fmt::Display for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (total {}, free {})",
            self.name,
            format_size(self.size),
            format_size(self.free_space())
        )
    }
}

/// Something that can enumerate the host's block devices.
pub trait DeviceSource: Send + Sync {
    /// Enumerate the devices currently attached to the host.
    fn enumerate(&self) -> anyhow::Result<Vec<Disk>>;
}

/// Outcome of a forced re-enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanReport {
    /// Disks that became visible
    pub added: Vec<String>,
    /// Disks that disappeared
    pub removed: Vec<String>,
}

impl RescanReport {
    /// Backs the "No additional disks detected" notice.
    pub fn no_additional_disks(&self) -> bool {
        self.added.is_empty()
    }
}

/// The installer's snapshot of usable disks.
pub struct DiskInventory {
    source: Arc<dyn DeviceSource>,
    disks: Vec<Disk>,
    scanned: bool,
}

impl fmt::Debug for DiskInventory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskInventory")
            .field("disks", &self.disks)
            .field("scanned", &self.scanned)
            .finish()
    }
}

impl DiskInventory {
    /// Create an inventory that has not scanned yet.
    pub fn new(source: Arc<dyn DeviceSource>) -> Self {
        Self {
            source,
            disks: Vec::new(),
            scanned: false,
        }
    }

    /// Return the current disks, enumerating on first use.
    ///
    /// Enumeration failures are logged and leave the previous snapshot in place.
    pub fn scan(&mut self) -> &[Disk] {
        if !self.scanned {
            match self.source.enumerate() {
                Ok(disks) => {
                    tracing::info!("Initial scan found {} disk(s)", disks.len());
                    self.disks = disks;
                    self.scanned = true;
                }
                Err(e) => tracing::warn!("Disk scan failed: {:#}", e),
            }
        }
        &self.disks
    }

    /// Force re-enumeration so newly attached devices become visible.
    ///
    /// Unlocked state of encrypted partitions survives the rescan.
    pub fn rescan(&mut self) -> Result<RescanReport> {
        let mut fresh = self
            .source
            .enumerate()
            .map_err(|e| StorageError::inventory(format!("Rescan failed: {:#}", e)))?;

        for disk in &mut fresh {
            for part in &mut disk.partitions {
                if let Some(old) = self.partition(&part.name) {
                    if old.encryption == EncryptionStatus::LuksUnlocked && part.is_locked() {
                        part.encryption = EncryptionStatus::LuksUnlocked;
                        part.filesystem = old.filesystem;
                    }
                }
            }
        }

        let before: BTreeSet<&str> = self.disks.iter().map(|d| d.name.as_str()).collect();
        let after: BTreeSet<&str> = fresh.iter().map(|d| d.name.as_str()).collect();
        let report = RescanReport {
            added: after.difference(&before).map(|s| s.to_string()).collect(),
            removed: before.difference(&after).map(|s| s.to_string()).collect(),
        };

        tracing::info!(
            "Rescan: {} disk(s), added {:?}, removed {:?}",
            fresh.len(),
            report.added,
            report.removed
        );

        self.disks = fresh;
        self.scanned = true;
        Ok(report)
    }

    /// Visible disks, in enumeration order
    pub fn disks(&self) -> &[Disk] {
        &self.disks
    }

    /// Returns true when no usable disk is visible
    pub fn is_empty(&self) -> bool {
        !self.disks.iter().any(Disk::is_usable)
    }

    /// Look up a disk by name
    pub fn disk(&self, name: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.name == name)
    }

    /// Look up a partition by name across all disks
    pub fn partition(&self, name: &str) -> Option<&Partition> {
        self.disks.iter().find_map(|d| d.partition(name))
    }

    /// Names of disks an installation could target
    pub fn usable_disks(&self) -> Vec<String> {
        self.disks
            .iter()
            .filter(|d| d.is_usable())
            .map(|d| d.name.clone())
            .collect()
    }

    /// Record that a LUKS partition was opened and expose its inner filesystem.
    pub fn mark_unlocked(&mut self, name: &str, inner: Option<Filesystem>) -> Result<()> {
        let part = self
            .disks
            .iter_mut()
            .flat_map(|d| d.partitions.iter_mut())
            .find(|p| p.name == name)
            .ok_or_else(|| StorageError::inventory(format!("Unknown device '{}'", name)))?;

        if part.encryption == EncryptionStatus::Plain {
            return Err(StorageError::validation(format!(
                "Device '{}' is not encrypted",
                name
            )));
        }

        part.encryption = EncryptionStatus::LuksUnlocked;
        part.filesystem = inner;
        tracing::debug!("{} unlocked, inner filesystem {:?}", name, inner);
        Ok(())
    }
}

/// Generate a partition device name from a disk name and partition number.
///
/// Handles both `sda` → `sda1` and `nvme0n1` → `nvme0n1p1` patterns.
pub fn partition_name(disk: &str, index: u32) -> String {
    if disk.ends_with(|c: char| c.is_ascii_digit()) {
        format!("{}p{}", disk, index)
    } else {
        format!("{}{}", disk, index)
    }
}

/// Render a byte count in decimal units with one fractional digit.
///
/// `16106127360` renders as `"16.1 GB"`, the way the disk table shows capacity.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["kB", "MB", "GB", "TB", "PB"];

    if bytes < 1000 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
