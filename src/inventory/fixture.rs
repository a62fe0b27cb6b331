//! In-memory device source described by JSON.
//!
//! Used for demos, the `run` command, and tests. Devices can be attached after
//! the inventory's first scan to model hot-plugged disks, and LUKS partitions
//! carry their passphrase so the source can double as the unlock backend.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{partition_name, DeviceSource, Disk, EncryptionStatus, Partition};
use crate::encryption::Passphrase;
use crate::types::Filesystem;
use crate::unlock::{DeviceUnlocker, UnlockOutcome};

/// A disk in a fixture file. Partition names are derived from the disk name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureDisk {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub partitions: Vec<FixturePartition>,
}

impl FixtureDisk {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            partitions: Vec::new(),
        }
    }

    pub fn with_partition(mut self, partition: FixturePartition) -> Self {
        self.partitions.push(partition);
        self
    }

    fn to_disk(&self) -> Disk {
        let partitions = self
            .partitions
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let index = i as u32 + 1;
                let locked = p.luks_passphrase.is_some();
                Partition {
                    name: partition_name(&self.name, index),
                    disk: self.name.clone(),
                    index,
                    size: p.size,
                    label: p.label.clone(),
                    filesystem: if locked { None } else { p.filesystem },
                    encryption: if locked {
                        EncryptionStatus::LuksLocked
                    } else {
                        EncryptionStatus::Plain
                    },
                }
            })
            .collect();

        Disk {
            name: self.name.clone(),
            size: self.size,
            partitions,
        }
    }
}

/// A partition in a fixture file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixturePartition {
    pub size: u64,
    #[serde(default)]
    pub filesystem: Option<Filesystem>,
    #[serde(default)]
    pub label: Option<String>,
    /// Present for LUKS partitions; `filesystem` is then the inner filesystem
    #[serde(default)]
    pub luks_passphrase: Option<String>,
}

impl FixturePartition {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            filesystem: None,
            label: None,
            luks_passphrase: None,
        }
    }

    pub fn filesystem(mut self, fs: Filesystem) -> Self {
        self.filesystem = Some(fs);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Make this a LUKS container holding `inner`
    pub fn luks(mut self, passphrase: impl Into<String>, inner: Option<Filesystem>) -> Self {
        self.luks_passphrase = Some(passphrase.into());
        self.filesystem = inner;
        self
    }
}

/// Fixture file layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FixtureFile {
    disks: Vec<FixtureDisk>,
}

/// Device source backed by fixture data.
#[derive(Debug, Default)]
pub struct FixtureSource {
    disks: Mutex<Vec<FixtureDisk>>,
}

impl FixtureSource {
    pub fn new(disks: Vec<FixtureDisk>) -> Self {
        Self {
            disks: Mutex::new(disks),
        }
    }

    /// Load a fixture from a JSON file of the form `{"disks": [...]}`
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read inventory fixture {:?}", path.as_ref()))?;
        let file: FixtureFile =
            serde_json::from_str(&content).context("Failed to parse inventory fixture JSON")?;
        Ok(Self::new(file.disks))
    }

    /// Physically attach a disk; it stays invisible until the inventory rescans.
    pub fn attach(&self, disk: FixtureDisk) {
        tracing::debug!("Fixture: attaching {}", disk.name);
        self.lock().push(disk);
    }

    /// Physically remove a disk.
    pub fn detach(&self, name: &str) {
        tracing::debug!("Fixture: detaching {}", name);
        self.lock().retain(|d| d.name != name);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<FixtureDisk>> {
        // Fixture data stays consistent even if a holder panicked
        self.disks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceSource for FixtureSource {
    fn enumerate(&self) -> Result<Vec<Disk>> {
        Ok(self.lock().iter().map(FixtureDisk::to_disk).collect())
    }
}

impl DeviceUnlocker for FixtureSource {
    fn unlock(&self, device: &str, passphrase: &Passphrase) -> Result<UnlockOutcome> {
        let disks = self.lock();
        let partition = disks.iter().find_map(|d| {
            d.partitions
                .iter()
                .enumerate()
                .find(|(i, _)| partition_name(&d.name, *i as u32 + 1) == device)
                .map(|(_, p)| p)
        });

        let partition = partition.with_context(|| format!("Unknown device '{}'", device))?;
        let expected = partition
            .luks_passphrase
            .as_deref()
            .with_context(|| format!("Device '{}' is not a LUKS container", device))?;

        if expected == passphrase.as_str() {
            Ok(UnlockOutcome::Opened {
                filesystem: partition.filesystem,
            })
        } else {
            Ok(UnlockOutcome::Rejected)
        }
    }
}
