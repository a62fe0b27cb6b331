//! Storage plans.
//!
//! A `StoragePlan` is what a partitioning object snapshots when the workflow
//! enters review: an ordered list of atomic `StorageOp`s for the disk tooling
//! plus the rows the review screen shows.
//!
//! # Automatic Layout
//!
//! | Firmware | Layout on the target disk |
//! |----------|---------------------------|
//! | BIOS     | biosboot (1 MiB) → /boot (1 GiB, ext4) → / (rest) |
//! | UEFI     | EFI (600 MiB, vfat, /boot/efi) → /boot (1 GiB, ext4) → / (rest) |
//!
//! With encryption enabled the root partition is LUKS-formatted, opened as
//! `luks-<partition>`, and the filesystem goes on the opened mapping.
//!
//! Use-free-space reuses an ESP (UEFI) or biosboot partition (BIOS) already on
//! the target disk instead of creating a second one.
//!
//! # Design
//!
//! - **Pure logic**: No I/O, no side effects. Only generates the plan
//! - **Typed output**: Each `StorageOp` maps to one disk tooling call

use serde::Serialize;
use std::fmt;

use crate::error::{Result, StorageError};
use crate::hardware::{BootRequirements, BOOT_MOUNT_POINT, EFI_MOUNT_POINT, ROOT_MOUNT_POINT};
use crate::inventory::{format_size, partition_name, Disk, EncryptionStatus, Partition};
use crate::types::{Filesystem, InitializationMode, PartitioningKind, Scheme};

pub const BIOSBOOT_SIZE: u64 = 1024 * 1024;
pub const EFI_SIZE: u64 = 600 * 1024 * 1024;
pub const BOOT_SIZE: u64 = 1024 * 1024 * 1024;

// ============================================================================
// Storage Operation Types
// ============================================================================

/// A single atomic storage operation in the plan.
///
/// Operations are ordered: the plan generator ensures correct sequencing
/// (clear before create, LuksFormat and LuksOpen before Format, Format
/// before Mount).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum StorageOp {
    /// Remove every partition from the disk
    ClearDisk { disk: String },

    /// Create a partition; `size == None` takes the remaining space
    CreatePartition {
        disk: String,
        device: String,
        size: Option<u64>,
    },

    /// Format a partition as a LUKS2 container
    LuksFormat { device: String },

    /// Open a LUKS container as the mapped device `name`
    LuksOpen { device: String, name: String },

    /// Create a filesystem on a device
    Format { device: String, filesystem: Filesystem },

    /// Mount a device at a mount point of the target system
    Mount { device: String, mount_point: String },
}

impl fmt::Display for StorageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClearDisk { disk } => write!(f, "ClearDisk({})", disk),
            Self::CreatePartition { disk, device, size } => match size {
                Some(size) => write!(f, "CreatePartition({} on {}, {})", device, disk, format_size(*size)),
                None => write!(f, "CreatePartition({} on {}, rest)", device, disk),
            },
            Self::LuksFormat { device } => write!(f, "LuksFormat({})", device),
            Self::LuksOpen { device, name } => write!(f, "LuksOpen({} as {})", device, name),
            Self::Format { device, filesystem } => write!(f, "Format({}, fs={})", device, filesystem),
            Self::Mount { device, mount_point } => write!(f, "Mount({} -> {})", device, mount_point),
        }
    }
}

/// What happens to a device listed on the review screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceAction {
    /// New partition, created and formatted
    Create,
    /// Existing device, reformatted
    Format,
    /// Existing device, used as-is
    Keep,
}

impl fmt::Display for DeviceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Format => write!(f, "format"),
            Self::Keep => write!(f, "keep"),
        }
    }
}

/// One row of the review screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewRow {
    pub device: String,
    pub mount_point: Option<String>,
    pub format_type: Option<Filesystem>,
    pub action: DeviceAction,
    pub encrypted: bool,
}

/// A complete storage plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoragePlan {
    pub scheme: Scheme,
    pub kind: PartitioningKind,
    pub initialization: InitializationMode,
    /// Disks the plan touches
    pub disks: Vec<String>,
    pub encrypted: bool,
    /// Ordered sequence of storage operations
    pub ops: Vec<StorageOp>,
    /// Review rows, in device order
    pub rows: Vec<ReviewRow>,
}

impl StoragePlan {
    /// Returns true if this plan destroys existing data.
    pub fn is_destructive(&self) -> bool {
        self.ops.iter().any(|op| {
            matches!(
                op,
                StorageOp::ClearDisk { .. } | StorageOp::LuksFormat { .. } | StorageOp::Format { .. }
            )
        })
    }

    /// Returns a summary of the plan for logging/display.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Storage Plan: {} ({})", self.scheme, self.kind),
            format!("  Disks: {}", self.disks.join(", ")),
            format!("  Initialization: {}", self.initialization),
            format!("  Encrypted: {}", self.encrypted),
            format!("  Operations ({}):", self.ops.len()),
        ];
        for (i, op) in self.ops.iter().enumerate() {
            lines.push(format!("    {}. {}", i + 1, op));
        }
        lines.push(format!("  Devices ({}):", self.rows.len()));
        for row in &self.rows {
            lines.push(format!(
                "    {} {} {} [{}]",
                row.device,
                row.mount_point.as_deref().unwrap_or("-"),
                row.format_type.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string()),
                row.action
            ));
        }
        lines.join("\n")
    }
}

// ============================================================================
// Automatic Layout
// ============================================================================

/// Inputs of an automatic layout.
#[derive(Debug, Clone)]
pub struct AutoLayout<'a> {
    pub scheme: Scheme,
    /// Disk receiving the new partitions
    pub target: &'a Disk,
    /// All selected disks (cleared as a whole by erase-all)
    pub selected: Vec<&'a Disk>,
    pub boot: BootRequirements,
    pub root_filesystem: Filesystem,
    pub encrypted: bool,
}

/// Lay out boot and root partitions on the target disk.
///
/// Erase-all numbers partitions from 1 after clearing every selected disk;
/// use-free-space continues after the target's existing partitions.
pub fn plan_automatic(layout: &AutoLayout<'_>) -> Result<StoragePlan> {
    if layout.scheme == Scheme::MountPointMapping {
        return Err(StorageError::partitioning(
            "Mount point mapping does not use the automatic layout",
        ));
    }

    let erase = layout.scheme == Scheme::EraseAll;
    let disk = &layout.target.name;
    let mut ops = Vec::new();
    let mut rows = Vec::new();

    if erase {
        for selected in &layout.selected {
            ops.push(StorageOp::ClearDisk {
                disk: selected.name.clone(),
            });
        }
    }

    let mut next_index = if erase {
        1
    } else {
        layout
            .target
            .partitions
            .iter()
            .map(|p| p.index)
            .max()
            .unwrap_or(0)
            + 1
    };
    let mut allocate = |ops: &mut Vec<StorageOp>, size: Option<u64>| {
        let device = partition_name(disk, next_index);
        next_index += 1;
        ops.push(StorageOp::CreatePartition {
            disk: disk.clone(),
            device: device.clone(),
            size,
        });
        device
    };

    let reused = if erase {
        None
    } else {
        existing_firmware_partition(layout.target, &layout.boot)
    };

    let firmware_part = match (reused, layout.boot.firmware.is_uefi()) {
        (Some(part), true) => {
            tracing::debug!("Reusing ESP {}", part.name);
            (part.name.clone(), Some(EFI_MOUNT_POINT), Filesystem::Vfat, DeviceAction::Keep)
        }
        (Some(part), false) => {
            tracing::debug!("Reusing biosboot partition {}", part.name);
            (part.name.clone(), None, Filesystem::BiosBoot, DeviceAction::Keep)
        }
        (None, true) => {
            let device = allocate(&mut ops, Some(EFI_SIZE));
            ops.push(StorageOp::Format {
                device: device.clone(),
                filesystem: Filesystem::Vfat,
            });
            (device, Some(EFI_MOUNT_POINT), Filesystem::Vfat, DeviceAction::Create)
        }
        (None, false) => {
            let device = allocate(&mut ops, Some(BIOSBOOT_SIZE));
            (device, None, Filesystem::BiosBoot, DeviceAction::Create)
        }
    };

    let boot_part = allocate(&mut ops, Some(BOOT_SIZE));
    ops.push(StorageOp::Format {
        device: boot_part.clone(),
        filesystem: Filesystem::Ext4,
    });

    let root_part = allocate(&mut ops, None);
    let root_device = if layout.encrypted {
        let name = luks_mapping_name(&root_part);
        ops.push(StorageOp::LuksFormat {
            device: root_part.clone(),
        });
        ops.push(StorageOp::LuksOpen {
            device: root_part.clone(),
            name: name.clone(),
        });
        name
    } else {
        root_part.clone()
    };
    ops.push(StorageOp::Format {
        device: root_device.clone(),
        filesystem: layout.root_filesystem,
    });

    // Mount order: parents before children
    ops.push(StorageOp::Mount {
        device: root_device,
        mount_point: ROOT_MOUNT_POINT.to_string(),
    });
    ops.push(StorageOp::Mount {
        device: boot_part.clone(),
        mount_point: BOOT_MOUNT_POINT.to_string(),
    });
    let (firmware_device, firmware_mount, firmware_fs, firmware_action) = firmware_part;
    if let Some(mount_point) = firmware_mount {
        ops.push(StorageOp::Mount {
            device: firmware_device.clone(),
            mount_point: mount_point.to_string(),
        });
    }

    rows.push(ReviewRow {
        device: firmware_device,
        mount_point: firmware_mount.map(str::to_string),
        format_type: Some(firmware_fs),
        action: firmware_action,
        encrypted: false,
    });
    rows.push(ReviewRow {
        device: boot_part,
        mount_point: Some(BOOT_MOUNT_POINT.to_string()),
        format_type: Some(Filesystem::Ext4),
        action: DeviceAction::Create,
        encrypted: false,
    });
    rows.push(ReviewRow {
        device: root_part,
        mount_point: Some(ROOT_MOUNT_POINT.to_string()),
        format_type: Some(layout.root_filesystem),
        action: DeviceAction::Create,
        encrypted: layout.encrypted,
    });

    let disks = if erase {
        layout.selected.iter().map(|d| d.name.clone()).collect()
    } else {
        vec![disk.clone()]
    };

    Ok(StoragePlan {
        scheme: layout.scheme,
        kind: PartitioningKind::Automatic,
        initialization: layout.scheme.initialization_mode(),
        disks,
        encrypted: layout.encrypted,
        ops,
        rows,
    })
}

/// Space an automatic layout needs besides the root partition.
pub fn boot_overhead(boot: &BootRequirements) -> u64 {
    let firmware = if boot.firmware.is_uefi() { EFI_SIZE } else { BIOSBOOT_SIZE };
    firmware + BOOT_SIZE
}

/// Space use-free-space needs on `disk` besides the root partition.
pub fn free_space_overhead(disk: &Disk, boot: &BootRequirements) -> u64 {
    match existing_firmware_partition(disk, boot) {
        Some(_) => BOOT_SIZE,
        None => boot_overhead(boot),
    }
}

/// ESP (UEFI) or biosboot partition (BIOS) already present on `disk`.
pub fn existing_firmware_partition<'a>(disk: &'a Disk, boot: &BootRequirements) -> Option<&'a Partition> {
    let wanted = if boot.firmware.is_uefi() {
        Filesystem::Vfat
    } else {
        Filesystem::BiosBoot
    };
    disk.partitions
        .iter()
        .find(|p| p.encryption == EncryptionStatus::Plain && p.filesystem == Some(wanted))
}

/// Device name an opened LUKS container is mapped to
pub fn luks_mapping_name(device: &str) -> String {
    format!("luks-{}", device)
}

// ============================================================================
// Tests
// ============================================================================
