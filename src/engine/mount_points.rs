//! Mount point mapping for the manual scheme.
//!
//! The mapper owns a table of rows, each pairing a mount point with a device
//! from the selected disks. Rows reference partitions by name only; the
//! inventory stays the source of truth for what a device currently holds.
//!
//! # Initial Rows
//!
//! | Mount point | Present when            | Device                 | Reformat |
//! |-------------|-------------------------|------------------------|----------|
//! | `/boot/efi` | UEFI firmware           | unique ESP, if any     | no       |
//! | `/boot`     | required, or suggested  | unique boot candidate  | no       |
//! | `/`         | always                  | unassigned             | yes      |
//!
//! Forward navigation requires `issues()` to be empty.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::engine::storage::{luks_mapping_name, DeviceAction, ReviewRow, StorageOp, StoragePlan};
use crate::error::{Result, StorageError};
use crate::hardware::{BootRequirements, BOOT_MOUNT_POINT, EFI_MOUNT_POINT, ROOT_MOUNT_POINT};
use crate::inventory::{DiskInventory, EncryptionStatus, Partition};
use crate::selection::SelectionSet;
use crate::types::{Filesystem, InitializationMode, PartitioningKind, Scheme};
use crate::unlock::{LockState, UnlockCoordinator};

/// Pseudo-filesystem locations nothing may be mounted over
const RESERVED_MOUNT_POINTS: [&str; 4] = ["/dev", "/proc", "/sys", "/run"];

pub type RowId = u32;

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountPointRow {
    pub id: RowId,
    pub mount_point: Option<String>,
    pub device: Option<String>,
    /// Filesystem the device will carry after installation
    pub format_type: Option<Filesystem>,
    pub reformat: bool,
    /// Required rows keep their mount point and cannot be removed
    pub required: bool,
    #[serde(skip)]
    format_chosen: bool,
}

impl MountPointRow {
    fn new(id: RowId, mount_point: Option<&str>, required: bool, reformat: bool) -> Self {
        Self {
            id,
            mount_point: mount_point.map(str::to_string),
            device: None,
            format_type: None,
            reformat,
            required,
            format_chosen: false,
        }
    }

    /// Recompute the format type from the device and the reformat flag.
    fn derive_format(&mut self, device_fs: Option<Filesystem>, default: Filesystem) {
        if !self.reformat {
            self.format_chosen = false;
            self.format_type = device_fs;
        } else if !self.format_chosen {
            self.format_type = device_fs.filter(|fs| fs.is_mountable()).or(Some(default));
        }
    }
}

/// Entry of a row's device dropdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DeviceChoice {
    Available {
        device: String,
        format_type: Option<Filesystem>,
        size: u64,
    },
    /// Encrypted device that must be unlocked before it can be used
    Locked { device: String },
}

impl DeviceChoice {
    pub fn device(&self) -> &str {
        match self {
            Self::Available { device, .. } | Self::Locked { device } => device,
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

/// A problem that keeps the mapping from being finalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "kebab-case")]
pub enum MappingIssue {
    MissingDevice { mount_point: String },
    MissingMountPoint { device: String },
    InvalidMountPoint { mount_point: String },
    DuplicateMountPoint { mount_point: String },
    LockedDevice { device: String },
    UnavailableDevice { device: String },
    NeedsFormat { device: String },
}

impl fmt::Display for MappingIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDevice { mount_point } => {
                write!(f, "Select a device for the required mount point {}.", mount_point)
            }
            Self::MissingMountPoint { device } => {
                write!(f, "Enter a mount point for {}.", device)
            }
            Self::InvalidMountPoint { mount_point } => {
                write!(f, "'{}' is not a valid mount point.", mount_point)
            }
            Self::DuplicateMountPoint { mount_point } => {
                write!(f, "Mount point {} is assigned more than once.", mount_point)
            }
            Self::LockedDevice { device } => {
                write!(f, "{} is locked. Unlock it to use it.", device)
            }
            Self::UnavailableDevice { device } => {
                write!(f, "{} is not on a selected disk.", device)
            }
            Self::NeedsFormat { device } => {
                write!(f, "{} has no filesystem and must be reformatted.", device)
            }
        }
    }
}

/// Returns true if `path` is usable as a mount point
pub fn is_valid_mount_point(path: &str) -> bool {
    if !path.starts_with('/') || path.chars().any(char::is_whitespace) {
        return false;
    }
    if path
        .split('/')
        .skip(1)
        .any(|c| c == "." || c == ".." || (c.is_empty() && path != "/"))
    {
        return false;
    }
    !RESERVED_MOUNT_POINTS
        .iter()
        .any(|r| path == *r || path.starts_with(&format!("{}/", r)))
}

#[derive(Debug, Clone)]
pub struct MountPointMapper {
    rows: Vec<MountPointRow>,
    next_id: RowId,
    default_filesystem: Filesystem,
    populated: bool,
}

impl MountPointMapper {
    pub fn new(default_filesystem: Filesystem) -> Self {
        Self {
            rows: Vec::new(),
            next_id: 1,
            default_filesystem,
            populated: false,
        }
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn rows(&self) -> &[MountPointRow] {
        &self.rows
    }

    pub fn row(&self, id: RowId) -> Option<&MountPointRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    /// Row holding a mount point
    pub fn row_for(&self, mount_point: &str) -> Option<&MountPointRow> {
        self.rows
            .iter()
            .find(|r| r.mount_point.as_deref() == Some(mount_point))
    }

    /// Build the initial table the first time the mapping step is entered.
    ///
    /// Later calls keep the existing rows and only refresh derived format types.
    pub fn populate(
        &mut self,
        inventory: &DiskInventory,
        selection: &SelectionSet,
        boot: &BootRequirements,
    ) {
        if self.populated {
            self.sync(inventory);
            return;
        }

        let candidates: Vec<&Partition> = selection
            .disks(inventory)
            .into_iter()
            .flat_map(|d| d.partitions.iter())
            .filter(|p| !p.is_locked())
            .collect();

        if boot.firmware.is_uefi() {
            let suggestion = suggest(&candidates, "efi", |fs| fs == Filesystem::Vfat);
            self.push_suggested(EFI_MOUNT_POINT, true, suggestion);
        }

        let boot_suggestion = suggest(&candidates, "boot", Filesystem::is_boot_candidate);
        if boot.boot_required || boot_suggestion.is_some() {
            self.push_suggested(BOOT_MOUNT_POINT, boot.boot_required, boot_suggestion);
        }

        let id = self.allocate_id();
        self.rows
            .push(MountPointRow::new(id, Some(ROOT_MOUNT_POINT), true, true));

        self.populated = true;
        tracing::info!(
            "Mount point mapping initialised with {} row(s) for {} firmware",
            self.rows.len(),
            boot.firmware
        );
    }

    fn push_suggested(&mut self, mount_point: &str, required: bool, device: Option<&Partition>) {
        let id = self.allocate_id();
        let mut row = MountPointRow::new(id, Some(mount_point), required, false);
        if let Some(part) = device {
            tracing::info!("Suggesting {} for {}", part.name, mount_point);
            row.device = Some(part.name.clone());
            row.format_type = part.filesystem;
        }
        self.rows.push(row);
    }

    fn allocate_id(&mut self) -> RowId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn row_mut(&mut self, id: RowId) -> Result<&mut MountPointRow> {
        self.rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StorageError::validation(format!("Unknown mount point row {}", id)))
    }

    /// Append an empty row.
    pub fn add_row(&mut self) -> RowId {
        let id = self.allocate_id();
        self.rows.push(MountPointRow::new(id, None, false, false));
        id
    }

    pub fn remove_row(&mut self, id: RowId) -> Result<()> {
        let row = self.row_mut(id)?;
        if row.required {
            return Err(StorageError::validation(format!(
                "Mount point {} is required and cannot be removed",
                row.mount_point.as_deref().unwrap_or_default()
            )));
        }
        self.rows.retain(|r| r.id != id);
        Ok(())
    }

    /// Set the mount point of an optional row. Empty input clears it.
    pub fn set_mount_point(&mut self, id: RowId, path: &str) -> Result<()> {
        let row = self.row_mut(id)?;
        if row.required {
            return Err(StorageError::validation(format!(
                "Mount point {} is required and cannot be changed",
                row.mount_point.as_deref().unwrap_or_default()
            )));
        }

        let path = path.trim();
        row.mount_point = match path {
            "" => None,
            "/" => Some(path.to_string()),
            _ => Some(path.trim_end_matches('/').to_string()),
        };
        Ok(())
    }

    /// Assign a device to a row, or clear it with `None`.
    ///
    /// Locked devices may be assigned as placeholders; they are reported by
    /// `issues()` until unlocked.
    pub fn assign_device(
        &mut self,
        id: RowId,
        device: Option<&str>,
        inventory: &DiskInventory,
        selection: &SelectionSet,
    ) -> Result<()> {
        let Some(name) = device else {
            let default = self.default_filesystem;
            let row = self.row_mut(id)?;
            row.device = None;
            row.derive_format(None, default);
            return Ok(());
        };

        let part = inventory
            .partition(name)
            .ok_or_else(|| StorageError::inventory(format!("Unknown device '{}'", name)))?;
        if !selection.covers(part) {
            return Err(StorageError::validation(format!(
                "{} is not on a selected disk",
                name
            )));
        }
        if !part.is_mountable() {
            return Err(StorageError::validation(format!(
                "{} ({}) cannot carry a mount point",
                name,
                part.format_label()
            )));
        }
        if let Some(other) = self
            .rows
            .iter()
            .find(|r| r.id != id && r.device.as_deref() == Some(name))
        {
            return Err(StorageError::validation(format!(
                "{} is already assigned to {}",
                name,
                other.mount_point.as_deref().unwrap_or("another row")
            )));
        }

        let default = self.default_filesystem;
        let filesystem = part.filesystem;
        let row = self.row_mut(id)?;
        row.device = Some(name.to_string());
        row.derive_format(filesystem, default);
        tracing::debug!(
            "Row {} ({}) -> {}",
            id,
            row.mount_point.as_deref().unwrap_or("-"),
            name
        );
        Ok(())
    }

    pub fn set_reformat(&mut self, id: RowId, reformat: bool, inventory: &DiskInventory) -> Result<()> {
        let default = self.default_filesystem;
        let row = self.row_mut(id)?;
        let device_fs = row
            .device
            .as_deref()
            .and_then(|d| inventory.partition(d))
            .and_then(|p| p.filesystem);
        row.reformat = reformat;
        row.derive_format(device_fs, default);
        Ok(())
    }

    /// Choose the filesystem a reformatted row gets.
    pub fn set_format_type(&mut self, id: RowId, filesystem: Filesystem) -> Result<()> {
        let row = self.row_mut(id)?;
        if !row.reformat {
            return Err(StorageError::validation(
                "The format type can only be changed when reformatting",
            ));
        }
        if !filesystem.is_mountable() {
            return Err(StorageError::validation(format!(
                "{} cannot be mounted",
                filesystem
            )));
        }
        row.format_type = Some(filesystem);
        row.format_chosen = true;
        Ok(())
    }

    /// Refresh derived format types, e.g. after a device was unlocked.
    pub fn sync(&mut self, inventory: &DiskInventory) {
        let default = self.default_filesystem;
        for row in &mut self.rows {
            let device_fs = row
                .device
                .as_deref()
                .and_then(|d| inventory.partition(d))
                .and_then(|p| p.filesystem);
            row.derive_format(device_fs, default);
        }
    }

    /// Drop all rows; the next `populate` starts over.
    pub fn clear(&mut self) {
        if self.populated {
            tracing::debug!("Mount point mapping cleared");
        }
        self.rows.clear();
        self.populated = false;
    }

    /// Devices offered in a row's dropdown.
    ///
    /// Excludes devices on other rows, devices outside the selection and
    /// skipped locked devices. Locked devices show up as placeholders.
    pub fn available_devices(
        &self,
        id: RowId,
        inventory: &DiskInventory,
        selection: &SelectionSet,
        unlock: &UnlockCoordinator,
    ) -> Result<Vec<DeviceChoice>> {
        if self.row(id).is_none() {
            return Err(StorageError::validation(format!("Unknown mount point row {}", id)));
        }

        let taken: HashSet<&str> = self
            .rows
            .iter()
            .filter(|r| r.id != id)
            .filter_map(|r| r.device.as_deref())
            .collect();

        let mut choices = Vec::new();
        for part in selection
            .disks(inventory)
            .into_iter()
            .flat_map(|d| d.partitions.iter())
        {
            if taken.contains(part.name.as_str()) || !part.is_mountable() {
                continue;
            }
            match unlock.state(&part.name) {
                Some(LockState::Skipped) => continue,
                _ if part.is_locked() => choices.push(DeviceChoice::Locked {
                    device: part.name.clone(),
                }),
                _ => choices.push(DeviceChoice::Available {
                    device: part.name.clone(),
                    format_type: part.filesystem,
                    size: part.size,
                }),
            }
        }
        Ok(choices)
    }

    /// Everything that keeps the mapping from being finalized.
    pub fn issues(&self, inventory: &DiskInventory, selection: &SelectionSet) -> Vec<MappingIssue> {
        let mut issues = Vec::new();
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();

        for row in &self.rows {
            if let Some(mp) = row.mount_point.as_deref() {
                if !is_valid_mount_point(mp) {
                    issues.push(MappingIssue::InvalidMountPoint {
                        mount_point: mp.to_string(),
                    });
                }
                if row.device.is_some() || row.required {
                    *seen.entry(mp).or_default() += 1;
                }
            }

            let Some(device) = row.device.as_deref() else {
                if row.required {
                    issues.push(MappingIssue::MissingDevice {
                        mount_point: row.mount_point.clone().unwrap_or_default(),
                    });
                }
                continue;
            };

            if row.mount_point.is_none() {
                issues.push(MappingIssue::MissingMountPoint {
                    device: device.to_string(),
                });
            }

            match inventory.partition(device) {
                Some(part) if selection.covers(part) => {
                    if part.is_locked() {
                        issues.push(MappingIssue::LockedDevice {
                            device: device.to_string(),
                        });
                    } else if !row.reformat && part.filesystem.is_none() {
                        issues.push(MappingIssue::NeedsFormat {
                            device: device.to_string(),
                        });
                    }
                }
                _ => issues.push(MappingIssue::UnavailableDevice {
                    device: device.to_string(),
                }),
            }
        }

        for (mp, count) in seen {
            if count > 1 {
                issues.push(MappingIssue::DuplicateMountPoint {
                    mount_point: mp.to_string(),
                });
            }
        }
        issues
    }

    /// Review rows: assigned devices plus BIOS boot partitions, in disk order.
    pub fn review_rows(&self, inventory: &DiskInventory, selection: &SelectionSet) -> Vec<ReviewRow> {
        let assigned: BTreeMap<&str, &MountPointRow> = self
            .rows
            .iter()
            .filter(|r| r.mount_point.is_some())
            .filter_map(|r| r.device.as_deref().map(|d| (d, r)))
            .collect();

        let mut rows = Vec::new();
        for part in selection
            .disks(inventory)
            .into_iter()
            .flat_map(|d| d.partitions.iter())
        {
            let encrypted = part.encryption != EncryptionStatus::Plain;
            if let Some(row) = assigned.get(part.name.as_str()) {
                rows.push(ReviewRow {
                    device: part.name.clone(),
                    mount_point: row.mount_point.clone(),
                    format_type: row.format_type,
                    action: if row.reformat {
                        DeviceAction::Format
                    } else {
                        DeviceAction::Keep
                    },
                    encrypted,
                });
            } else if part.filesystem == Some(Filesystem::BiosBoot) {
                rows.push(ReviewRow {
                    device: part.name.clone(),
                    mount_point: None,
                    format_type: Some(Filesystem::BiosBoot),
                    action: DeviceAction::Keep,
                    encrypted,
                });
            }
        }
        rows
    }

    /// Plan for the manual scheme. Fails while any issue remains.
    pub fn build_plan(&self, inventory: &DiskInventory, selection: &SelectionSet) -> Result<StoragePlan> {
        if let Some(issue) = self.issues(inventory, selection).first() {
            return Err(StorageError::validation(issue.to_string()));
        }

        let mut assigned: Vec<(&str, &MountPointRow)> = self
            .rows
            .iter()
            .filter_map(|r| Some((r.mount_point.as_deref()?, r)))
            .filter(|(_, r)| r.device.is_some())
            .collect();
        // Parents are mounted before their children
        assigned.sort_by_key(|(mp, _)| (mount_depth(mp), mp.to_string()));

        // Unlocked containers are formatted and mounted through their mapping
        let target = |device: &str| match inventory.partition(device).map(|p| p.encryption) {
            Some(EncryptionStatus::LuksUnlocked) => luks_mapping_name(device),
            _ => device.to_string(),
        };

        let mut ops = Vec::new();
        for (_, row) in assigned.iter().filter(|(_, r)| r.reformat) {
            if let (Some(device), Some(filesystem)) = (&row.device, row.format_type) {
                ops.push(StorageOp::Format {
                    device: target(device),
                    filesystem,
                });
            }
        }
        for (mp, row) in &assigned {
            if let Some(device) = &row.device {
                ops.push(StorageOp::Mount {
                    device: target(device),
                    mount_point: mp.to_string(),
                });
            }
        }

        Ok(StoragePlan {
            scheme: Scheme::MountPointMapping,
            kind: PartitioningKind::Manual,
            initialization: InitializationMode::ClearNone,
            disks: selection.names().map(str::to_string).collect(),
            encrypted: false,
            ops,
            rows: self.review_rows(inventory, selection),
        })
    }
}

fn mount_depth(mount_point: &str) -> usize {
    mount_point.split('/').filter(|c| !c.is_empty()).count()
}

/// Unique partition labelled `label`, else the unique one whose filesystem matches.
fn suggest<'a>(
    candidates: &[&'a Partition],
    label: &str,
    matches: impl Fn(Filesystem) -> bool,
) -> Option<&'a Partition> {
    let labelled: Vec<&Partition> = candidates
        .iter()
        .copied()
        .filter(|p| p.label.as_deref().is_some_and(|l| l.eq_ignore_ascii_case(label)))
        .collect();
    if let [only] = labelled.as_slice() {
        return Some(*only);
    }

    let by_fs: Vec<&Partition> = candidates
        .iter()
        .copied()
        .filter(|p| p.filesystem.is_some_and(&matches))
        .collect();
    match by_fs.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::FirmwareMode;
    use crate::inventory::fixture::{FixtureDisk, FixturePartition, FixtureSource};
    use crate::types::UnlockSkipPolicy;
    use std::sync::Arc;

    struct Fixture {
        source: Arc<FixtureSource>,
        inventory: DiskInventory,
        selection: SelectionSet,
        mapper: MountPointMapper,
    }

    fn fixture(disks: Vec<FixtureDisk>) -> Fixture {
        let source = Arc::new(FixtureSource::new(disks));
        let mut inventory = DiskInventory::new(source.clone());
        inventory.scan();
        let mut selection = SelectionSet::new();
        selection.select_all(&inventory);
        Fixture {
            source,
            inventory,
            selection,
            mapper: MountPointMapper::new(Filesystem::Xfs),
        }
    }

    fn bios_disk() -> FixtureDisk {
        FixtureDisk::new("vda", 16_106_127_360)
            .with_partition(FixturePartition::new(1_048_576).filesystem(Filesystem::BiosBoot))
            .with_partition(FixturePartition::new(1_073_741_824).filesystem(Filesystem::Ext4))
            .with_partition(FixturePartition::new(8_000_000_000).filesystem(Filesystem::Xfs))
            .with_partition(FixturePartition::new(5_000_000_000).filesystem(Filesystem::Btrfs))
    }

    fn bios() -> BootRequirements {
        BootRequirements::new(FirmwareMode::Bios, false)
    }

    #[test]
    fn test_mount_point_validation() {
        assert!(is_valid_mount_point("/"));
        assert!(is_valid_mount_point("/home"));
        assert!(is_valid_mount_point("/var/lib"));
        assert!(!is_valid_mount_point("home"));
        assert!(!is_valid_mount_point("/my home"));
        assert!(!is_valid_mount_point("/var/../etc"));
        assert!(!is_valid_mount_point("/var//lib"));
        assert!(!is_valid_mount_point("/proc"));
        assert!(!is_valid_mount_point("/dev/shm"));
        assert!(is_valid_mount_point("/devices"));
    }

    #[test]
    fn test_initial_rows_bios() {
        let mut fx = fixture(vec![bios_disk()]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());

        let rows = fx.mapper.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].mount_point.as_deref(), Some("/boot"));
        assert_eq!(rows[0].device.as_deref(), Some("vda2"));
        assert!(!rows[0].reformat);
        assert!(!rows[0].required);

        assert_eq!(rows[1].mount_point.as_deref(), Some("/"));
        assert_eq!(rows[1].device, None);
        assert!(rows[1].reformat);
        assert!(rows[1].required);

        assert_eq!(
            fx.mapper.issues(&fx.inventory, &fx.selection),
            vec![MappingIssue::MissingDevice {
                mount_point: "/".to_string()
            }]
        );
    }

    #[test]
    fn test_ambiguous_boot_not_suggested() {
        let disk = FixtureDisk::new("vda", 20_000_000_000)
            .with_partition(FixturePartition::new(1_000_000_000).filesystem(Filesystem::Ext4))
            .with_partition(FixturePartition::new(1_000_000_000).filesystem(Filesystem::Ext3));
        let mut fx = fixture(vec![disk]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        assert!(fx.mapper.row_for("/boot").is_none());

        let mut fx = fixture(vec![FixtureDisk::new("vda", 20_000_000_000)
            .with_partition(FixturePartition::new(1_000_000_000).filesystem(Filesystem::Ext4))
            .with_partition(
                FixturePartition::new(1_000_000_000)
                    .filesystem(Filesystem::Ext4)
                    .label("BOOT"),
            )]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let boot = fx.mapper.row_for("/boot").expect("boot row");
        assert_eq!(boot.device.as_deref(), Some("vda2"));
    }

    #[test]
    fn test_uefi_requires_esp() {
        let disk = FixtureDisk::new("vda", 20_000_000_000)
            .with_partition(FixturePartition::new(600_000_000).filesystem(Filesystem::Vfat))
            .with_partition(FixturePartition::new(10_000_000_000).filesystem(Filesystem::Xfs));
        let mut fx = fixture(vec![disk]);
        fx.mapper.populate(
            &fx.inventory,
            &fx.selection,
            &BootRequirements::new(FirmwareMode::Uefi, true),
        );

        let efi = fx.mapper.row_for("/boot/efi").expect("efi row");
        assert!(efi.required);
        assert_eq!(efi.device.as_deref(), Some("vda1"));
        assert_eq!(efi.format_type, Some(Filesystem::Vfat));

        let boot = fx.mapper.row_for("/boot").expect("boot row");
        assert!(boot.required);
        assert_eq!(boot.device, None);
        assert_eq!(fx.mapper.issues(&fx.inventory, &fx.selection).len(), 2);
    }

    #[test]
    fn test_assign_derives_format_type() {
        let mut fx = fixture(vec![bios_disk()]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let root = fx.mapper.row_for("/").expect("root").id;

        fx.mapper
            .assign_device(root, Some("vda3"), &fx.inventory, &fx.selection)
            .expect("assign");
        assert_eq!(fx.mapper.row(root).expect("root").format_type, Some(Filesystem::Xfs));
        assert!(fx.mapper.issues(&fx.inventory, &fx.selection).is_empty());

        fx.mapper.set_format_type(root, Filesystem::Ext4).expect("reformatting");
        fx.mapper
            .assign_device(root, Some("vda4"), &fx.inventory, &fx.selection)
            .expect("reassign");
        // An explicit choice survives a device change
        assert_eq!(fx.mapper.row(root).expect("root").format_type, Some(Filesystem::Ext4));

        fx.mapper.set_reformat(root, false, &fx.inventory).expect("reformat");
        assert_eq!(fx.mapper.row(root).expect("root").format_type, Some(Filesystem::Btrfs));
        assert!(fx.mapper.set_format_type(root, Filesystem::Xfs).is_err());
    }

    #[test]
    fn test_assign_rejections() {
        let mut fx = fixture(vec![bios_disk()]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let root = fx.mapper.row_for("/").expect("root").id;

        // Already on /boot
        assert!(fx
            .mapper
            .assign_device(root, Some("vda2"), &fx.inventory, &fx.selection)
            .is_err());
        // BIOS boot cannot be mounted
        assert!(fx
            .mapper
            .assign_device(root, Some("vda1"), &fx.inventory, &fx.selection)
            .is_err());
        assert!(matches!(
            fx.mapper
                .assign_device(root, Some("vdz1"), &fx.inventory, &fx.selection),
            Err(StorageError::Inventory(_))
        ));

        fx.selection.clear();
        assert!(fx
            .mapper
            .assign_device(root, Some("vda3"), &fx.inventory, &fx.selection)
            .is_err());
    }

    #[test]
    fn test_rows_add_remove_and_mount_points() {
        let mut fx = fixture(vec![bios_disk()]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let root = fx.mapper.row_for("/").expect("root").id;

        assert!(fx.mapper.remove_row(root).is_err());
        assert!(fx.mapper.set_mount_point(root, "/srv").is_err());

        let home = fx.mapper.add_row();
        fx.mapper.set_mount_point(home, "/home/").expect("mount point");
        assert_eq!(fx.mapper.row(home).expect("home").mount_point.as_deref(), Some("/home"));

        fx.mapper.set_mount_point(home, "").expect("clear");
        fx.mapper
            .assign_device(home, Some("vda4"), &fx.inventory, &fx.selection)
            .expect("assign");
        assert!(fx
            .mapper
            .issues(&fx.inventory, &fx.selection)
            .contains(&MappingIssue::MissingMountPoint {
                device: "vda4".to_string()
            }));

        fx.mapper.remove_row(home).expect("remove");
        assert!(fx.mapper.row(home).is_none());
    }

    #[test]
    fn test_duplicate_and_invalid_mount_points() {
        let mut fx = fixture(vec![bios_disk()]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let root = fx.mapper.row_for("/").expect("root").id;
        fx.mapper
            .assign_device(root, Some("vda3"), &fx.inventory, &fx.selection)
            .expect("assign");

        let extra = fx.mapper.add_row();
        fx.mapper.set_mount_point(extra, "/boot").expect("mount point");
        fx.mapper
            .assign_device(extra, Some("vda4"), &fx.inventory, &fx.selection)
            .expect("assign");
        assert_eq!(
            fx.mapper.issues(&fx.inventory, &fx.selection),
            vec![MappingIssue::DuplicateMountPoint {
                mount_point: "/boot".to_string()
            }]
        );

        fx.mapper.set_mount_point(extra, "data").expect("mount point");
        assert_eq!(
            fx.mapper.issues(&fx.inventory, &fx.selection),
            vec![MappingIssue::InvalidMountPoint {
                mount_point: "data".to_string()
            }]
        );
    }

    #[test]
    fn test_unformatted_device_needs_reformat() {
        let disk = FixtureDisk::new("vda", 20_000_000_000)
            .with_partition(FixturePartition::new(10_000_000_000));
        let mut fx = fixture(vec![disk]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let root = fx.mapper.row_for("/").expect("root").id;
        fx.mapper
            .assign_device(root, Some("vda1"), &fx.inventory, &fx.selection)
            .expect("assign");
        assert_eq!(fx.mapper.row(root).expect("root").format_type, Some(Filesystem::Xfs));
        assert!(fx.mapper.issues(&fx.inventory, &fx.selection).is_empty());

        fx.mapper.set_reformat(root, false, &fx.inventory).expect("reformat");
        assert_eq!(
            fx.mapper.issues(&fx.inventory, &fx.selection),
            vec![MappingIssue::NeedsFormat {
                device: "vda1".to_string()
            }]
        );
    }

    #[test]
    fn test_available_devices_excludes_taken_and_unselected() {
        let mut fx = fixture(vec![
            bios_disk(),
            FixtureDisk::new("vdb", 10_000_000_000)
                .with_partition(FixturePartition::new(5_000_000_000).filesystem(Filesystem::Ext4)),
        ]);
        fx.selection.select(&fx.inventory, "vdb", false).expect("unselect");
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let root = fx.mapper.row_for("/").expect("root").id;
        let unlock = UnlockCoordinator::new(fx.source.clone(), UnlockSkipPolicy::Reprompt);

        let names: Vec<String> = fx
            .mapper
            .available_devices(root, &fx.inventory, &fx.selection, &unlock)
            .expect("choices")
            .iter()
            .map(|c| c.device().to_string())
            .collect();
        assert_eq!(names, vec!["vda3", "vda4"]);

        fx.selection.select(&fx.inventory, "vdb", true).expect("select");
        let names: Vec<String> = fx
            .mapper
            .available_devices(root, &fx.inventory, &fx.selection, &unlock)
            .expect("choices")
            .iter()
            .map(|c| c.device().to_string())
            .collect();
        assert_eq!(names, vec!["vda3", "vda4", "vdb1"]);
    }

    #[test]
    fn test_locked_placeholder_until_unlocked() {
        let disk = FixtureDisk::new("vda", 20_000_000_000).with_partition(
            FixturePartition::new(10_000_000_000).luks("einszweidrei", Some(Filesystem::Ext4)),
        );
        let mut fx = fixture(vec![disk]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let root = fx.mapper.row_for("/").expect("root").id;
        let mut unlock = UnlockCoordinator::new(fx.source.clone(), UnlockSkipPolicy::Reprompt);
        unlock.on_mapping_entry(&fx.inventory, &fx.selection);

        let choices = fx
            .mapper
            .available_devices(root, &fx.inventory, &fx.selection, &unlock)
            .expect("choices");
        assert_eq!(
            choices,
            vec![DeviceChoice::Locked {
                device: "vda1".to_string()
            }]
        );

        fx.mapper
            .assign_device(root, Some("vda1"), &fx.inventory, &fx.selection)
            .expect("placeholder");
        assert_eq!(
            fx.mapper.issues(&fx.inventory, &fx.selection),
            vec![MappingIssue::LockedDevice {
                device: "vda1".to_string()
            }]
        );

        unlock
            .attempt_unlock(&mut fx.inventory, "vda1", &"einszweidrei".into())
            .expect("unlock");
        fx.mapper.set_reformat(root, false, &fx.inventory).expect("keep");
        assert!(fx.mapper.issues(&fx.inventory, &fx.selection).is_empty());
        assert_eq!(fx.mapper.row(root).expect("root").format_type, Some(Filesystem::Ext4));

        let plan = fx.mapper.build_plan(&fx.inventory, &fx.selection).expect("plan");
        assert_eq!(
            plan.ops,
            vec![StorageOp::Mount {
                device: "luks-vda1".to_string(),
                mount_point: "/".to_string()
            }]
        );

        unlock.skip_all();
        let choices = fx
            .mapper
            .available_devices(root, &fx.inventory, &fx.selection, &unlock)
            .expect("choices");
        assert!(!choices.iter().any(DeviceChoice::is_locked));
    }

    #[test]
    fn test_review_rows_include_biosboot() {
        let mut fx = fixture(vec![bios_disk()]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let root = fx.mapper.row_for("/").expect("root").id;
        fx.mapper
            .assign_device(root, Some("vda3"), &fx.inventory, &fx.selection)
            .expect("assign");
        let home = fx.mapper.add_row();
        fx.mapper.set_mount_point(home, "/home").expect("mount point");
        fx.mapper
            .assign_device(home, Some("vda4"), &fx.inventory, &fx.selection)
            .expect("assign");

        let plan = fx.mapper.build_plan(&fx.inventory, &fx.selection).expect("plan");
        let devices: Vec<&str> = plan.rows.iter().map(|r| r.device.as_str()).collect();
        assert_eq!(devices, vec!["vda1", "vda2", "vda3", "vda4"]);
        assert_eq!(plan.rows[0].mount_point, None);
        assert_eq!(plan.rows[1].action, DeviceAction::Keep);
        assert_eq!(plan.rows[2].action, DeviceAction::Format);
        assert_eq!(plan.rows[3].format_type, Some(Filesystem::Btrfs));

        assert_eq!(
            plan.ops,
            vec![
                StorageOp::Format {
                    device: "vda3".to_string(),
                    filesystem: Filesystem::Xfs
                },
                StorageOp::Mount {
                    device: "vda3".to_string(),
                    mount_point: "/".to_string()
                },
                StorageOp::Mount {
                    device: "vda2".to_string(),
                    mount_point: "/boot".to_string()
                },
                StorageOp::Mount {
                    device: "vda4".to_string(),
                    mount_point: "/home".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_build_plan_fails_with_issues() {
        let mut fx = fixture(vec![bios_disk()]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        let err = fx
            .mapper
            .build_plan(&fx.inventory, &fx.selection)
            .expect_err("root unassigned");
        assert!(err.to_string().contains("required mount point /"));
    }

    #[test]
    fn test_clear_allows_repopulate() {
        let mut fx = fixture(vec![bios_disk()]);
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        fx.mapper.add_row();
        assert_eq!(fx.mapper.rows().len(), 3);

        // Re-entry keeps rows
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        assert_eq!(fx.mapper.rows().len(), 3);

        fx.mapper.clear();
        assert!(!fx.mapper.is_populated());
        fx.mapper.populate(&fx.inventory, &fx.selection, &bios());
        assert_eq!(fx.mapper.rows().len(), 2);
    }
}
