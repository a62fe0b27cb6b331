//! Type-safe enumerations shared across the storage workflow
//!
//! Stringly-typed UI values (`"erase-all"`, `"AUTOMATIC"`, `"ext4"`) are parsed
//! into these enums at the edges so the engine can match exhaustively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Partitioning scheme offered on the installation method step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Scheme {
    /// Wipe the selected disks and lay out a fresh installation
    #[default]
    EraseAll,
    /// Keep existing partitions and install into unallocated space
    UseFreeSpace,
    /// Map mount points onto existing devices by hand
    MountPointMapping,
}

impl Scheme {
    /// Partitioning object kind created when this scheme reaches review
    pub fn kind(self) -> PartitioningKind {
        match self {
            Self::EraseAll | Self::UseFreeSpace => PartitioningKind::Automatic,
            Self::MountPointMapping => PartitioningKind::Manual,
        }
    }

    /// Disk initialization mode the scheme implies
    pub fn initialization_mode(self) -> InitializationMode {
        match self {
            Self::EraseAll => InitializationMode::ClearAll,
            Self::UseFreeSpace | Self::MountPointMapping => InitializationMode::ClearNone,
        }
    }

    /// Returns true if this scheme builds its layout automatically
    pub fn is_automatic(self) -> bool {
        self.kind() == PartitioningKind::Automatic
    }
}

/// Kind of a backend partitioning object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PartitioningKind {
    Automatic,
    Manual,
}

/// How existing disk contents are treated before partitioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InitializationMode {
    #[default]
    ClearNone,
    ClearAll,
}

/// Filesystem (format type) found on or planned for a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Filesystem {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Btrfs,
    /// FAT filesystem used for the EFI System Partition
    Vfat,
    Swap,
    /// BIOS boot partition for GRUB on GPT; never mounted
    #[strum(serialize = "biosboot")]
    #[serde(rename = "biosboot")]
    BiosBoot,
}

impl Filesystem {
    /// Returns true if a device with this format type can carry a mount point
    pub fn is_mountable(self) -> bool {
        !matches!(self, Self::Swap | Self::BiosBoot)
    }

    /// Returns true for filesystems acceptable on `/boot`
    pub fn is_boot_candidate(self) -> bool {
        matches!(self, Self::Ext2 | Self::Ext3 | Self::Ext4)
    }
}

/// Firmware selection from configuration; `Auto` is resolved by detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FirmwareSetting {
    #[default]
    Auto,
    Uefi,
    Bios,
}

/// What happens to skipped locked devices when the mapping step is re-entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UnlockSkipPolicy {
    /// Skipped devices are locked again and prompted for on every entry
    #[default]
    Reprompt,
    /// Skips persist for the rest of the session
    Remember,
}

/// Evaluation state of a single password rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RuleState {
    /// No input yet
    #[default]
    Indeterminate,
    Error,
    Success,
}

/// Password strength bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PasswordStrength {
    Weak,
    Medium,
    Strong,
}
