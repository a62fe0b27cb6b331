//! Firmware detection and the boot layout it implies
//!
//! The firmware decides which boot-equivalent mount points a manual layout
//! must provide and which boot partitions an automatic layout creates.
//! Detection is a read-only sysfs check; configuration can pin the answer.

use std::fmt;
use std::path::Path;

use crate::types::FirmwareSetting;

/// Mount point of the EFI System Partition
pub const EFI_MOUNT_POINT: &str = "/boot/efi";
/// Mount point of the separate boot partition
pub const BOOT_MOUNT_POINT: &str = "/boot";
/// Root mount point
pub const ROOT_MOUNT_POINT: &str = "/";

/// Firmware mode of the machine being installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareMode {
    /// UEFI firmware: needs an EFI System Partition on `/boot/efi`
    Uefi,
    /// Legacy BIOS firmware: needs a BIOS boot partition on GPT disks
    Bios,
}

impl FirmwareMode {
    /// Returns true if the system booted in UEFI mode.
    pub fn is_uefi(self) -> bool {
        matches!(self, Self::Uefi)
    }

    /// Returns true if the system booted in legacy BIOS mode.
    pub fn is_bios(self) -> bool {
        matches!(self, Self::Bios)
    }

    /// Resolve a configured firmware setting, detecting when set to `auto`.
    pub fn resolve(setting: FirmwareSetting) -> Self {
        match setting {
            FirmwareSetting::Uefi => Self::Uefi,
            FirmwareSetting::Bios => Self::Bios,
            FirmwareSetting::Auto => detect_firmware_mode(),
        }
    }
}

impl fmt::Display for FirmwareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Bios => write!(f, "BIOS"),
        }
    }
}

/// Boot-related layout requirements for the target machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRequirements {
    pub firmware: FirmwareMode,
    /// Whether a separate `/boot` is mandatory
    pub boot_required: bool,
}

impl BootRequirements {
    pub fn new(firmware: FirmwareMode, boot_required: bool) -> Self {
        Self { firmware, boot_required }
    }

    /// Mount points a manual layout must assign, in display order.
    pub fn required_mount_points(&self) -> Vec<&'static str> {
        let mut points = Vec::with_capacity(3);
        if self.firmware.is_uefi() {
            points.push(EFI_MOUNT_POINT);
        }
        if self.boot_required {
            points.push(BOOT_MOUNT_POINT);
        }
        points.push(ROOT_MOUNT_POINT);
        points
    }
}

/// Detect firmware mode by checking for the EFI sysfs directory.
///
/// The Linux kernel exposes `/sys/firmware/efi` only when booted in UEFI mode.
pub fn detect_firmware_mode() -> FirmwareMode {
    detect_firmware_mode_at(Path::new("/sys/firmware/efi"))
}

fn detect_firmware_mode_at(efi_path: &Path) -> FirmwareMode {
    if efi_path.exists() {
        tracing::info!("UEFI firmware detected ({} exists)", efi_path.display());
        FirmwareMode::Uefi
    } else {
        tracing::info!("BIOS firmware detected ({} not found)", efi_path.display());
        FirmwareMode::Bios
    }
}
