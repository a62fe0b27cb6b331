//! Locked-device unlock coordinator.
//!
//! Tracks the LUKS partitions on the selected disks that still need a
//! passphrase before the mount point mapping can use them.
//!
//! # Device States
//!
//! ```text
//! Locked ──(correct passphrase)──▶ Unlocked
//!   │
//!   └──(skip)──▶ Skipped ──(re-entry, reprompt policy)──▶ Locked
//! ```
//!
//! Skipped devices leave the unlock prompt but never become valid mapping
//! choices. Whether a skip survives re-entering the mapping step is decided by
//! `UnlockSkipPolicy`.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::encryption::Passphrase;
use crate::error::{Result, StorageError};
use crate::inventory::{DiskInventory, EncryptionStatus};
use crate::selection::SelectionSet;
use crate::types::{Filesystem, UnlockSkipPolicy};

/// Result of presenting a passphrase to the unlock backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Opened { filesystem: Option<Filesystem> },
    Rejected,
}

/// Backend able to open LUKS containers (cryptsetup on a real host).
pub trait DeviceUnlocker: Send + Sync {
    /// Present `passphrase` for `device`. A wrong passphrase is `Ok(Rejected)`;
    /// `Err` means the backend itself failed.
    fn unlock(&self, device: &str, passphrase: &Passphrase) -> anyhow::Result<UnlockOutcome>;
}

/// Errors surfaced inline in the unlock dialog
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnlockError {
    #[error("Passphrase did not match any locked device. Still locked: {}", remaining.join(", "))]
    WrongPassphrase { remaining: Vec<String> },

    #[error("Device '{0}' is not waiting to be unlocked")]
    NotLocked(String),

    #[error("Unlocking {device} failed: {reason}")]
    Backend { device: String, reason: String },
}

/// Per-device lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
    Skipped,
}

pub struct UnlockCoordinator {
    unlocker: Arc<dyn DeviceUnlocker>,
    policy: UnlockSkipPolicy,
    devices: BTreeMap<String, LockState>,
}

impl std::fmt::Debug for UnlockCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockCoordinator")
            .field("policy", &self.policy)
            .field("devices", &self.devices)
            .finish()
    }
}

impl UnlockCoordinator {
    pub fn new(unlocker: Arc<dyn DeviceUnlocker>, policy: UnlockSkipPolicy) -> Self {
        Self {
            unlocker,
            policy,
            devices: BTreeMap::new(),
        }
    }

    /// Synchronise tracked devices with the encrypted partitions on the selection.
    pub fn track(&mut self, inventory: &DiskInventory, selection: &SelectionSet) {
        let mut current = BTreeMap::new();
        for disk in selection.disks(inventory) {
            for part in &disk.partitions {
                let state = match part.encryption {
                    EncryptionStatus::Plain => continue,
                    EncryptionStatus::LuksUnlocked => LockState::Unlocked,
                    EncryptionStatus::LuksLocked => match self.devices.get(&part.name) {
                        Some(LockState::Skipped) => LockState::Skipped,
                        _ => LockState::Locked,
                    },
                };
                current.insert(part.name.clone(), state);
            }
        }
        self.devices = current;
    }

    /// Called whenever the mapping step is entered; applies the skip policy.
    pub fn on_mapping_entry(&mut self, inventory: &DiskInventory, selection: &SelectionSet) {
        self.track(inventory, selection);
        if self.policy == UnlockSkipPolicy::Reprompt {
            for state in self.devices.values_mut() {
                if *state == LockState::Skipped {
                    *state = LockState::Locked;
                }
            }
        }
        let pending = self.pending();
        if !pending.is_empty() {
            tracing::info!("Locked devices awaiting unlock: {}", pending.join(", "));
        }
    }

    pub fn state(&self, device: &str) -> Option<LockState> {
        self.devices.get(device).copied()
    }

    /// Devices still prompting for a passphrase
    pub fn pending(&self) -> Vec<String> {
        self.devices
            .iter()
            .filter(|(_, s)| **s == LockState::Locked)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns true while some device neither unlocked nor skipped
    pub fn blocks_finalization(&self) -> bool {
        self.devices.values().any(|s| *s == LockState::Locked)
    }

    /// Try to unlock one device.
    pub fn attempt_unlock(
        &mut self,
        inventory: &mut DiskInventory,
        device: &str,
        passphrase: &Passphrase,
    ) -> Result<()> {
        match self.devices.get(device) {
            Some(LockState::Locked) | Some(LockState::Skipped) => {}
            _ => return Err(UnlockError::NotLocked(device.to_string()).into()),
        }

        match self.present(device, passphrase)? {
            UnlockOutcome::Opened { filesystem } => {
                inventory.mark_unlocked(device, filesystem)?;
                self.devices.insert(device.to_string(), LockState::Unlocked);
                tracing::info!("Unlocked {}", device);
                Ok(())
            }
            UnlockOutcome::Rejected => {
                tracing::warn!("Wrong passphrase for {}", device);
                Err(UnlockError::WrongPassphrase {
                    remaining: self.pending(),
                }
                .into())
            }
        }
    }

    /// Try one passphrase against every pending device; returns the ones opened.
    pub fn attempt_unlock_all(
        &mut self,
        inventory: &mut DiskInventory,
        passphrase: &Passphrase,
    ) -> Result<Vec<String>> {
        let mut opened = Vec::new();
        for device in self.pending() {
            if let UnlockOutcome::Opened { filesystem } = self.present(&device, passphrase)? {
                inventory.mark_unlocked(&device, filesystem)?;
                self.devices.insert(device.clone(), LockState::Unlocked);
                opened.push(device);
            }
        }

        if opened.is_empty() {
            tracing::warn!("Passphrase matched none of the locked devices");
            return Err(UnlockError::WrongPassphrase {
                remaining: self.pending(),
            }
            .into());
        }
        tracing::info!("Unlocked {}", opened.join(", "));
        Ok(opened)
    }

    /// Skip every device still locked; returns the skipped names.
    pub fn skip_all(&mut self) -> Vec<String> {
        let skipped = self.pending();
        for name in &skipped {
            self.devices.insert(name.clone(), LockState::Skipped);
        }
        if !skipped.is_empty() {
            tracing::info!("Skipped unlocking {}", skipped.join(", "));
        }
        skipped
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    fn present(&self, device: &str, passphrase: &Passphrase) -> Result<UnlockOutcome> {
        self.unlocker.unlock(device, passphrase).map_err(|e| {
            StorageError::from(UnlockError::Backend {
                device: device.to_string(),
                reason: format!("{:#}", e),
            })
        })
    }
}
