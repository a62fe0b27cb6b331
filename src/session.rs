//! Storage configuration session.
//!
//! `StorageSession` is the single owner of the workflow state: inventory,
//! selection, scheme, mapping table, encryption settings, unlock state and a
//! handle to the shared partitioning manager. Every UI action maps onto one
//! method here.
//!
//! # Invariants
//!
//! - Changing the disk selection resets everything downstream of it:
//!   encryption settings, the mapping table, unlock state and the applied
//!   partitioning object. The scheme survives unless it stopped being viable.
//! - Entering review creates exactly one partitioning object and applies it
//!   in the same transition.
//! - `can_go_next()` never fails; it reports why forward navigation is
//!   disabled. Only `go_next()` on a disabled gate is an error.

use std::sync::Arc;

use crate::config_file::WorkflowConfig;
use crate::encryption::{EncryptionGate, HeuristicStrengthEstimator, Passphrase, StrengthEstimator};
use crate::engine::mount_points::{DeviceChoice, MappingIssue, MountPointMapper, RowId};
use crate::engine::partitioning::{PartitioningId, PartitioningManager, StorageBus};
use crate::engine::scheme::{PlanContext, SchemeRegistry, Viability};
use crate::engine::storage::{ReviewRow, StoragePlan};
use crate::error::{Result, StorageError};
use crate::hardware::BootRequirements;
use crate::inventory::{DeviceSource, DiskInventory, RescanReport};
use crate::selection::{SelectionSet, NO_DISKS_SELECTED};
use crate::types::{Filesystem, PartitioningKind, Scheme};
use crate::unlock::{DeviceUnlocker, LockState, UnlockCoordinator};
use crate::workflow_state::{NextGate, WorkflowContext, WorkflowStep, WorkflowTransitionError};

/// Reason shown when the inventory is empty
pub const NO_DISKS_DETECTED: &str = "No usable disks detected. Attach a disk and rescan.";

// Field-wise borrows so the registry can be mutated while the context is alive
macro_rules! plan_context {
    ($session:expr) => {
        PlanContext {
            inventory: &$session.inventory,
            selection: &$session.selection,
            config: &$session.config,
            boot: $session.boot,
            mapper: &$session.mapper,
            encrypted: $session.encryption.passphrase().is_some(),
        }
    };
}

#[derive(Debug)]
pub struct StorageSession {
    config: WorkflowConfig,
    boot: BootRequirements,
    inventory: DiskInventory,
    selection: SelectionSet,
    schemes: SchemeRegistry,
    mapper: MountPointMapper,
    encryption: EncryptionGate,
    unlock: UnlockCoordinator,
    partitioning: PartitioningManager,
    workflow: WorkflowContext,
}

impl StorageSession {
    /// Start a session and take the initial inventory snapshot.
    ///
    /// Firmware is resolved from the configuration (detected when `auto`).
    pub fn new(
        config: WorkflowConfig,
        source: Arc<dyn DeviceSource>,
        unlocker: Arc<dyn DeviceUnlocker>,
    ) -> Self {
        let mut inventory = DiskInventory::new(source);
        inventory.scan();

        Self {
            boot: config.boot_requirements(),
            inventory,
            selection: SelectionSet::new(),
            schemes: SchemeRegistry::new(config.default_scheme),
            mapper: MountPointMapper::new(config.default_filesystem),
            encryption: EncryptionGate::new(
                config.password_min_length,
                Arc::new(HeuristicStrengthEstimator),
            ),
            unlock: UnlockCoordinator::new(unlocker, config.unlock_skip_policy),
            partitioning: PartitioningManager::new(),
            workflow: WorkflowContext::new(),
            config,
        }
    }

    /// Share an existing partitioning manager (e.g. one exposed on the bus).
    pub fn with_partitioning(mut self, manager: PartitioningManager) -> Self {
        self.partitioning = manager;
        self
    }

    pub fn with_strength_estimator(mut self, estimator: Arc<dyn StrengthEstimator>) -> Self {
        self.encryption = EncryptionGate::new(self.config.password_min_length, estimator);
        self
    }

    /// Override the firmware-derived boot requirements.
    pub fn with_boot_requirements(mut self, boot: BootRequirements) -> Self {
        self.boot = boot;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn boot_requirements(&self) -> BootRequirements {
        self.boot
    }

    pub fn inventory(&self) -> &DiskInventory {
        &self.inventory
    }

    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    pub fn scheme(&self) -> Scheme {
        self.schemes.current()
    }

    pub fn mapper(&self) -> &MountPointMapper {
        &self.mapper
    }

    pub fn encryption(&self) -> &EncryptionGate {
        &self.encryption
    }

    pub fn unlock(&self) -> &UnlockCoordinator {
        &self.unlock
    }

    /// Handle to the shared partitioning manager
    pub fn partitioning(&self) -> PartitioningManager {
        self.partitioning.clone()
    }

    pub fn current_step(&self) -> WorkflowStep {
        self.workflow.current_step()
    }

    pub fn history(&self) -> &[(WorkflowStep, u64)] {
        self.workflow.history()
    }

    // ========================================================================
    // Installation method: disks and scheme
    // ========================================================================

    /// Re-enumerate devices. Selected disks that vanished are unselected.
    pub fn rescan(&mut self) -> Result<RescanReport> {
        self.workflow
            .require(WorkflowStep::InstallationMethod, "Rescanning disks")?;
        let report = self.inventory.rescan()?;
        let gone = self.selection.retain_visible(&self.inventory);
        if !gone.is_empty() {
            tracing::warn!("Selected disk(s) disappeared: {}", gone.join(", "));
            self.selection_changed();
        }
        Ok(report)
    }

    pub fn select_disk(&mut self, disk: &str, selected: bool) -> Result<()> {
        self.workflow
            .require(WorkflowStep::InstallationMethod, "Disk selection")?;
        if self.selection.select(&self.inventory, disk, selected)? {
            self.selection_changed();
        }
        Ok(())
    }

    pub fn select_all(&mut self) -> Result<()> {
        self.workflow
            .require(WorkflowStep::InstallationMethod, "Disk selection")?;
        if self.selection.select_all(&self.inventory) {
            self.selection_changed();
        }
        Ok(())
    }

    pub fn select_none(&mut self) -> Result<()> {
        self.workflow
            .require(WorkflowStep::InstallationMethod, "Disk selection")?;
        if self.selection.clear() {
            tracing::info!("All disks unselected");
            self.selection_changed();
        }
        Ok(())
    }

    fn selection_changed(&mut self) {
        tracing::info!("Disk selection changed, resetting partitioning state");
        self.encryption.reset();
        self.mapper.clear();
        self.unlock.clear();
        self.partitioning.reset_partitioning();
        let ctx = plan_context!(self);
        self.schemes.revalidate(&ctx);
    }

    /// Every scheme with its viability for the current selection
    pub fn available_schemes(&self) -> Vec<(Scheme, Viability)> {
        self.schemes.available(&plan_context!(self))
    }

    pub fn set_scheme(&mut self, scheme: Scheme) -> Result<()> {
        self.workflow
            .require(WorkflowStep::InstallationMethod, "Choosing a scheme")?;
        let ctx = plan_context!(self);
        self.schemes.set_scheme(scheme, &ctx)
    }

    // ========================================================================
    // Disk encryption
    // ========================================================================

    pub fn set_encryption_enabled(&mut self, enabled: bool) -> Result<()> {
        self.workflow
            .require(WorkflowStep::DiskEncryption, "Changing encryption")?;
        self.encryption.set_enabled(enabled);
        Ok(())
    }

    pub fn set_password(&mut self, password: impl Into<Passphrase>) -> Result<()> {
        self.workflow
            .require(WorkflowStep::DiskEncryption, "Entering a passphrase")?;
        self.encryption.set_password(password);
        Ok(())
    }

    pub fn set_password_confirm(&mut self, password: impl Into<Passphrase>) -> Result<()> {
        self.workflow
            .require(WorkflowStep::DiskEncryption, "Confirming a passphrase")?;
        self.encryption.set_password_confirm(password);
        Ok(())
    }

    // ========================================================================
    // Mount point mapping
    // ========================================================================

    fn require_mapping(&self, operation: &'static str) -> Result<()> {
        Ok(self
            .workflow
            .require(WorkflowStep::MountPointMapping, operation)?)
    }

    pub fn add_mount_point_row(&mut self) -> Result<RowId> {
        self.require_mapping("Adding a mount point")?;
        Ok(self.mapper.add_row())
    }

    pub fn remove_mount_point_row(&mut self, id: RowId) -> Result<()> {
        self.require_mapping("Removing a mount point")?;
        self.mapper.remove_row(id)
    }

    pub fn set_mount_point(&mut self, id: RowId, path: &str) -> Result<()> {
        self.require_mapping("Setting a mount point")?;
        self.mapper.set_mount_point(id, path)
    }

    /// Assign a device to a row. Skipped locked devices cannot be assigned.
    pub fn assign_device(&mut self, id: RowId, device: Option<&str>) -> Result<()> {
        self.require_mapping("Assigning a device")?;
        if let Some(name) = device {
            if self.unlock.state(name) == Some(LockState::Skipped) {
                return Err(StorageError::validation(format!(
                    "{} was skipped and stays locked",
                    name
                )));
            }
        }
        self.mapper
            .assign_device(id, device, &self.inventory, &self.selection)
    }

    pub fn set_reformat(&mut self, id: RowId, reformat: bool) -> Result<()> {
        self.require_mapping("Changing reformat")?;
        self.mapper.set_reformat(id, reformat, &self.inventory)
    }

    pub fn set_format_type(&mut self, id: RowId, filesystem: Filesystem) -> Result<()> {
        self.require_mapping("Changing the format type")?;
        self.mapper.set_format_type(id, filesystem)
    }

    pub fn available_devices(&self, id: RowId) -> Result<Vec<DeviceChoice>> {
        self.mapper
            .available_devices(id, &self.inventory, &self.selection, &self.unlock)
    }

    pub fn mapping_issues(&self) -> Vec<MappingIssue> {
        self.mapper.issues(&self.inventory, &self.selection)
    }

    // ========================================================================
    // Locked devices
    // ========================================================================

    pub fn unlock_device(&mut self, device: &str, passphrase: &Passphrase) -> Result<()> {
        self.require_mapping("Unlocking a device")?;
        self.unlock
            .attempt_unlock(&mut self.inventory, device, passphrase)?;
        self.mapper.sync(&self.inventory);
        Ok(())
    }

    /// Try one passphrase on every locked device; returns the ones opened.
    pub fn unlock_all(&mut self, passphrase: &Passphrase) -> Result<Vec<String>> {
        self.require_mapping("Unlocking devices")?;
        let opened = self
            .unlock
            .attempt_unlock_all(&mut self.inventory, passphrase)?;
        self.mapper.sync(&self.inventory);
        Ok(opened)
    }

    /// Skip every device still locked; returns the skipped names.
    pub fn skip_locked(&mut self) -> Result<Vec<String>> {
        self.require_mapping("Skipping locked devices")?;
        Ok(self.unlock.skip_all())
    }

    pub fn pending_unlock(&self) -> Vec<String> {
        self.unlock.pending()
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Whether the next button is enabled on the current step.
    pub fn can_go_next(&self) -> NextGate {
        match self.workflow.current_step() {
            WorkflowStep::InstallationMethod => {
                if self.inventory.is_empty() {
                    return NextGate::Disabled(NO_DISKS_DETECTED.to_string());
                }
                if self.selection.is_empty() {
                    return NextGate::Disabled(NO_DISKS_SELECTED.to_string());
                }
                match self.schemes.viability(&plan_context!(self)) {
                    Viability::Viable => NextGate::Enabled,
                    Viability::NotViable(reason) => NextGate::Disabled(reason),
                }
            }
            WorkflowStep::DiskEncryption => match self.encryption.blocking_reason() {
                Some(reason) => NextGate::Disabled(reason),
                None => NextGate::Enabled,
            },
            WorkflowStep::MountPointMapping => {
                if self.unlock.blocks_finalization() {
                    return NextGate::Disabled(format!(
                        "Unlock or skip the locked devices: {}",
                        self.unlock.pending().join(", ")
                    ));
                }
                match self.mapping_issues().first() {
                    Some(issue) => NextGate::Disabled(issue.to_string()),
                    None => NextGate::Enabled,
                }
            }
            WorkflowStep::Review => {
                NextGate::Disabled("Review is the last storage step.".to_string())
            }
        }
    }

    /// Move forward. Entering review creates and applies the partitioning.
    pub fn go_next(&mut self) -> Result<WorkflowStep> {
        let scheme = self.schemes.current();
        let next = self.workflow.peek_next(scheme)?;

        if let NextGate::Disabled(reason) = self.can_go_next() {
            tracing::debug!("Next blocked on {}: {}", self.current_step(), reason);
            return Err(WorkflowTransitionError::Blocked {
                step: self.current_step(),
                reason,
            }
            .into());
        }

        match next {
            WorkflowStep::MountPointMapping => {
                self.unlock.on_mapping_entry(&self.inventory, &self.selection);
                self.mapper
                    .populate(&self.inventory, &self.selection, &self.boot);
            }
            WorkflowStep::Review => {
                let plan = self.schemes.build_plan(&plan_context!(self))?;
                let id = self.partitioning.create_and_apply(plan);
                tracing::info!("Review uses partitioning {}", id);
            }
            WorkflowStep::InstallationMethod | WorkflowStep::DiskEncryption => {}
        }

        Ok(self.workflow.advance(scheme)?)
    }

    /// Move back. Settings of the steps left behind are kept.
    pub fn go_back(&mut self) -> Result<WorkflowStep> {
        Ok(self.workflow.retreat(self.schemes.current())?)
    }

    // ========================================================================
    // Review
    // ========================================================================

    /// Plan of the applied partitioning object
    pub fn applied_plan(&self) -> Option<StoragePlan> {
        self.partitioning.applied_plan()
    }

    /// Rows of the review screen; empty until a partitioning is applied.
    pub fn review_rows(&self) -> Vec<ReviewRow> {
        self.applied_plan().map(|p| p.rows).unwrap_or_default()
    }
}

impl StorageBus for StorageSession {
    fn get_usable_disks(&self) -> Vec<String> {
        self.inventory.usable_disks()
    }

    fn get_created_partitioning(&self) -> Vec<String> {
        self.partitioning
            .get_created_partitioning()
            .iter()
            .map(PartitioningId::to_string)
            .collect()
    }

    fn get_applied_partitioning(&self) -> Option<String> {
        self.partitioning
            .get_applied_partitioning()
            .map(|id| id.to_string())
    }

    fn create_partitioning(&self, kind: PartitioningKind) -> String {
        self.partitioning.create_partitioning(kind).to_string()
    }

    fn apply_partitioning(&self, path: &str) -> Result<()> {
        self.partitioning.apply_partitioning(path.parse()?)
    }

    fn reset_partitioning(&self) {
        self.partitioning.reset_partitioning();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::FirmwareMode;
    use crate::inventory::fixture::{FixtureDisk, FixturePartition, FixtureSource};
    use crate::types::FirmwareSetting;

    fn session(disks: Vec<FixtureDisk>) -> StorageSession {
        let source = Arc::new(FixtureSource::new(disks));
        let config = WorkflowConfig {
            firmware: FirmwareSetting::Bios,
            ..WorkflowConfig::default()
        };
        StorageSession::new(config, source.clone(), source)
    }

    fn empty_disk(name: &str) -> FixtureDisk {
        FixtureDisk::new(name, 16_106_127_360)
    }

    #[test]
    fn test_starts_on_installation_method() {
        let s = session(vec![empty_disk("vda")]);
        assert_eq!(s.current_step(), WorkflowStep::InstallationMethod);
        assert_eq!(s.scheme(), Scheme::EraseAll);
        assert_eq!(s.boot_requirements().firmware, FirmwareMode::Bios);
        assert_eq!(s.can_go_next(), NextGate::Disabled(NO_DISKS_SELECTED.to_string()));
    }

    #[test]
    fn test_no_disks_detected() {
        let s = session(Vec::new());
        assert_eq!(s.can_go_next(), NextGate::Disabled(NO_DISKS_DETECTED.to_string()));
    }

    #[test]
    fn test_blocked_next_is_transition_error() {
        let mut s = session(vec![empty_disk("vda")]);
        let err = s.go_next().expect_err("nothing selected");
        assert!(matches!(
            err,
            StorageError::Transition(WorkflowTransitionError::Blocked { .. })
        ));
        assert_eq!(s.current_step(), WorkflowStep::InstallationMethod);
    }

    #[test]
    fn test_automatic_route_applies_once() {
        let mut s = session(vec![empty_disk("vda")]);
        s.select_disk("vda", true).expect("select");
        assert_eq!(s.go_next().expect("next"), WorkflowStep::DiskEncryption);
        assert_eq!(s.go_next().expect("next"), WorkflowStep::Review);

        let applied = s.partitioning().get_applied_partitioning();
        assert!(applied.is_some());
        assert_eq!(s.partitioning().get_created_partitioning().len(), 1);
        assert_eq!(s.review_rows().len(), 3);

        assert!(matches!(
            s.go_next(),
            Err(StorageError::Transition(WorkflowTransitionError::AtLastStep { .. }))
        ));
    }

    #[test]
    fn test_operations_are_step_bound() {
        let mut s = session(vec![empty_disk("vda")]);
        assert!(s.set_password("abcdefgh").is_err());
        assert!(s.add_mount_point_row().is_err());
        s.select_disk("vda", true).expect("select");
        s.go_next().expect("next");
        assert!(s.select_disk("vda", false).is_err());
        assert!(s.set_scheme(Scheme::UseFreeSpace).is_err());
    }

    #[test]
    fn test_encryption_gate_blocks_next() {
        let mut s = session(vec![empty_disk("vda")]);
        s.select_disk("vda", true).expect("select");
        s.go_next().expect("next");

        s.set_encryption_enabled(true).expect("enable");
        s.set_password("abcdefgh").expect("password");
        assert!(!s.can_go_next().is_enabled());
        s.set_password_confirm("abcdefgh").expect("confirm");
        assert!(s.can_go_next().is_enabled());

        s.go_next().expect("review");
        let plan = s.applied_plan().expect("applied plan");
        assert!(plan.encrypted);
    }

    #[test]
    fn test_selection_change_resets_encryption_and_partitioning() {
        let mut s = session(vec![empty_disk("vda"), empty_disk("vdb")]);
        s.select_disk("vda", true).expect("select");
        s.go_next().expect("encryption");
        s.set_encryption_enabled(true).expect("enable");
        s.set_password("abcdefgh").expect("password");
        s.set_password_confirm("abcdefgh").expect("confirm");
        s.go_next().expect("review");

        s.go_back().expect("encryption");
        s.go_back().expect("method");
        // Back navigation alone keeps everything
        assert!(s.encryption().is_enabled());
        assert!(s.partitioning().get_applied_partitioning().is_some());

        s.select_disk("vdb", true).expect("select");
        assert!(!s.encryption().is_enabled());
        assert_eq!(s.partitioning().get_applied_partitioning(), None);
        assert_eq!(s.partitioning().get_created_partitioning().len(), 1);
    }

    #[test]
    fn test_scheme_falls_back_when_selection_changes() {
        let used = FixtureDisk::new("vdb", 16_106_127_360)
            .with_partition(FixturePartition::new(16_000_000_000).filesystem(Filesystem::Ext4));
        let mut s = session(vec![empty_disk("vda"), used]);
        s.select_disk("vda", true).expect("select");
        s.set_scheme(Scheme::UseFreeSpace).expect("viable on vda");

        s.select_disk("vda", false).expect("unselect");
        s.select_disk("vdb", true).expect("select");
        assert_eq!(s.scheme(), Scheme::EraseAll);
    }

    #[test]
    fn test_storage_bus_surface() {
        let s = session(vec![empty_disk("vda"), empty_disk("vdb")]);
        assert_eq!(s.get_usable_disks(), vec!["vda", "vdb"]);
        assert_eq!(s.get_applied_partitioning(), None);

        let path = s.create_partitioning(PartitioningKind::Manual);
        assert_eq!(path, "/org/installer/Storage/Partitioning/1");
        s.apply_partitioning(&path).expect("apply");
        assert_eq!(s.get_applied_partitioning(), Some(path.clone()));
        assert_eq!(s.get_created_partitioning(), vec![path]);
        assert!(s.apply_partitioning("/bogus/7").is_err());

        s.reset_partitioning();
        assert_eq!(s.get_applied_partitioning(), None);
    }
}
