//! Partitioning schemes.
//!
//! Each scheme is a `PartitioningStrategy`: it decides whether it can serve
//! the current selection and, once the workflow reaches review, builds the
//! `StoragePlan` for it. The set of schemes is closed, so dispatch goes
//! through `strategy_for` instead of a registry of boxed plugins.

use serde::Serialize;
use strum::IntoEnumIterator;

use crate::config_file::WorkflowConfig;
use crate::engine::mount_points::MountPointMapper;
use crate::engine::storage::{
    boot_overhead, free_space_overhead, plan_automatic, AutoLayout, StoragePlan,
};
use crate::error::{Result, StorageError};
use crate::hardware::BootRequirements;
use crate::inventory::{format_size, Disk, DiskInventory};
use crate::selection::{SelectionSet, NO_DISKS_SELECTED};
use crate::types::Scheme;

/// Whether a scheme can be used with the current selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum Viability {
    Viable,
    NotViable(String),
}

impl Viability {
    pub fn is_viable(&self) -> bool {
        matches!(self, Self::Viable)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Viable => None,
            Self::NotViable(reason) => Some(reason),
        }
    }
}

/// Everything a strategy may look at.
#[derive(Clone, Copy)]
pub struct PlanContext<'a> {
    pub inventory: &'a DiskInventory,
    pub selection: &'a SelectionSet,
    pub config: &'a WorkflowConfig,
    pub boot: BootRequirements,
    pub mapper: &'a MountPointMapper,
    /// True when the encryption gate produced a passphrase
    pub encrypted: bool,
}

impl<'a> PlanContext<'a> {
    fn selected_disks(&self) -> Vec<&'a Disk> {
        self.selection.disks(self.inventory)
    }

    /// Bytes an automatic layout needs on its target disk
    fn required_space(&self) -> u64 {
        self.config.min_install_size + boot_overhead(&self.boot)
    }
}

pub trait PartitioningStrategy: Sync {
    fn scheme(&self) -> Scheme;

    fn viability(&self, ctx: &PlanContext<'_>) -> Viability;

    /// Build the plan snapshotted by the partitioning object.
    fn build_plan(&self, ctx: &PlanContext<'_>) -> Result<StoragePlan>;
}

/// Wipe every selected disk and lay out a fresh installation.
#[derive(Debug, Clone, Copy, Default)]
pub struct EraseAll;

/// Install into unpartitioned space, keeping existing partitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct UseFreeSpace;

/// Map mount points onto existing devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct MountPointMapping;

impl EraseAll {
    fn target<'a>(&self, ctx: &PlanContext<'a>) -> Option<&'a Disk> {
        let needed = ctx.required_space();
        ctx.selected_disks().into_iter().find(|d| d.size >= needed)
    }
}

impl PartitioningStrategy for EraseAll {
    fn scheme(&self) -> Scheme {
        Scheme::EraseAll
    }

    fn viability(&self, ctx: &PlanContext<'_>) -> Viability {
        if ctx.selection.is_empty() {
            return Viability::NotViable(NO_DISKS_SELECTED.to_string());
        }
        match self.target(ctx) {
            Some(_) => Viability::Viable,
            None => Viability::NotViable(format!(
                "The selected disks are too small. At least {} is needed.",
                format_size(ctx.required_space())
            )),
        }
    }

    fn build_plan(&self, ctx: &PlanContext<'_>) -> Result<StoragePlan> {
        let target = self
            .target(ctx)
            .ok_or_else(|| StorageError::partitioning("No selected disk can hold the installation"))?;
        plan_automatic(&AutoLayout {
            scheme: Scheme::EraseAll,
            target,
            selected: ctx.selected_disks(),
            boot: ctx.boot,
            root_filesystem: ctx.config.default_filesystem,
            encrypted: ctx.encrypted,
        })
    }
}

impl UseFreeSpace {
    /// First selected disk whose free space fits the layout. An existing
    /// firmware partition on the disk is reused, so it needs no room for one.
    fn target<'a>(&self, ctx: &PlanContext<'a>) -> Option<&'a Disk> {
        let min = ctx.config.min_install_size;
        ctx.selected_disks()
            .into_iter()
            .find(|d| d.free_space() >= min + free_space_overhead(d, &ctx.boot))
    }
}

impl PartitioningStrategy for UseFreeSpace {
    fn scheme(&self) -> Scheme {
        Scheme::UseFreeSpace
    }

    fn viability(&self, ctx: &PlanContext<'_>) -> Viability {
        if ctx.selection.is_empty() {
            return Viability::NotViable(NO_DISKS_SELECTED.to_string());
        }
        match self.target(ctx) {
            Some(_) => Viability::Viable,
            None => Viability::NotViable(format!(
                "Not enough free space on the selected disks. At least {} is needed.",
                format_size(ctx.required_space())
            )),
        }
    }

    fn build_plan(&self, ctx: &PlanContext<'_>) -> Result<StoragePlan> {
        let target = self
            .target(ctx)
            .ok_or_else(|| StorageError::partitioning("No selected disk has enough free space"))?;
        plan_automatic(&AutoLayout {
            scheme: Scheme::UseFreeSpace,
            target,
            selected: ctx.selected_disks(),
            boot: ctx.boot,
            root_filesystem: ctx.config.default_filesystem,
            encrypted: ctx.encrypted,
        })
    }
}

impl PartitioningStrategy for MountPointMapping {
    fn scheme(&self) -> Scheme {
        Scheme::MountPointMapping
    }

    fn viability(&self, ctx: &PlanContext<'_>) -> Viability {
        if ctx.selection.is_empty() {
            return Viability::NotViable(NO_DISKS_SELECTED.to_string());
        }
        let has_devices = ctx
            .selected_disks()
            .iter()
            .flat_map(|d| d.partitions.iter())
            .any(|p| p.is_locked() || p.is_mountable());
        if has_devices {
            Viability::Viable
        } else {
            Viability::NotViable(
                "The selected disks have no partitions to assign mount points to.".to_string(),
            )
        }
    }

    fn build_plan(&self, ctx: &PlanContext<'_>) -> Result<StoragePlan> {
        ctx.mapper.build_plan(ctx.inventory, ctx.selection)
    }
}

/// Strategy implementing a scheme
pub fn strategy_for(scheme: Scheme) -> &'static dyn PartitioningStrategy {
    match scheme {
        Scheme::EraseAll => &EraseAll,
        Scheme::UseFreeSpace => &UseFreeSpace,
        Scheme::MountPointMapping => &MountPointMapping,
    }
}

/// The scheme chosen on the installation method step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeRegistry {
    current: Scheme,
    default: Scheme,
}

impl SchemeRegistry {
    pub fn new(default: Scheme) -> Self {
        Self {
            current: default,
            default,
        }
    }

    pub fn current(&self) -> Scheme {
        self.current
    }

    pub fn default_scheme(&self) -> Scheme {
        self.default
    }

    /// Every scheme with its viability, in display order.
    pub fn available(&self, ctx: &PlanContext<'_>) -> Vec<(Scheme, Viability)> {
        Scheme::iter()
            .map(|s| (s, strategy_for(s).viability(ctx)))
            .collect()
    }

    /// Choose a scheme; a scheme that cannot serve the selection is rejected.
    pub fn set_scheme(&mut self, scheme: Scheme, ctx: &PlanContext<'_>) -> Result<()> {
        if let Viability::NotViable(reason) = strategy_for(scheme).viability(ctx) {
            // An empty selection makes every scheme non-viable; the choice
            // itself is still recorded so it survives until disks are picked
            if !ctx.selection.is_empty() {
                return Err(StorageError::validation(format!(
                    "Scheme '{}' is not available: {}",
                    scheme, reason
                )));
            }
        }
        if scheme != self.current {
            tracing::info!("Partitioning scheme: {} -> {}", self.current, scheme);
        }
        self.current = scheme;
        Ok(())
    }

    /// Re-check the current scheme after the selection changed.
    ///
    /// Falls back to the default (or the first viable scheme) when the current
    /// one no longer fits. Returns the scheme switched to, if any.
    pub fn revalidate(&mut self, ctx: &PlanContext<'_>) -> Option<Scheme> {
        if ctx.selection.is_empty() || strategy_for(self.current).viability(ctx).is_viable() {
            return None;
        }

        let fallback = std::iter::once(self.default)
            .chain(Scheme::iter())
            .find(|s| strategy_for(*s).viability(ctx).is_viable())?;

        tracing::info!(
            "Scheme {} no longer fits the selection, falling back to {}",
            self.current,
            fallback
        );
        self.current = fallback;
        Some(fallback)
    }

    /// Viability of the current scheme
    pub fn viability(&self, ctx: &PlanContext<'_>) -> Viability {
        strategy_for(self.current).viability(ctx)
    }

    pub fn build_plan(&self, ctx: &PlanContext<'_>) -> Result<StoragePlan> {
        let plan = strategy_for(self.current).build_plan(ctx)?;
        tracing::debug!("{}", plan.summary());
        Ok(plan)
    }
}

impl Default for SchemeRegistry {
    fn default() -> Self {
        Self::new(Scheme::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::FirmwareMode;
    use crate::inventory::fixture::{FixtureDisk, FixturePartition, FixtureSource};
    use crate::types::{Filesystem, PartitioningKind};
    use std::sync::Arc;

    struct Fixture {
        inventory: DiskInventory,
        selection: SelectionSet,
        config: WorkflowConfig,
        mapper: MountPointMapper,
    }

    impl Fixture {
        fn new(disks: Vec<FixtureDisk>) -> Self {
            let mut inventory = DiskInventory::new(Arc::new(FixtureSource::new(disks)));
            inventory.scan();
            let mut selection = SelectionSet::new();
            selection.select_all(&inventory);
            let config = WorkflowConfig::default();
            let mapper = MountPointMapper::new(config.default_filesystem);
            Self {
                inventory,
                selection,
                config,
                mapper,
            }
        }

        fn ctx(&self) -> PlanContext<'_> {
            PlanContext {
                inventory: &self.inventory,
                selection: &self.selection,
                config: &self.config,
                boot: BootRequirements::new(FirmwareMode::Bios, false),
                mapper: &self.mapper,
                encrypted: false,
            }
        }
    }

    fn empty_disk() -> FixtureDisk {
        FixtureDisk::new("vda", 16_106_127_360)
    }

    fn full_disk() -> FixtureDisk {
        FixtureDisk::new("vdb", 16_106_127_360)
            .with_partition(FixturePartition::new(16_000_000_000).filesystem(Filesystem::Ext4))
    }

    #[test]
    fn test_strategy_dispatch() {
        use strum::IntoEnumIterator;
        for scheme in Scheme::iter() {
            assert_eq!(strategy_for(scheme).scheme(), scheme);
        }
    }

    #[test]
    fn test_empty_disk_viability() {
        let fx = Fixture::new(vec![empty_disk()]);
        let registry = SchemeRegistry::default();
        let available = registry.available(&fx.ctx());
        assert!(available[0].1.is_viable());
        assert!(available[1].1.is_viable());
        // Nothing to map onto
        assert!(!available[2].1.is_viable());
    }

    #[test]
    fn test_full_disk_has_no_free_space() {
        let fx = Fixture::new(vec![full_disk()]);
        let ctx = fx.ctx();
        assert!(EraseAll.viability(&ctx).is_viable());
        let v = UseFreeSpace.viability(&ctx);
        assert!(v.reason().is_some_and(|r| r.contains("free space")));
        assert!(MountPointMapping.viability(&ctx).is_viable());
    }

    #[test]
    fn test_existing_esp_lowers_free_space_need() {
        use crate::engine::storage::{StorageOp, BOOT_SIZE, EFI_SIZE};

        let min = WorkflowConfig::default().min_install_size;
        let with_esp = FixtureDisk::new("vda", EFI_SIZE + BOOT_SIZE + min)
            .with_partition(FixturePartition::new(EFI_SIZE).filesystem(Filesystem::Vfat));
        let without_esp = FixtureDisk::new("vdb", BOOT_SIZE + min);

        for (disk, viable) in [(with_esp, true), (without_esp, false)] {
            let fx = Fixture::new(vec![disk]);
            let ctx = PlanContext {
                boot: BootRequirements::new(FirmwareMode::Uefi, false),
                ..fx.ctx()
            };
            assert_eq!(UseFreeSpace.viability(&ctx).is_viable(), viable);
            if viable {
                let plan = UseFreeSpace.build_plan(&ctx).expect("plan");
                let created = plan
                    .ops
                    .iter()
                    .filter(|op| matches!(op, StorageOp::CreatePartition { .. }))
                    .count();
                assert_eq!(created, 2);
            }
        }
    }

    #[test]
    fn test_tiny_disk_not_viable() {
        let fx = Fixture::new(vec![FixtureDisk::new("vda", 2_000_000_000)]);
        assert!(!EraseAll.viability(&fx.ctx()).is_viable());
    }

    #[test]
    fn test_set_non_viable_scheme_rejected() {
        let fx = Fixture::new(vec![full_disk()]);
        let mut registry = SchemeRegistry::default();
        assert!(registry.set_scheme(Scheme::UseFreeSpace, &fx.ctx()).is_err());
        assert_eq!(registry.current(), Scheme::EraseAll);
        registry
            .set_scheme(Scheme::MountPointMapping, &fx.ctx())
            .expect("manual is viable");
        assert_eq!(registry.current(), Scheme::MountPointMapping);
    }

    #[test]
    fn test_revalidate_falls_back_to_default() {
        let fx = Fixture::new(vec![full_disk()]);
        let mut registry = SchemeRegistry::default();
        registry
            .set_scheme(Scheme::MountPointMapping, &fx.ctx())
            .expect("manual is viable");

        let fx = Fixture::new(vec![empty_disk()]);
        assert_eq!(registry.revalidate(&fx.ctx()), Some(Scheme::EraseAll));
        assert_eq!(registry.current(), Scheme::EraseAll);
        assert_eq!(registry.revalidate(&fx.ctx()), None);
    }

    #[test]
    fn test_build_plan_uses_current_scheme() {
        let fx = Fixture::new(vec![empty_disk()]);
        let registry = SchemeRegistry::default();
        let plan = registry.build_plan(&fx.ctx()).expect("plan");
        assert_eq!(plan.scheme, Scheme::EraseAll);
        assert_eq!(plan.kind, PartitioningKind::Automatic);
        assert_eq!(plan.disks, vec!["vda".to_string()]);
    }
}
