//! Selection set: the disks chosen as installation targets.
//!
//! Mutators report whether anything changed so the session can decide if
//! downstream partitioning state must be rebuilt.

use std::collections::BTreeSet;

use crate::error::{Result, StorageError};
use crate::inventory::{Disk, DiskInventory, Partition};

/// Reason shown on the disabled next button when nothing is selected
pub const NO_DISKS_SELECTED: &str = "To continue, select the devices to install to.";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    selected: BTreeSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select or unselect a visible disk. Returns true if the set changed.
    ///
    /// Zero-size disks can be unselected but never selected.
    pub fn select(&mut self, inventory: &DiskInventory, disk: &str, selected: bool) -> Result<bool> {
        let Some(found) = inventory.disk(disk) else {
            return Err(StorageError::inventory(format!(
                "Disk '{}' is not in the inventory (rescan may be needed)",
                disk
            )));
        };
        if selected && !found.is_usable() {
            return Err(StorageError::validation(format!(
                "Disk '{}' has no usable capacity",
                disk
            )));
        }

        let changed = if selected {
            self.selected.insert(disk.to_string())
        } else {
            self.selected.remove(disk)
        };

        if changed {
            tracing::info!(
                "Disk {} {} ({} selected)",
                disk,
                if selected { "selected" } else { "unselected" },
                self.selected.len()
            );
        }
        Ok(changed)
    }

    /// Select every usable disk. Returns true if the set changed.
    pub fn select_all(&mut self, inventory: &DiskInventory) -> bool {
        let before = self.selected.len();
        self.selected.extend(
            inventory
                .disks()
                .iter()
                .filter(|d| d.is_usable())
                .map(|d| d.name.clone()),
        );
        self.selected.len() != before
    }

    /// Unselect everything. Returns true if the set changed.
    pub fn clear(&mut self) -> bool {
        let changed = !self.selected.is_empty();
        self.selected.clear();
        changed
    }

    /// Drop selections for disks that are no longer visible.
    pub fn retain_visible(&mut self, inventory: &DiskInventory) -> Vec<String> {
        let gone: Vec<String> = self
            .selected
            .iter()
            .filter(|name| inventory.disk(name).is_none())
            .cloned()
            .collect();
        for name in &gone {
            self.selected.remove(name);
        }
        gone
    }

    pub fn is_selected(&self, disk: &str) -> bool {
        self.selected.contains(disk)
    }

    /// Returns true if the partition lives on a selected disk
    pub fn covers(&self, partition: &Partition) -> bool {
        self.selected.contains(&partition.disk)
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Selected disks in inventory order
    pub fn disks<'a>(&self, inventory: &'a DiskInventory) -> Vec<&'a Disk> {
        inventory
            .disks()
            .iter()
            .filter(|d| self.selected.contains(&d.name))
            .collect()
    }

    /// Selected disk names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.selected.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::fixture::{FixtureDisk, FixtureSource};
    use std::sync::Arc;

    fn inventory() -> (Arc<FixtureSource>, DiskInventory) {
        let source = Arc::new(FixtureSource::new(vec![
            FixtureDisk::new("vda", 16_106_127_360),
            FixtureDisk::new("vdb", 10_000_000_000),
        ]));
        let mut inventory = DiskInventory::new(source.clone());
        inventory.scan();
        (source, inventory)
    }

    #[test]
    fn test_select_and_unselect() {
        let (_, inv) = inventory();
        let mut sel = SelectionSet::new();
        assert!(sel.select(&inv, "vda", true).expect("select"));
        assert!(!sel.select(&inv, "vda", true).expect("select again"));
        assert!(sel.is_selected("vda"));
        assert_eq!(sel.len(), 1);

        assert!(sel.select(&inv, "vda", false).expect("unselect"));
        assert!(sel.is_empty());
    }

    #[test]
    fn test_select_unknown_disk_is_error() {
        let (_, inv) = inventory();
        let mut sel = SelectionSet::new();
        assert!(sel.select(&inv, "vdc", true).is_err());
    }

    #[test]
    fn test_bulk_select() {
        let (_, inv) = inventory();
        let mut sel = SelectionSet::new();
        assert!(sel.select_all(&inv));
        assert_eq!(sel.names().collect::<Vec<_>>(), vec!["vda", "vdb"]);
        assert!(!sel.select_all(&inv));
        assert!(sel.clear());
        assert!(!sel.clear());
    }

    #[test]
    fn test_zero_size_disk_not_selectable() {
        let source = Arc::new(FixtureSource::new(vec![
            FixtureDisk::new("vda", 16_106_127_360),
            FixtureDisk::new("sdz", 0),
        ]));
        let mut inv = DiskInventory::new(source);
        inv.scan();
        let mut sel = SelectionSet::new();

        let err = sel.select(&inv, "sdz", true).expect_err("zero-size disk");
        assert!(err.to_string().contains("no usable capacity"));
        assert!(!sel.select(&inv, "sdz", false).expect("unselect is allowed"));

        assert!(sel.select_all(&inv));
        assert_eq!(sel.names().collect::<Vec<_>>(), vec!["vda"]);
    }

    #[test]
    fn test_retain_visible_after_removal() {
        let (source, mut inv) = inventory();
        let mut sel = SelectionSet::new();
        sel.select_all(&inv);
        source.detach("vdb");
        inv.rescan().expect("rescan");
        assert_eq!(sel.retain_visible(&inv), vec!["vdb".to_string()]);
        assert_eq!(sel.disks(&inv).len(), 1);
    }
}
