//! Engine modules: the logic that turns a selection into a partitioning plan.
//!
//! Nothing in here touches disks. Schemes and the mount point mapper produce
//! `StoragePlan`s; the partitioning manager records which plan is applied.

pub mod mount_points;
pub mod partitioning;
pub mod scheme;
pub mod storage;
