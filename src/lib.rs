//! Storage Workflow Library
//!
//! The storage-configuration state machine of an OS installer: disk
//! inventory and selection, partitioning schemes, manual mount point
//! mapping, disk encryption, locked-device unlocking, and the lifecycle of
//! the partitioning objects applied on entering review.

pub mod cli;
pub mod config_file;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod inventory;
pub mod scenario;
pub mod selection;
pub mod session;
pub mod types;
pub mod unlock;
pub mod workflow_state;

// Re-export main types for convenience
pub use config_file::WorkflowConfig;
pub use encryption::{EncryptionGate, HeuristicStrengthEstimator, Passphrase, StrengthEstimator};
pub use error::{Result, StorageError};
pub use hardware::{BootRequirements, FirmwareMode};
pub use inventory::{DeviceSource, Disk, DiskInventory, FixtureSource, LsblkSource, Partition};
pub use selection::SelectionSet;
pub use session::StorageSession;
pub use types::{Filesystem, InitializationMode, PartitioningKind, PasswordStrength, Scheme};
pub use unlock::{DeviceUnlocker, UnlockCoordinator, UnlockError};
pub use workflow_state::{NextGate, WorkflowStep, WorkflowTransitionError};

// Storage engine
pub use engine::mount_points::{DeviceChoice, MappingIssue, MountPointMapper, MountPointRow};
pub use engine::partitioning::{PartitioningId, PartitioningManager, PartitioningState, StorageBus};
pub use engine::scheme::{PartitioningStrategy, SchemeRegistry, Viability};
pub use engine::storage::{ReviewRow, StorageOp, StoragePlan};
