//! Partitioning object lifecycle.
//!
//! Every trip into review creates one partitioning object and applies it.
//! Objects are never destroyed; their creation index only grows, and at most
//! one object is applied at any time.
//!
//! ```text
//! None ──create──▶ Created(n) ──apply──▶ Applied(n)
//!   ▲                                        │
//!   └──────────────── reset ─────────────────┘
//! ```
//!
//! The manager is a cheap `Clone` handle over shared state, so external
//! actors (the bus, test harnesses) may create objects from other threads.
//! All transitions happen under a single lock.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::storage::StoragePlan;
use crate::error::{Result, StorageError};
use crate::types::PartitioningKind;

/// Object path prefix of partitioning objects on the storage bus
pub const PARTITIONING_PATH_PREFIX: &str = "/org/installer/Storage/Partitioning";

/// Identifier of a partitioning object; renders as its bus path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PartitioningId(u64);

impl PartitioningId {
    /// Creation index, starting at 1
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitioningId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", PARTITIONING_PATH_PREFIX, self.0)
    }
}

impl FromStr for PartitioningId {
    type Err = StorageError;

    fn from_str(path: &str) -> Result<Self> {
        path.strip_prefix(PARTITIONING_PATH_PREFIX)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|n| *n > 0)
            .map(Self)
            .ok_or_else(|| {
                StorageError::partitioning(format!("'{}' is not a partitioning object path", path))
            })
    }
}

/// Lifecycle state of the partitioning backend: the applied object if one
/// is applied, else the most recently created object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "object", rename_all = "lowercase")]
pub enum PartitioningState {
    None,
    Created(PartitioningId),
    Applied(PartitioningId),
}

/// A partitioning object and the plan it snapshotted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitioningObject {
    pub id: PartitioningId,
    pub kind: PartitioningKind,
    /// Seconds since the Unix epoch
    pub created_at: u64,
    /// `None` for objects created out of band
    pub plan: Option<StoragePlan>,
}

#[derive(Debug, Default)]
struct ManagerState {
    objects: Vec<PartitioningObject>,
    applied: Option<PartitioningId>,
}

impl ManagerState {
    fn create(&mut self, kind: PartitioningKind, plan: Option<StoragePlan>) -> PartitioningId {
        let id = PartitioningId(self.objects.len() as u64 + 1);
        self.objects.push(PartitioningObject {
            id,
            kind,
            created_at: unix_now(),
            plan,
        });
        id
    }

    fn apply(&mut self, id: PartitioningId) -> Result<()> {
        if !self.objects.iter().any(|o| o.id == id) {
            return Err(StorageError::partitioning(format!(
                "Unknown partitioning object {}",
                id
            )));
        }
        self.applied = Some(id);
        Ok(())
    }
}

/// Shared handle to the partitioning objects of a session.
#[derive(Debug, Clone, Default)]
pub struct PartitioningManager {
    state: Arc<Mutex<ManagerState>>,
}

impl PartitioningManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        // Every transition is a single push or assignment, so a poisoned
        // guard still holds consistent state
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an object without applying it.
    pub fn create_partitioning(&self, kind: PartitioningKind) -> PartitioningId {
        let id = self.lock().create(kind, None);
        tracing::info!("Created partitioning {} ({})", id, kind);
        id
    }

    pub fn apply_partitioning(&self, id: PartitioningId) -> Result<()> {
        self.lock().apply(id)?;
        tracing::info!("Applied partitioning {}", id);
        Ok(())
    }

    /// Create an object for `plan` and apply it as one transition.
    pub fn create_and_apply(&self, plan: StoragePlan) -> PartitioningId {
        let kind = plan.kind;
        let id = {
            let mut state = self.lock();
            let id = state.create(kind, Some(plan));
            state.applied = Some(id);
            id
        };
        tracing::info!("Created and applied partitioning {} ({})", id, kind);
        id
    }

    /// Un-apply the current object. Created objects are kept.
    pub fn reset_partitioning(&self) {
        if let Some(id) = self.lock().applied.take() {
            tracing::info!("Partitioning {} reset", id);
        }
    }

    /// Every object created so far, in creation order
    pub fn get_created_partitioning(&self) -> Vec<PartitioningId> {
        self.lock().objects.iter().map(|o| o.id).collect()
    }

    pub fn get_applied_partitioning(&self) -> Option<PartitioningId> {
        self.lock().applied
    }

    /// Objects created after the applied one do not hide it
    pub fn state(&self) -> PartitioningState {
        let state = self.lock();
        match (state.applied, state.objects.last()) {
            (Some(applied), _) => PartitioningState::Applied(applied),
            (None, Some(latest)) => PartitioningState::Created(latest.id),
            (None, None) => PartitioningState::None,
        }
    }

    pub fn object(&self, id: PartitioningId) -> Option<PartitioningObject> {
        self.lock().objects.iter().find(|o| o.id == id).cloned()
    }

    /// Plan of the applied object
    pub fn applied_plan(&self) -> Option<StoragePlan> {
        let state = self.lock();
        let applied = state.applied?;
        state
            .objects
            .iter()
            .find(|o| o.id == applied)
            .and_then(|o| o.plan.clone())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Object-bus surface of the storage backend.
///
/// Object references travel as bus paths.
pub trait StorageBus {
    fn get_usable_disks(&self) -> Vec<String>;

    fn get_created_partitioning(&self) -> Vec<String>;

    fn get_applied_partitioning(&self) -> Option<String>;

    fn create_partitioning(&self, kind: PartitioningKind) -> String;

    fn apply_partitioning(&self, path: &str) -> Result<()>;

    fn reset_partitioning(&self);
}
