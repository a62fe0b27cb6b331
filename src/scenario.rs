//! Scripted sessions.
//!
//! A scenario is a JSON list of UI actions replayed against a
//! `StorageSession`, e.g.
//!
//! ```json
//! [
//!   {"action": "select-disk", "disk": "vda"},
//!   {"action": "set-scheme", "scheme": "mount-point-mapping"},
//!   {"action": "next"},
//!   {"action": "assign-device", "mount_point": "/", "device": "vda3"},
//!   {"action": "next"}
//! ]
//! ```
//!
//! Mapping rows are addressed by mount point, which is how a person reading
//! the table identifies them.

use anyhow::{Context, Result as AnyResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::encryption::Passphrase;
use crate::engine::mount_points::{MountPointRow, RowId};
use crate::engine::storage::ReviewRow;
use crate::error::{Result, StorageError};
use crate::session::StorageSession;
use crate::types::{Filesystem, Scheme};
use crate::workflow_state::{NextGate, WorkflowStep};

fn selected_default() -> bool {
    true
}

/// One UI action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    Rescan,
    SelectDisk {
        disk: String,
        #[serde(default = "selected_default")]
        selected: bool,
    },
    SelectAll,
    SelectNone,
    SetScheme {
        scheme: Scheme,
    },
    SetEncryption {
        enabled: bool,
    },
    SetPassword {
        password: String,
    },
    SetPasswordConfirm {
        password: String,
    },
    /// Append a row, optionally filling it in
    AddRow {
        #[serde(default)]
        mount_point: Option<String>,
        #[serde(default)]
        device: Option<String>,
    },
    RemoveRow {
        mount_point: String,
    },
    AssignDevice {
        mount_point: String,
        device: Option<String>,
    },
    SetReformat {
        mount_point: String,
        reformat: bool,
    },
    SetFormatType {
        mount_point: String,
        format_type: Filesystem,
    },
    /// Unlock one device, or every locked device when `device` is absent
    Unlock {
        #[serde(default)]
        device: Option<String>,
        passphrase: String,
    },
    SkipLocked,
    Next,
    Back,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rescan => write!(f, "rescan"),
            Self::SelectDisk { disk, selected } => {
                write!(f, "{} {}", if *selected { "select" } else { "unselect" }, disk)
            }
            Self::SelectAll => write!(f, "select all"),
            Self::SelectNone => write!(f, "select none"),
            Self::SetScheme { scheme } => write!(f, "scheme {}", scheme),
            Self::SetEncryption { enabled } => write!(f, "encryption {}", enabled),
            Self::SetPassword { password } => write!(f, "password ({} chars)", password.chars().count()),
            Self::SetPasswordConfirm { password } => {
                write!(f, "confirm password ({} chars)", password.chars().count())
            }
            Self::AddRow { mount_point, device } => write!(
                f,
                "add row {} {}",
                mount_point.as_deref().unwrap_or("-"),
                device.as_deref().unwrap_or("-")
            ),
            Self::RemoveRow { mount_point } => write!(f, "remove row {}", mount_point),
            Self::AssignDevice { mount_point, device } => write!(
                f,
                "assign {} -> {}",
                device.as_deref().unwrap_or("none"),
                mount_point
            ),
            Self::SetReformat { mount_point, reformat } => {
                write!(f, "reformat {} {}", mount_point, reformat)
            }
            Self::SetFormatType { mount_point, format_type } => {
                write!(f, "format {} as {}", mount_point, format_type)
            }
            Self::Unlock { device, .. } => {
                write!(f, "unlock {}", device.as_deref().unwrap_or("all"))
            }
            Self::SkipLocked => write!(f, "skip locked devices"),
            Self::Next => write!(f, "next"),
            Self::Back => write!(f, "back"),
        }
    }
}

impl Action {
    /// Apply the action to a session.
    pub fn apply(&self, session: &mut StorageSession) -> Result<()> {
        match self {
            Self::Rescan => {
                let report = session.rescan()?;
                if report.no_additional_disks() {
                    tracing::info!("No additional disks detected");
                }
            }
            Self::SelectDisk { disk, selected } => session.select_disk(disk, *selected)?,
            Self::SelectAll => session.select_all()?,
            Self::SelectNone => session.select_none()?,
            Self::SetScheme { scheme } => session.set_scheme(*scheme)?,
            Self::SetEncryption { enabled } => session.set_encryption_enabled(*enabled)?,
            Self::SetPassword { password } => session.set_password(password.as_str())?,
            Self::SetPasswordConfirm { password } => session.set_password_confirm(password.as_str())?,
            Self::AddRow { mount_point, device } => {
                let id = session.add_mount_point_row()?;
                if let Some(mp) = mount_point {
                    session.set_mount_point(id, mp)?;
                }
                if let Some(dev) = device {
                    session.assign_device(id, Some(dev))?;
                }
            }
            Self::RemoveRow { mount_point } => {
                let id = row_id(session, mount_point)?;
                session.remove_mount_point_row(id)?;
            }
            Self::AssignDevice { mount_point, device } => {
                let id = row_id(session, mount_point)?;
                session.assign_device(id, device.as_deref())?;
            }
            Self::SetReformat { mount_point, reformat } => {
                let id = row_id(session, mount_point)?;
                session.set_reformat(id, *reformat)?;
            }
            Self::SetFormatType { mount_point, format_type } => {
                let id = row_id(session, mount_point)?;
                session.set_format_type(id, *format_type)?;
            }
            Self::Unlock { device, passphrase } => {
                let passphrase = Passphrase::new(passphrase.as_str());
                match device {
                    Some(dev) => session.unlock_device(dev, &passphrase)?,
                    None => {
                        session.unlock_all(&passphrase)?;
                    }
                }
            }
            Self::SkipLocked => {
                session.skip_locked()?;
            }
            Self::Next => {
                session.go_next()?;
            }
            Self::Back => {
                session.go_back()?;
            }
        }
        Ok(())
    }
}

fn row_id(session: &StorageSession, mount_point: &str) -> Result<RowId> {
    session
        .mapper()
        .row_for(mount_point)
        .map(|r| r.id)
        .ok_or_else(|| StorageError::validation(format!("No row for mount point {}", mount_point)))
}

/// Read a scenario file.
pub fn load_actions<P: AsRef<Path>>(path: P) -> AnyResult<Vec<Action>> {
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read scenario {:?}", path.as_ref()))?;
    serde_json::from_str(&content).context("Failed to parse scenario JSON")
}

/// Result of one replayed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    pub action: String,
    pub step: WorkflowStep,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Replay every action. Failed actions are recorded and the replay goes on,
/// the way a user retries after an inline error.
pub fn replay(session: &mut StorageSession, actions: &[Action]) -> Vec<ActionOutcome> {
    actions
        .iter()
        .map(|action| {
            let error = action.apply(session).err().map(|e| {
                tracing::warn!("{}: {}", action, e);
                e.to_string()
            });
            ActionOutcome {
                action: action.to_string(),
                step: session.current_step(),
                error,
            }
        })
        .collect()
}

/// Snapshot of a session for printing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub step: WorkflowStep,
    pub scheme: Scheme,
    pub gate: NextGate,
    pub selected: Vec<String>,
    pub rows: Vec<MountPointRow>,
    pub pending_unlock: Vec<String>,
    pub created_partitioning: Vec<String>,
    pub applied_partitioning: Option<String>,
    pub review: Vec<ReviewRow>,
}

impl SessionReport {
    pub fn from_session(session: &StorageSession) -> Self {
        let manager = session.partitioning();
        Self {
            step: session.current_step(),
            scheme: session.scheme(),
            gate: session.can_go_next(),
            selected: session.selection().names().map(str::to_string).collect(),
            rows: session.mapper().rows().to_vec(),
            pending_unlock: session.pending_unlock(),
            created_partitioning: manager
                .get_created_partitioning()
                .iter()
                .map(|id| id.to_string())
                .collect(),
            applied_partitioning: manager.get_applied_partitioning().map(|id| id.to_string()),
            review: session.review_rows(),
        }
    }
}
