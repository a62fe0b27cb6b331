//! Storage Workflow State Machine
//!
//! Tracks which storage step the installer is on and enforces the route the
//! partitioning scheme implies. The session decides *whether* a step may be
//! left; this module decides *where* it goes.
//!
//! # Step Flow
//!
//! ```text
//! InstallationMethod
//!     ├── automatic scheme ──▶ DiskEncryption ──┐
//!     └── manual scheme ────▶ MountPointMapping ┤
//!                                               ▼
//!                                            Review
//! ```
//!
//! Backward navigation retraces the same route.

use serde::Serialize;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::types::Scheme;

/// Storage configuration steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum WorkflowStep {
    /// Disk selection and partitioning scheme
    InstallationMethod = 0,

    /// Manual mount point assignment (manual scheme only)
    MountPointMapping = 1,

    /// Optional disk encryption (automatic schemes only)
    DiskEncryption = 2,

    /// Summary of the applied partitioning
    Review = 3,
}

impl WorkflowStep {
    /// Step identifier used by the UI
    pub const fn id(self) -> &'static str {
        match self {
            Self::InstallationMethod => "installation-method",
            Self::MountPointMapping => "mount-point-mapping",
            Self::DiskEncryption => "disk-encryption",
            Self::Review => "installation-review",
        }
    }

    /// Returns the next step for `scheme`, or None at review
    pub const fn next(self, scheme: Scheme) -> Option<Self> {
        match self {
            Self::InstallationMethod => Some(match scheme {
                Scheme::MountPointMapping => Self::MountPointMapping,
                Scheme::EraseAll | Scheme::UseFreeSpace => Self::DiskEncryption,
            }),
            Self::MountPointMapping | Self::DiskEncryption => Some(Self::Review),
            Self::Review => None,
        }
    }

    /// Returns the previous step for `scheme`, or None at the first step
    pub const fn previous(self, scheme: Scheme) -> Option<Self> {
        match self {
            Self::InstallationMethod => None,
            Self::MountPointMapping | Self::DiskEncryption => Some(Self::InstallationMethod),
            Self::Review => Some(match scheme {
                Scheme::MountPointMapping => Self::MountPointMapping,
                Scheme::EraseAll | Scheme::UseFreeSpace => Self::DiskEncryption,
            }),
        }
    }

    /// Returns true if the step belongs to the route of `scheme`
    pub const fn is_on_route(self, scheme: Scheme) -> bool {
        match self {
            Self::InstallationMethod | Self::Review => true,
            Self::MountPointMapping => matches!(scheme, Scheme::MountPointMapping),
            Self::DiskEncryption => !matches!(scheme, Scheme::MountPointMapping),
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::InstallationMethod => "Installation method",
            Self::MountPointMapping => "Manual disk configuration",
            Self::DiskEncryption => "Disk encryption",
            Self::Review => "Review and install",
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Whether the next button is enabled, and why not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "next", content = "reason", rename_all = "lowercase")]
pub enum NextGate {
    Enabled,
    Disabled(String),
}

impl NextGate {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Enabled => None,
            Self::Disabled(reason) => Some(reason),
        }
    }
}

/// Errors that can occur during navigation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowTransitionError {
    /// Forward navigation attempted while the gate is disabled
    #[error("Cannot leave {step}: {reason}")]
    Blocked { step: WorkflowStep, reason: String },

    #[error("Already at the first step ({step})")]
    AtFirstStep { step: WorkflowStep },

    #[error("Already at the last step ({step})")]
    AtLastStep { step: WorkflowStep },

    /// The operation belongs to a step the session is not on
    #[error("{operation} is only possible on {expected}, current step is {current}")]
    WrongStep {
        operation: &'static str,
        expected: WorkflowStep,
        current: WorkflowStep,
    },
}

/// Current step plus the history of visited steps.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    current: WorkflowStep,
    /// (step, unix timestamp) for every step entered
    history: Vec<(WorkflowStep, u64)>,
}

impl Default for WorkflowContext {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self {
            current: WorkflowStep::InstallationMethod,
            history: vec![(WorkflowStep::InstallationMethod, unix_now())],
        }
    }

    #[inline]
    pub fn current_step(&self) -> WorkflowStep {
        self.current
    }

    pub fn history(&self) -> &[(WorkflowStep, u64)] {
        &self.history
    }

    /// Step `advance` would move to
    pub fn peek_next(&self, scheme: Scheme) -> Result<WorkflowStep, WorkflowTransitionError> {
        self.current
            .next(scheme)
            .ok_or(WorkflowTransitionError::AtLastStep { step: self.current })
    }

    /// Move forward along the route of `scheme`.
    pub fn advance(&mut self, scheme: Scheme) -> Result<WorkflowStep, WorkflowTransitionError> {
        let next = self.peek_next(scheme)?;
        self.enter(next);
        Ok(next)
    }

    /// Move back along the route of `scheme`.
    pub fn retreat(&mut self, scheme: Scheme) -> Result<WorkflowStep, WorkflowTransitionError> {
        let previous = self
            .current
            .previous(scheme)
            .ok_or(WorkflowTransitionError::AtFirstStep { step: self.current })?;
        self.enter(previous);
        Ok(previous)
    }

    /// Fail unless the current step is `expected`.
    pub fn require(
        &self,
        expected: WorkflowStep,
        operation: &'static str,
    ) -> Result<(), WorkflowTransitionError> {
        if self.current == expected {
            Ok(())
        } else {
            Err(WorkflowTransitionError::WrongStep {
                operation,
                expected,
                current: self.current,
            })
        }
    }

    fn enter(&mut self, step: WorkflowStep) {
        tracing::info!("Storage step: {} -> {}", self.current, step);
        self.history.push((step, unix_now()));
        self.current = step;
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
