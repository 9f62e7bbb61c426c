//! Lifecycle status
//!
//! What the reconciler reports to the outside world after every step.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::BackendKind;
use crate::error::Error;

/// Why the unit is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    /// No backend relation is present
    NoBackend,
    /// More than one backend relation is present
    Conflict,
    /// A backend is present but not usable yet (incomplete data, unreachable)
    BackendUnavailable,
    /// The requested settings cannot be applied
    InvalidConfig,
    /// A step failed hard (install, bootstrap, render, service)
    StepFailed,
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockedReason::NoBackend => f.write_str("no-backend"),
            BlockedReason::Conflict => f.write_str("conflict"),
            BlockedReason::BackendUnavailable => f.write_str("backend-unavailable"),
            BlockedReason::InvalidConfig => f.write_str("invalid-config"),
            BlockedReason::StepFailed => f.write_str("step-failed"),
        }
    }
}

/// Coarse lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LifecycleState {
    /// Package not installed
    Uninstalled,
    /// Waiting on something outside the reconciler's control
    Blocked {
        /// Why
        reason: BlockedReason,
    },
    /// Work in progress
    Maintenance,
    /// Service running against a backend
    Active {
        /// Backend in use
        backend: BackendKind,
        /// Coordination layer enabled
        coordination: bool,
    },
}

impl LifecycleState {
    /// Shorthand for a blocked state
    pub fn blocked(reason: BlockedReason) -> Self {
        LifecycleState::Blocked { reason }
    }

    /// Whether the service is running
    pub fn is_active(&self) -> bool {
        matches!(self, LifecycleState::Active { .. })
    }

    /// Blocked reason, if blocked
    pub fn blocked_reason(&self) -> Option<BlockedReason> {
        match self {
            LifecycleState::Blocked { reason } => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninstalled => f.write_str("Uninstalled"),
            LifecycleState::Blocked { reason } => write!(f, "Blocked ({})", reason),
            LifecycleState::Maintenance => f.write_str("Maintenance"),
            LifecycleState::Active {
                backend,
                coordination: false,
            } => write!(f, "Active ({})", backend),
            LifecycleState::Active {
                backend,
                coordination: true,
            } => write!(f, "Active ({}, coordinated)", backend),
        }
    }
}

/// Externally observable status: state plus a human readable reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Lifecycle state
    pub state: LifecycleState,
    /// Reason text, empty when the state says it all
    pub message: String,
}

impl Status {
    /// Create a status
    pub fn new(state: LifecycleState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
        }
    }

    /// Blocked status
    pub fn blocked(reason: BlockedReason, message: impl Into<String>) -> Self {
        Self::new(LifecycleState::blocked(reason), message)
    }

    /// Status reported after a failed step
    pub fn from_error(error: &Error) -> Self {
        let reason = match error {
            Error::BackendConflict => BlockedReason::Conflict,
            Error::Config(_) => BlockedReason::InvalidConfig,
            e if e.is_blocking_only() => BlockedReason::BackendUnavailable,
            _ => BlockedReason::StepFailed,
        };
        Self::blocked(reason, error.to_string())
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new(LifecycleState::Uninstalled, "")
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.state)
        } else {
            write!(f, "{}: {}", self.state, self.message)
        }
    }
}
