//! Reconciler actions

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::backend::BackendKind;

/// The single transition chosen for a snapshot
///
/// [`super::Reconciler::plan`] returns exactly one of these;
/// [`super::Reconciler::step`] applies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Nothing to do for this snapshot
    Idle,
    /// Install the service package
    Install,
    /// Ask the backend to create the unit's database / keyspace
    RequestBackend { kind: BackendKind },
    /// Bind relation data and render the configuration
    BindBackend { kind: BackendKind },
    /// Start the service (first run or restart, decided by the schema probe)
    Start { kind: BackendKind },
    /// Move the service from one port to another
    ApplyPort { from: u16, to: u16 },
    /// Relation data changed under a running service
    Rebind { kind: BackendKind },
    /// Render coordination settings and expose the RPC port
    EnableCoordination { peers: Vec<String> },
    /// Revert coordination settings
    DisableCoordination,
    /// Announce the service port on the transport relation
    AnnounceTransport { port: u16 },
    /// Forget a previous announcement after the transport relation left
    WithdrawTransport,
    /// Tear down after the active backend's relation left
    BackendLost { kind: BackendKind },
    /// Tear down because two backends are eligible
    Conflict,
}

impl Action {
    /// Whether this is [`Action::Idle`]
    pub fn is_idle(&self) -> bool {
        matches!(self, Action::Idle)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Idle => f.write_str("idle"),
            Action::Install => f.write_str("install"),
            Action::RequestBackend { kind } => write!(f, "request {} database", kind),
            Action::BindBackend { kind } => write!(f, "bind {}", kind),
            Action::Start { kind } => write!(f, "start against {}", kind),
            Action::ApplyPort { from, to } => write!(f, "move port {} -> {}", from, to),
            Action::Rebind { kind } => write!(f, "rebind {}", kind),
            Action::EnableCoordination { peers } => {
                write!(f, "enable coordination ({} peers)", peers.len())
            }
            Action::DisableCoordination => f.write_str("disable coordination"),
            Action::AnnounceTransport { port } => write!(f, "announce port {}", port),
            Action::WithdrawTransport => f.write_str("withdraw transport announcement"),
            Action::BackendLost { kind } => write!(f, "tear down after {} loss", kind),
            Action::Conflict => f.write_str("tear down on backend conflict"),
        }
    }
}
