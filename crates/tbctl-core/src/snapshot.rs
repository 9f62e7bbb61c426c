//! Driver input
//!
//! A [`Snapshot`] is everything the outside world tells the reconciler in
//! one delivery: whether install prerequisites are in place, which relations
//! are present and what they carry, and the operator's configured port.

use serde::{Deserialize, Serialize};

use crate::backend::{BackendKind, RelationData};
use crate::error::{Error, Result};

/// Default port of the managed service's HTTP endpoint
pub const DEFAULT_PORT: u16 = 8080;

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// One delivery of external conditions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Runtime prerequisites for installation are present
    #[serde(default)]
    pub install_ready: bool,

    /// SQL backend relation data, `None` while the relation is absent
    #[serde(default)]
    pub sql: Option<RelationData>,

    /// Wide-column backend relation data, `None` while the relation is absent
    #[serde(default)]
    pub wide: Option<RelationData>,

    /// Coordination peers (`addr:port`), `None` while not ready
    #[serde(default)]
    pub coordination: Option<Vec<String>>,

    /// Transport relation is present
    #[serde(default)]
    pub transport: bool,

    /// Operator-configured service port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            install_ready: false,
            sql: None,
            wide: None,
            coordination: None,
            transport: false,
            port: DEFAULT_PORT,
        }
    }
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark install prerequisites as ready
    pub fn with_install_ready(mut self, ready: bool) -> Self {
        self.install_ready = ready;
        self
    }

    /// Attach relation data for a backend
    pub fn with_backend(mut self, kind: BackendKind, data: RelationData) -> Self {
        match kind {
            BackendKind::Postgresql => self.sql = Some(data),
            BackendKind::Cassandra => self.wide = Some(data),
        }
        self
    }

    /// Remove a backend relation
    pub fn without_backend(mut self, kind: BackendKind) -> Self {
        match kind {
            BackendKind::Postgresql => self.sql = None,
            BackendKind::Cassandra => self.wide = None,
        }
        self
    }

    /// Set coordination peers
    pub fn with_coordination<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.coordination = Some(peers.into_iter().map(Into::into).collect());
        self
    }

    /// Set transport availability
    pub fn with_transport(mut self, available: bool) -> Self {
        self.transport = available;
        self
    }

    /// Set the operator port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Relation data for a backend kind
    pub fn backend(&self, kind: BackendKind) -> Option<&RelationData> {
        match kind {
            BackendKind::Postgresql => self.sql.as_ref(),
            BackendKind::Cassandra => self.wide.as_ref(),
        }
    }

    /// Whether a backend relation is present
    pub fn has_backend(&self, kind: BackendKind) -> bool {
        self.backend(kind).is_some()
    }

    /// Backend kinds whose relation is present
    pub fn eligible_backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|k| self.has_backend(*k))
            .collect()
    }

    /// Pick the single eligible backend
    ///
    /// - `Ok(None)`: no backend relation present
    /// - `Ok(Some(kind))`: exactly one present
    /// - `Err(BackendConflict)`: more than one present; no preference is applied
    pub fn select_backend(&self) -> Result<Option<BackendKind>> {
        match self.eligible_backends().as_slice() {
            [] => Ok(None),
            [kind] => Ok(Some(*kind)),
            _ => Err(Error::BackendConflict),
        }
    }

    /// Coordination peers in sorted, de-duplicated form
    pub fn coordination_peers(&self) -> Option<Vec<String>> {
        self.coordination.as_ref().map(|peers| {
            let mut peers: Vec<String> = peers
                .iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            peers.sort();
            peers.dedup();
            peers
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_backend() {
        let none = Snapshot::new();
        assert_eq!(none.select_backend().unwrap(), None);

        let sql = Snapshot::new().with_backend(BackendKind::Postgresql, RelationData::new());
        assert_eq!(sql.select_backend().unwrap(), Some(BackendKind::Postgresql));

        let both = sql.with_backend(BackendKind::Cassandra, RelationData::new());
        assert!(matches!(both.select_backend(), Err(Error::BackendConflict)));
    }

    #[test]
    fn test_coordination_peers_are_normalized() {
        let snap = Snapshot::new().with_coordination(["10.0.0.9:2181", " 10.0.0.8:2181", "10.0.0.9:2181", ""]);
        assert_eq!(
            snap.coordination_peers().unwrap(),
            vec!["10.0.0.8:2181".to_string(), "10.0.0.9:2181".to_string()]
        );
    }

    #[test]
    fn test_deserialize_defaults() {
        let snap: Snapshot = serde_json::from_str(r#"{"install_ready": true}"#).unwrap();
        assert!(snap.install_ready);
        assert_eq!(snap.port, DEFAULT_PORT);
        assert!(snap.sql.is_none());
    }
}
