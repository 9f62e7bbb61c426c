//! Backend data model
//!
//! Types shared by every backend binding:
//! - [`BackendKind`]: which database family a binding talks to
//! - [`RelationData`]: raw connection fields supplied by a backend relation
//! - [`BackendContext`]: the derived, render-ready connection context
//!
//! The binding implementations themselves live in their own crates
//! (`tbctl-backend-postgres`, `tbctl-backend-cassandra`) and implement
//! [`crate::traits::BackendBinding`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::conditions::Condition;
use crate::error::{Error, Result};

/// Well-known context and relation keys
pub mod keys {
    /// Backend kind tag written into every context
    pub const BACKEND_KIND: &str = "backend_kind";
    /// Database host
    pub const HOST: &str = "host";
    /// Database port as supplied by the relation
    pub const PORT: &str = "port";
    /// Database port inside a context (kept apart from the service port)
    pub const DB_PORT: &str = "db_port";
    /// Logical database name (SQL)
    pub const DATABASE: &str = "database";
    /// Keyspace name (wide-column)
    pub const KEYSPACE: &str = "keyspace";
    /// Cluster name (wide-column)
    pub const CLUSTER_NAME: &str = "cluster_name";
    /// Comma separated `addr:port` list (wide-column)
    pub const NODES: &str = "nodes";
    /// Credential user
    pub const USERNAME: &str = "username";
    /// Credential secret
    pub const PASSWORD: &str = "password";
}

/// Supported backend families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Primary/replica SQL store
    Postgresql,
    /// Wide-column cluster store
    Cassandra,
}

impl BackendKind {
    /// All known kinds, in a fixed order
    pub const ALL: [BackendKind; 2] = [BackendKind::Postgresql, BackendKind::Cassandra];

    /// Registry / config tag for this kind
    pub fn tag(&self) -> &'static str {
        match self {
            BackendKind::Postgresql => "postgresql",
            BackendKind::Cassandra => "cassandra",
        }
    }

    /// Database type as the managed service spells it in its config file
    pub fn database_type(&self) -> &'static str {
        match self {
            BackendKind::Postgresql => "sql",
            BackendKind::Cassandra => "cassandra",
        }
    }

    /// Condition raised while this backend's relation is present
    pub fn availability_condition(&self) -> Condition {
        match self {
            BackendKind::Postgresql => Condition::SqlConnected,
            BackendKind::Cassandra => Condition::WideConnected,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Postgresql => f.write_str("PostgreSQL"),
            BackendKind::Cassandra => f.write_str("Cassandra"),
        }
    }
}

/// Longest name accepted as a Cassandra keyspace
pub const MAX_DATABASE_NAME_LEN: usize = 48;

/// Derive the logical database / keyspace name for a unit
///
/// `thingsboard/0` becomes `thingsboard_0`. The result only contains
/// lowercase ASCII alphanumerics and underscores, starts with a letter and
/// is at most [`MAX_DATABASE_NAME_LEN`] long, which is valid both as a
/// PostgreSQL database name and as a Cassandra keyspace. Deriving it from the
/// unit identity alone keeps repeated requests idempotent.
///
/// Overlong names keep their head and end in a hash of the full unit, so
/// units that differ only in their tail still get distinct names.
pub fn database_name_for_unit(unit: &str) -> String {
    let mut name: String = unit
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();

    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        name.insert_str(0, "tb_");
    }

    if name.len() > MAX_DATABASE_NAME_LEN {
        let suffix = format!("_{:08x}", fnv1a(unit.as_bytes()));
        name.truncate(MAX_DATABASE_NAME_LEN - suffix.len());
        name.push_str(&suffix);
    }
    name
}

// 32-bit FNV-1a; stable across builds, unlike std's hasher
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}

/// Raw fields supplied by a backend relation
///
/// Values are kept as strings exactly as the relation delivered them;
/// blank values count as absent.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationData(BTreeMap<String, String>);

impl RelationData {
    /// Create empty relation data
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get a non-blank field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Require every listed field, reporting all missing ones at once
    pub fn require(&self, backend: BackendKind, fields: &[&str]) -> Result<()> {
        let missing: Vec<&str> = fields
            .iter()
            .copied()
            .filter(|f| self.get(f).is_none())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::binding_unavailable(backend, missing))
        }
    }

    /// Whether no field is set
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| v.trim().is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RelationData {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// Hides credentials
impl fmt::Debug for RelationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.0.iter().map(|(k, v)| {
                let shown = if k == keys::PASSWORD { "<REDACTED>" } else { v.as_str() };
                (k, shown)
            }))
            .finish()
    }
}

/// Connection context derived from a backend relation
///
/// Exactly one context is active at a time. It is persisted so that later
/// reconfiguration (a port change, say) can be rendered without asking the
/// relation again.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendContext {
    kind: BackendKind,
    fields: BTreeMap<String, String>,
}

impl BackendContext {
    /// Create an empty context for a backend kind
    pub fn new(kind: BackendKind) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(keys::BACKEND_KIND.to_string(), kind.database_type().to_string());
        Self { kind, fields }
    }

    /// Builder-style field insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Backend kind of this context
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Get a field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// All fields, ordered by key
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

// Hides credentials
impl fmt::Debug for BackendContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .fields
            .iter()
            .map(|(k, v)| {
                let shown = if k == keys::PASSWORD { "<REDACTED>" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();

        f.debug_struct("BackendContext")
            .field("kind", &self.kind)
            .field("fields", &redacted)
            .finish()
    }
}
