// # Cassandra Backend Binding
//
// Binds the ThingsBoard service to a Cassandra cluster supplied by a
// backend relation.
//
// ## Relation Fields
//
// - `cluster_name`: required
// - `nodes`: required, comma separated `addr[:port]` list
// - `username`, `password`: required
//
// The keyspace is not supplied by the relation. It is derived from the unit
// identity so that repeated requests always name the same keyspace.
//
// ## Schema Probe
//
// The probe shells out to `cqlsh` against the first node:
//
// ```text
// cqlsh --cqlshrc=<private file> -e "SELECT table_name FROM system_schema.tables WHERE keyspace_name = '<ks>'" <host> <port>
// ```
//
// The keyspace itself is created on request by the backend, so only tables
// inside it mean ThingsBoard has already been bootstrapped. Credentials go
// through a mode 0600 cqlshrc file, never the command line.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tbctl_core::backend::{BackendContext, BackendKind, RelationData, keys};
use tbctl_core::config::BackendConfig;
use tbctl_core::render::CASSANDRA_TEMPLATE;
use tbctl_core::traits::{BackendBinding, BackendBindingFactory};
use tbctl_core::{ConnectivityFailureKind, Error, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Native protocol port used when a node omits one
pub const DEFAULT_NATIVE_PORT: u16 = 9042;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const REQUIRED_FIELDS: [&str; 4] = [keys::CLUSTER_NAME, keys::NODES, keys::USERNAME, keys::PASSWORD];

/// Cassandra backend binding
#[derive(Debug, Clone)]
pub struct CassandraBinding {
    /// `cqlsh` executable used by the probe
    cqlsh_path: String,

    /// Upper bound on one probe invocation
    connect_timeout: Duration,
}

impl CassandraBinding {
    /// Create a binding
    pub fn new(cqlsh_path: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            cqlsh_path: cqlsh_path.into(),
            connect_timeout,
        }
    }

    fn failure(kind: ConnectivityFailureKind, message: impl Into<String>) -> Error {
        Error::connectivity(BackendKind::Cassandra, kind, message)
    }

    /// Write the credentials into a private cqlshrc, removed on drop
    async fn credentials_file(&self, context: &BackendContext) -> Result<tempfile::NamedTempFile> {
        let username = context.get(keys::USERNAME).unwrap_or_default();
        let password = context.get(keys::PASSWORD).unwrap_or_default();
        if [username, password]
            .iter()
            .any(|v| v.contains(['\n', '\r']))
        {
            return Err(Self::failure(
                ConnectivityFailureKind::FieldsMissing,
                "credentials contain line breaks",
            ));
        }

        let file = tempfile::Builder::new()
            .prefix("tbctl-cqlshrc")
            .tempfile()?;
        let contents = format!(
            "[authentication]\nusername = {}\npassword = {}\n",
            username, password
        );
        tokio::fs::write(file.path(), contents).await?;
        Ok(file)
    }
}

impl Default for CassandraBinding {
    fn default() -> Self {
        Self::new("cqlsh", DEFAULT_CONNECT_TIMEOUT)
    }
}

/// Parse a node list into `(host, port)` pairs
///
/// Blank entries are skipped; a missing port means [`DEFAULT_NATIVE_PORT`].
/// Returns `None` if any entry has an unparseable port or no entry is left.
pub fn parse_nodes(nodes: &str) -> Option<Vec<(String, u16)>> {
    let mut parsed = Vec::new();

    for entry in nodes.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (host, port) = match entry.rsplit_once(':') {
            Some((host, port)) => (host.trim(), port.trim().parse().ok()?),
            None => (entry, DEFAULT_NATIVE_PORT),
        };
        if host.is_empty() {
            return None;
        }
        parsed.push((host.to_string(), port));
    }

    (!parsed.is_empty()).then_some(parsed)
}

/// Interpret `cqlsh` output of the table query
///
/// `Some(true)` when a row came back, `Some(false)` on an empty result,
/// `None` if the output carries no row count at all.
pub fn parse_probe_output(stdout: &str) -> Option<bool> {
    stdout.lines().map(str::trim).find_map(|line| {
        let count = line.strip_prefix('(')?.strip_suffix(')')?;
        let count = count
            .strip_suffix(" rows")
            .or_else(|| count.strip_suffix(" row"))?;
        count.trim().parse::<u64>().ok().map(|n| n > 0)
    })
}

#[async_trait]
impl BackendBinding for CassandraBinding {
    fn kind(&self) -> BackendKind {
        BackendKind::Cassandra
    }

    fn template_id(&self) -> &str {
        CASSANDRA_TEMPLATE
    }

    fn bind(&self, raw: &RelationData, unit: &str) -> Result<BackendContext> {
        raw.require(BackendKind::Cassandra, &REQUIRED_FIELDS)?;

        // Whitespace-normalised so re-delivered data with different spacing
        // binds to the same context
        let nodes = raw
            .get(keys::NODES)
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>()
            .join(",");

        Ok(BackendContext::new(BackendKind::Cassandra)
            .with(keys::CLUSTER_NAME, raw.get(keys::CLUSTER_NAME).unwrap_or_default())
            .with(keys::NODES, nodes)
            .with(keys::KEYSPACE, self.database_name(unit))
            .with(keys::USERNAME, raw.get(keys::USERNAME).unwrap_or_default())
            .with(keys::PASSWORD, raw.get(keys::PASSWORD).unwrap_or_default()))
    }

    async fn schema_present(&self, context: &BackendContext) -> Result<bool> {
        let nodes = context.get(keys::NODES).unwrap_or_default();
        let (host, port) = parse_nodes(nodes)
            .and_then(|nodes| nodes.into_iter().next())
            .ok_or_else(|| {
                Self::failure(
                    ConnectivityFailureKind::FieldsMissing,
                    format!("invalid node list: {:?}", nodes),
                )
            })?;

        let keyspace = context.get(keys::KEYSPACE).ok_or_else(|| {
            Self::failure(ConnectivityFailureKind::FieldsMissing, "context has no keyspace")
        })?;

        let query = format!(
            "SELECT table_name FROM system_schema.tables WHERE keyspace_name = '{}'",
            keyspace
        );

        debug!("Probing Cassandra keyspace {} on {}:{}", keyspace, host, port);

        let cqlshrc = self.credentials_file(context).await?;
        let child = Command::new(&self.cqlsh_path)
            .arg(format!("--cqlshrc={}", cqlshrc.path().display()))
            .arg("-e")
            .arg(&query)
            .arg(&host)
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Self::failure(
                    ConnectivityFailureKind::ConnectFailed,
                    format!("failed to run {}: {}", self.cqlsh_path, e),
                )
            })?;

        let output = tokio::time::timeout(self.connect_timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Self::failure(
                    ConnectivityFailureKind::ConnectFailed,
                    format!("timed out after {}s", self.connect_timeout.as_secs()),
                )
            })?
            .map_err(|e| Self::failure(ConnectivityFailureKind::ConnectFailed, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::failure(
                ConnectivityFailureKind::ConnectFailed,
                stderr.trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let present = parse_probe_output(&stdout).ok_or_else(|| {
            Self::failure(
                ConnectivityFailureKind::QueryFailed,
                "unexpected cqlsh output",
            )
        })?;

        info!("Cassandra keyspace {} holds tables: {}", keyspace, present);
        Ok(present)
    }
}

/// Factory for creating Cassandra bindings
pub struct CassandraBindingFactory;

impl BackendBindingFactory for CassandraBindingFactory {
    fn create(&self, config: &BackendConfig) -> Result<Box<dyn BackendBinding>> {
        match config {
            BackendConfig::Cassandra {
                cqlsh_path,
                connect_timeout_secs,
            } => {
                if cqlsh_path.is_empty() {
                    return Err(Error::config("cqlsh path cannot be empty"));
                }
                Ok(Box::new(CassandraBinding::new(
                    cqlsh_path.clone(),
                    Duration::from_secs(*connect_timeout_secs),
                )))
            }
            _ => Err(Error::config("Invalid config for Cassandra binding")),
        }
    }
}

/// Register the Cassandra binding with a registry
pub fn register(registry: &tbctl_core::BackendRegistry) {
    registry.register_binding(BackendKind::Cassandra.tag(), Box::new(CassandraBindingFactory));
}
