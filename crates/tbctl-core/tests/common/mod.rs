//! Test doubles and common utilities for contract tests
//!
//! Every host effect is recorded into one shared [`Journal`] so tests can
//! assert both on counts and on the order in which effects happened.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tbctl_core::backend::{BackendContext, BackendKind, RelationData, keys};
use tbctl_core::config::ControllerConfig;
use tbctl_core::error::{ConnectivityFailureKind, Error, Result};
use tbctl_core::render::{CASSANDRA_TEMPLATE, ConfigRenderer, POSTGRESQL_TEMPLATE};
use tbctl_core::snapshot::Snapshot;
use tbctl_core::state::MemoryContextStore;
use tbctl_core::traits::{
    BackendBinding, CommandOutput, CommandRunner, ContextStore, PersistedContext, PortManager,
    RelationPublisher, ServiceManager, SnapshotSource,
};
use tbctl_core::{Reconciler, ServiceController};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_stream::Stream;

pub const UNIT: &str = "thingsboard/0";
pub const SERVICE: &str = "thingsboard";
pub const INSTALL_PROGRAM: &str = "dpkg";
pub const BOOTSTRAP_PROGRAM: &str = "/usr/share/thingsboard/bin/install/install.sh";

/// Ordered record of host effects
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Number of entries equal to `entry`
    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// Records start/stop/restart
pub struct RecordingServiceManager {
    journal: Journal,
}

#[async_trait::async_trait]
impl ServiceManager for RecordingServiceManager {
    async fn start(&self, service: &str) -> Result<()> {
        self.journal.push(format!("start {service}"));
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<()> {
        self.journal.push(format!("stop {service}"));
        Ok(())
    }

    async fn restart(&self, service: &str) -> Result<()> {
        self.journal.push(format!("restart {service}"));
        Ok(())
    }
}

/// Records port exposure
pub struct RecordingPortManager {
    journal: Journal,
}

#[async_trait::async_trait]
impl PortManager for RecordingPortManager {
    async fn open_port(&self, port: u16) -> Result<()> {
        self.journal.push(format!("open {port}"));
        Ok(())
    }

    async fn close_port(&self, port: u16) -> Result<()> {
        self.journal.push(format!("close {port}"));
        Ok(())
    }
}

/// Records commands and answers with scripted exit codes (default 0)
pub struct ScriptedCommandRunner {
    journal: Journal,
    exit_codes: Arc<Mutex<HashMap<String, i32>>>,
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, program: &str, _args: &[String]) -> Result<CommandOutput> {
        self.journal.push(format!("run {program}"));
        let code = self
            .exit_codes
            .lock()
            .unwrap()
            .get(program)
            .copied()
            .unwrap_or(0);

        Ok(if code == 0 {
            CommandOutput::success()
        } else {
            CommandOutput::failure(code, format!("{program} failed"))
        })
    }
}

/// Records database requests and port announcements
pub struct RecordingPublisher {
    journal: Journal,
}

#[async_trait::async_trait]
impl RelationPublisher for RecordingPublisher {
    async fn request_database(&self, kind: BackendKind, name: &str) -> Result<()> {
        self.journal.push(format!("request {} {}", kind.tag(), name));
        Ok(())
    }

    async fn announce_port(&self, port: u16) -> Result<()> {
        self.journal.push(format!("announce {port}"));
        Ok(())
    }
}

/// Binding with a switchable schema probe
pub struct FakeBinding {
    kind: BackendKind,
    schema_present: Arc<AtomicBool>,
    schema_failure: Arc<Mutex<Option<ConnectivityFailureKind>>>,
    probes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl BackendBinding for FakeBinding {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn template_id(&self) -> &str {
        match self.kind {
            BackendKind::Postgresql => POSTGRESQL_TEMPLATE,
            BackendKind::Cassandra => CASSANDRA_TEMPLATE,
        }
    }

    fn bind(&self, raw: &RelationData, unit: &str) -> Result<BackendContext> {
        let field = |k: &str| raw.get(k).unwrap_or_default().to_string();
        match self.kind {
            BackendKind::Postgresql => {
                raw.require(
                    self.kind,
                    &[keys::HOST, keys::PORT, keys::DATABASE, keys::USERNAME, keys::PASSWORD],
                )?;
                Ok(BackendContext::new(self.kind)
                    .with(keys::HOST, field(keys::HOST))
                    .with(keys::DB_PORT, field(keys::PORT))
                    .with(keys::DATABASE, field(keys::DATABASE))
                    .with(keys::USERNAME, field(keys::USERNAME))
                    .with(keys::PASSWORD, field(keys::PASSWORD)))
            }
            BackendKind::Cassandra => {
                raw.require(
                    self.kind,
                    &[keys::CLUSTER_NAME, keys::NODES, keys::USERNAME, keys::PASSWORD],
                )?;
                Ok(BackendContext::new(self.kind)
                    .with(keys::CLUSTER_NAME, field(keys::CLUSTER_NAME))
                    .with(keys::NODES, field(keys::NODES))
                    .with(keys::KEYSPACE, self.database_name(unit))
                    .with(keys::USERNAME, field(keys::USERNAME))
                    .with(keys::PASSWORD, field(keys::PASSWORD)))
            }
        }
    }

    async fn schema_present(&self, _context: &BackendContext) -> Result<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = *self.schema_failure.lock().unwrap() {
            return Err(Error::connectivity(self.kind, kind, "scripted connectivity failure"));
        }
        Ok(self.schema_present.load(Ordering::SeqCst))
    }
}

/// Memory store that also counts flushes
pub struct CountingStore {
    inner: MemoryContextStore,
    flushes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl ContextStore for CountingStore {
    async fn load(&self) -> Result<PersistedContext> {
        self.inner.load().await
    }

    async fn save(&self, context: &PersistedContext) -> Result<()> {
        self.inner.save(context).await
    }

    async fn flush(&self) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.inner.flush().await
    }
}

/// Everything needed to build reconcilers that share recorded effects
///
/// Reconcilers built from the same harness share the journal and the
/// context store, which makes a second reconciler behave like the
/// controller after a process restart.
pub struct Harness {
    pub journal: Journal,
    pub store: MemoryContextStore,
    pub config: ControllerConfig,
    schema_present: Arc<AtomicBool>,
    schema_failure: Arc<Mutex<Option<ConnectivityFailureKind>>>,
    probes: Arc<AtomicUsize>,
    flushes: Arc<AtomicUsize>,
    exit_codes: Arc<Mutex<HashMap<String, i32>>>,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ControllerConfig::new(UNIT);
        config.render.target_path = dir.path().join("conf").join("thingsboard.yml");

        Self {
            journal: Journal::default(),
            store: MemoryContextStore::new(),
            config,
            schema_present: Arc::new(AtomicBool::new(false)),
            schema_failure: Arc::new(Mutex::new(None)),
            probes: Arc::new(AtomicUsize::new(0)),
            flushes: Arc::new(AtomicUsize::new(0)),
            exit_codes: Arc::new(Mutex::new(HashMap::new())),
            _dir: dir,
        }
    }

    /// Build a reconciler wired to this harness
    pub async fn reconciler(&self) -> Reconciler {
        let controller = ServiceController::new(
            self.config.service.clone(),
            Box::new(RecordingServiceManager {
                journal: self.journal.clone(),
            }),
            Box::new(RecordingPortManager {
                journal: self.journal.clone(),
            }),
            Box::new(ScriptedCommandRunner {
                journal: self.journal.clone(),
                exit_codes: Arc::clone(&self.exit_codes),
            }),
        );

        let bindings: Vec<Box<dyn BackendBinding>> = vec![
            Box::new(self.binding(BackendKind::Postgresql)),
            Box::new(self.binding(BackendKind::Cassandra)),
        ];

        Reconciler::new(
            &self.config,
            bindings,
            controller,
            ConfigRenderer::with_builtin_templates(),
            Box::new(CountingStore {
                inner: self.store.clone(),
                flushes: Arc::clone(&self.flushes),
            }),
            Box::new(RecordingPublisher {
                journal: self.journal.clone(),
            }),
        )
        .await
        .expect("reconciler construction succeeds")
    }

    fn binding(&self, kind: BackendKind) -> FakeBinding {
        FakeBinding {
            kind,
            schema_present: Arc::clone(&self.schema_present),
            schema_failure: Arc::clone(&self.schema_failure),
            probes: Arc::clone(&self.probes),
        }
    }

    /// Make the schema probe report existing schema
    pub fn set_schema_present(&self, present: bool) {
        self.schema_present.store(present, Ordering::SeqCst);
    }

    /// Make the schema query fail, or succeed again with `None`
    pub fn fail_schema_query(&self, failure: Option<ConnectivityFailureKind>) {
        *self.schema_failure.lock().unwrap() = failure;
    }

    /// Script a non-zero exit for a program
    pub fn fail_command(&self, program: &str, code: i32) {
        self.exit_codes
            .lock()
            .unwrap()
            .insert(program.to_string(), code);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn target(&self) -> PathBuf {
        self.config.render.target_path.clone()
    }

    /// Rendered configuration, or empty if not written yet
    pub fn rendered(&self) -> String {
        std::fs::read_to_string(self.target()).unwrap_or_default()
    }

    /// Rendered configuration parsed as YAML
    pub fn rendered_yaml(&self) -> serde_yaml::Value {
        serde_yaml::from_str(&self.rendered()).expect("rendered configuration is YAML")
    }

    pub async fn persisted(&self) -> PersistedContext {
        self.store.load().await.unwrap()
    }
}

/// Relation data from the fresh-install scenario
pub fn postgres_relation() -> RelationData {
    RelationData::new()
        .with(keys::HOST, "10.0.0.5")
        .with(keys::PORT, "5432")
        .with(keys::DATABASE, "tb_1")
        .with(keys::USERNAME, "tb")
        .with(keys::PASSWORD, "x")
}

pub fn cassandra_relation() -> RelationData {
    RelationData::new()
        .with(keys::CLUSTER_NAME, "tb-cluster")
        .with(keys::NODES, "10.0.1.1:9042,10.0.1.2:9042")
        .with(keys::USERNAME, "cassandra")
        .with(keys::PASSWORD, "secret")
}

/// Install-ready snapshot with a PostgreSQL relation
pub fn postgres_snapshot() -> Snapshot {
    Snapshot::new()
        .with_install_ready(true)
        .with_backend(BackendKind::Postgresql, postgres_relation())
}

/// Install-ready snapshot with a Cassandra relation
pub fn cassandra_snapshot() -> Snapshot {
    Snapshot::new()
        .with_install_ready(true)
        .with_backend(BackendKind::Cassandra, cassandra_relation())
}

/// A snapshot source the test feeds by hand
pub struct ControlledSnapshotSource {
    current: Snapshot,
    engine_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Snapshot>>>>,
    watch_call_count: Arc<AtomicUsize>,
}

impl ControlledSnapshotSource {
    pub fn new(current: Snapshot) -> (Self, mpsc::UnboundedSender<Snapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            current,
            engine_rx: Arc::new(Mutex::new(Some(rx))),
            watch_call_count: Arc::new(AtomicUsize::new(0)),
        };
        (source, tx)
    }

    pub fn watch_call_count(&self) -> usize {
        self.watch_call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SnapshotSource for ControlledSnapshotSource {
    async fn current(&self) -> Result<Snapshot> {
        Ok(self.current.clone())
    }

    fn watch(&self) -> Pin<Box<dyn Stream<Item = Snapshot> + Send + 'static>> {
        self.watch_call_count.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");
        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}
