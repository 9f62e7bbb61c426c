//! Service lifecycle reconciler
//!
//! The reconciler owns the lifecycle: it holds the [`ConditionSet`], the
//! persisted context and the status, and is the only writer of the service
//! configuration file.
//!
//! ## Pass structure
//!
//! ```text
//! snapshot ──► observe (raise external conditions)
//!                 │
//!                 ▼
//!              plan() ──► Action ──► apply ──► status
//!                 ▲                     │
//!                 └──── until Idle ─────┘
//! ```
//!
//! [`Reconciler::plan`] is a pure function of the snapshot and the current
//! state. [`Reconciler::step`] applies at most one action;
//! [`Reconciler::reconcile`] steps until the plan is [`Action::Idle`].
//! Delivering the same snapshot again finds nothing to do, so repeated
//! delivery is harmless.
//!
//! ## Failures
//!
//! A failed action ends the pass. Conditions it would have raised stay
//! unset and the status names the failure. There is no retry loop: the next
//! snapshot delivery plans the same action again.

mod action;
mod status;

pub use action::Action;
pub use status::{BlockedReason, LifecycleState, Status};

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::backend::{BackendContext, BackendKind};
use crate::conditions::{Condition, ConditionSet};
use crate::config::ControllerConfig;
use crate::controller::{InstallOutcome, ServiceController};
use crate::error::{Error, Result};
use crate::render::{ConfigRenderer, RenderContext, keys};
use crate::snapshot::Snapshot;
use crate::traits::{BackendBinding, ContextStore, PersistedContext, RelationPublisher};

/// Result of one reconciliation pass
#[derive(Debug)]
pub struct PassOutcome {
    /// Actions applied, in order
    pub applied: Vec<Action>,
    /// Status at the end of the pass
    pub status: Status,
    /// Error that ended the pass early
    pub error: Option<Error>,
}

impl PassOutcome {
    /// Whether the pass settled without error
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Declarative lifecycle reconciler
pub struct Reconciler {
    unit: String,
    bindings: BTreeMap<BackendKind, Box<dyn BackendBinding>>,
    controller: ServiceController,
    renderer: ConfigRenderer,
    store: Box<dyn ContextStore>,
    publisher: Box<dyn RelationPublisher>,
    target_path: PathBuf,
    rpc_port: u16,
    max_steps: usize,

    conditions: ConditionSet,
    persisted: PersistedContext,
    /// Backend the database was requested from in this session
    requested: Option<BackendKind>,
    /// Backend a previous session left the service running against
    resumed: Option<BackendKind>,
    /// Context bound in this session
    active: Option<BackendContext>,
    /// Peers rendered into the configuration
    coordination: Option<Vec<String>>,
    /// Port last announced on the transport relation
    announced: Option<u16>,
    status: Status,
}

impl Reconciler {
    /// Create a reconciler and load the persisted context
    ///
    /// The renderer must hold a template for every binding.
    pub async fn new(
        config: &ControllerConfig,
        bindings: Vec<Box<dyn BackendBinding>>,
        controller: ServiceController,
        renderer: ConfigRenderer,
        store: Box<dyn ContextStore>,
        publisher: Box<dyn RelationPublisher>,
    ) -> Result<Self> {
        config.validate()?;

        let mut by_kind = BTreeMap::new();
        for binding in bindings {
            let kind = binding.kind();
            if !renderer.has_template(binding.template_id()) {
                return Err(Error::config(format!(
                    "No template '{}' for the {} binding",
                    binding.template_id(),
                    kind
                )));
            }
            if by_kind.insert(kind, binding).is_some() {
                return Err(Error::config(format!("Duplicate {} binding", kind)));
            }
        }
        if by_kind.is_empty() {
            return Err(Error::config("No backend bindings"));
        }

        let persisted = store.load().await?;
        let mut conditions = ConditionSet::new();
        if persisted.installed_version.as_deref() == Some(controller.version()) {
            conditions.set(Condition::Installed)?;
        }

        // A bound backend with an applied port means the service may still
        // be running from before the restart
        let resumed = persisted
            .applied_port
            .and(persisted.backend.as_ref())
            .map(BackendContext::kind);

        let mut reconciler = Self {
            unit: config.unit.clone(),
            bindings: by_kind,
            controller,
            renderer,
            store,
            publisher,
            target_path: config.render.target_path.clone(),
            rpc_port: config.coordination.rpc_port,
            max_steps: config.engine.max_steps_per_pass,
            conditions,
            persisted,
            requested: None,
            resumed,
            active: None,
            coordination: None,
            announced: None,
            status: Status::default(),
        };
        reconciler.status = reconciler.derive_status(&Snapshot::new());

        debug!(
            "Reconciler for {} loaded context: installed={:?}, backend={:?}, port={:?}",
            reconciler.unit,
            reconciler.persisted.installed_version,
            reconciler.persisted.backend.as_ref().map(|b| b.kind()),
            reconciler.persisted.applied_port
        );
        Ok(reconciler)
    }

    /// Current status
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Current conditions
    pub fn conditions(&self) -> &ConditionSet {
        &self.conditions
    }

    /// Backend bound in this session
    pub fn active_backend(&self) -> Option<BackendKind> {
        self.active.as_ref().map(BackendContext::kind)
    }

    /// In-memory copy of the persisted context
    pub fn persisted(&self) -> &PersistedContext {
        &self.persisted
    }

    /// Ports currently exposed by the controller
    pub async fn exposed_ports(&self) -> Vec<u16> {
        self.controller.exposed_ports().await
    }

    /// Flush the context store
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }

    /// Decide the next action for a snapshot
    ///
    /// Pure: reads state, changes nothing. External conditions are taken
    /// from the snapshot directly, so the plan does not depend on whether
    /// they have been raised yet.
    pub fn plan(&self, snapshot: &Snapshot) -> Action {
        let c = &self.conditions;

        if self.check_port(snapshot.port).is_err() {
            return Action::Idle;
        }

        if !c.contains(Condition::Installed) {
            return if snapshot.install_ready {
                Action::Install
            } else {
                Action::Idle
            };
        }

        let running = self.requested.or(self.resumed);

        if snapshot.eligible_backends().len() > 1 {
            return if running.is_some() {
                Action::Conflict
            } else {
                Action::Idle
            };
        }

        if let Some(kind) = running
            && !snapshot.has_backend(kind)
        {
            return Action::BackendLost { kind };
        }

        let Ok(Some(kind)) = snapshot.select_backend() else {
            return Action::Idle;
        };
        let Some(binding) = self.bindings.get(&kind) else {
            return Action::Idle;
        };

        if !c.contains(Condition::BackendRequested) {
            return Action::RequestBackend { kind };
        }
        if !c.contains(Condition::BackendConfigured) {
            return Action::BindBackend { kind };
        }
        if !c.contains(Condition::Started) {
            return Action::Start { kind };
        }

        if let Some(from) = self.persisted.applied_port
            && from != snapshot.port
        {
            return Action::ApplyPort {
                from,
                to: snapshot.port,
            };
        }

        if let Some(raw) = snapshot.backend(kind)
            && let Ok(bound) = binding.bind(raw, &self.unit)
            && self.active.as_ref() != Some(&bound)
        {
            return Action::Rebind { kind };
        }

        match snapshot.coordination_peers().filter(|p| !p.is_empty()) {
            Some(peers) if self.coordination.as_ref() != Some(&peers) => {
                return Action::EnableCoordination { peers };
            }
            None if self.coordination.is_some() => return Action::DisableCoordination,
            _ => {}
        }

        if snapshot.transport {
            if self.announced != self.persisted.applied_port
                && let Some(port) = self.persisted.applied_port
            {
                return Action::AnnounceTransport { port };
            }
        } else if self.announced.is_some() {
            return Action::WithdrawTransport;
        }

        Action::Idle
    }

    /// Apply at most one action for a snapshot
    ///
    /// Returns the action that was applied, or [`Action::Idle`] once the
    /// snapshot needs nothing more.
    pub async fn step(&mut self, snapshot: &Snapshot) -> Result<Action> {
        if let Err(e) = self.check_port(snapshot.port) {
            warn!("Refusing snapshot: {}", e);
            self.status = Status::from_error(&e);
            return Err(e);
        }

        self.observe(snapshot)?;
        let action = self.plan(snapshot);

        if action.is_idle() {
            self.settle(snapshot);
        } else {
            info!("Applying: {}", action);
            if let Err(e) = self.apply(&action, snapshot).await {
                if e.is_blocking_only() {
                    info!("Blocked while applying '{}': {}", action, e);
                } else {
                    warn!("Failed to apply '{}': {}", action, e);
                }
                self.status = Status::from_error(&e);
                return Err(e);
            }
        }

        self.status = self.derive_status(snapshot);
        Ok(action)
    }

    /// Run a full pass: step until idle, an error, or the step limit
    pub async fn reconcile(&mut self, snapshot: &Snapshot) -> PassOutcome {
        let mut applied = Vec::new();

        while applied.len() < self.max_steps || self.plan(snapshot).is_idle() {
            match self.step(snapshot).await {
                Ok(Action::Idle) => {
                    debug!("Pass settled after {} actions: {}", applied.len(), self.status);
                    return PassOutcome {
                        applied,
                        status: self.status.clone(),
                        error: None,
                    };
                }
                Ok(action) => applied.push(action),
                Err(error) => {
                    return PassOutcome {
                        applied,
                        status: self.status.clone(),
                        error: Some(error),
                    };
                }
            }
        }

        let error = Error::other(format!(
            "Pass did not settle within {} steps",
            self.max_steps
        ));
        warn!("{}", error);
        self.status = Status::from_error(&error);
        PassOutcome {
            applied,
            status: self.status.clone(),
            error: Some(error),
        }
    }

    /// Raise the external conditions the snapshot reports as present
    fn observe(&mut self, snapshot: &Snapshot) -> Result<()> {
        for (condition, present) in external_conditions(snapshot) {
            if present {
                self.conditions.set(condition)?;
            }
        }
        Ok(())
    }

    /// Drop external conditions the snapshot no longer reports
    fn settle(&mut self, snapshot: &Snapshot) {
        for (condition, present) in external_conditions(snapshot) {
            if !present {
                let cleared = self.conditions.clear(condition);
                if !cleared.is_empty() {
                    debug!("Cleared {:?}", cleared);
                }
            }
        }
    }

    async fn apply(&mut self, action: &Action, snapshot: &Snapshot) -> Result<()> {
        match action {
            Action::Idle => Ok(()),
            Action::Install => self.install().await,
            Action::RequestBackend { kind } => self.request_backend(*kind).await,
            Action::BindBackend { kind } => self.bind_backend(*kind, snapshot).await,
            Action::Start { kind } => self.start(*kind, snapshot.port).await,
            Action::ApplyPort { from, to } => self.apply_port(*from, *to).await,
            Action::Rebind { kind } => self.rebind(*kind, snapshot).await,
            Action::EnableCoordination { peers } => self.enable_coordination(peers).await,
            Action::DisableCoordination => self.disable_coordination().await,
            Action::AnnounceTransport { port } => self.announce(*port).await,
            Action::WithdrawTransport => {
                self.announced = None;
                self.conditions.clear(Condition::TransportAvailable);
                Ok(())
            }
            Action::BackendLost { kind } => {
                self.teardown().await?;
                self.conditions.clear(kind.availability_condition());
                info!("{} relation lost; keeping persisted context for reconnection", kind);
                Ok(())
            }
            Action::Conflict => {
                self.teardown().await?;
                warn!("Both backends are related; service stopped until one leaves");
                Ok(())
            }
        }
    }

    async fn install(&mut self) -> Result<()> {
        let outcome = self
            .controller
            .install(self.persisted.installed_version.as_deref())
            .await?;

        if outcome == InstallOutcome::Installed {
            let mut next = self.persisted.clone();
            next.installed_version = Some(self.controller.version().to_string());
            next.first_run = true;
            self.persist(next).await?;
        }

        self.conditions.set(Condition::Installed)?;
        Ok(())
    }

    async fn request_backend(&mut self, kind: BackendKind) -> Result<()> {
        let name = self.binding(kind)?.database_name(&self.unit);
        self.publisher.request_database(kind, &name).await?;
        debug!("Requested {} database '{}'", kind, name);

        self.conditions.set(Condition::BackendRequested)?;
        self.requested = Some(kind);
        Ok(())
    }

    async fn bind_backend(&mut self, kind: BackendKind, snapshot: &Snapshot) -> Result<()> {
        let context = self.bind(kind, snapshot)?;
        self.write_config(&context, snapshot.port, None).await?;

        let mut next = self.persisted.clone();
        next.backend = Some(context.clone());
        self.persist(next).await?;

        self.active = Some(context);
        self.conditions.set(Condition::BackendConfigured)?;
        Ok(())
    }

    async fn start(&mut self, kind: BackendKind, port: u16) -> Result<()> {
        let context = self
            .active
            .clone()
            .ok_or_else(|| Error::other(format!("No bound {} context to start with", kind)))?;

        // Port may have moved since the bind
        self.write_config(&context, port, None).await?;

        let schema_present = self.binding(kind)?.schema_present(&context).await?;
        if schema_present {
            if self.persisted.first_run {
                info!("{} already holds the schema; skipping bootstrap", kind);
            } else {
                info!("{} already holds the schema; restarting", kind);
            }
            self.controller.restart().await?;
        } else {
            if !self.persisted.first_run {
                warn!("{} schema is gone since the last start; bootstrapping again", kind);
            }
            info!("{} has no schema; running first-run bootstrap", kind);
            self.controller.first_run().await?;
        }

        // Left open by a previous session on another port
        if let Some(previous) = self.persisted.applied_port
            && previous != port
        {
            self.controller.unexpose_port(previous).await?;
        }
        self.controller.expose_port(port).await?;

        let mut next = self.persisted.clone();
        next.first_run = false;
        next.applied_port = Some(port);
        self.persist(next).await?;

        self.resumed = None;
        self.conditions.set(Condition::Started)?;
        Ok(())
    }

    async fn apply_port(&mut self, from: u16, to: u16) -> Result<()> {
        self.conditions.set(Condition::ConfigChanged)?;

        let context = self
            .persisted
            .backend
            .clone()
            .ok_or_else(|| Error::other("No persisted backend context to re-render"))?;
        let coordination = self.coordination.clone();

        self.write_config(&context, to, coordination.as_deref()).await?;
        self.controller.unexpose_port(from).await?;
        self.controller.expose_port(to).await?;
        self.controller.restart().await?;

        let mut next = self.persisted.clone();
        next.applied_port = Some(to);
        self.persist(next).await?;

        self.conditions.clear(Condition::ConfigChanged);
        info!("Service moved from port {} to {}", from, to);
        Ok(())
    }

    async fn rebind(&mut self, kind: BackendKind, snapshot: &Snapshot) -> Result<()> {
        let context = self.bind(kind, snapshot)?;
        let port = self.applied_port()?;
        let coordination = self.coordination.clone();

        self.write_config(&context, port, coordination.as_deref()).await?;

        let mut next = self.persisted.clone();
        next.backend = Some(context.clone());
        self.persist(next).await?;

        self.active = Some(context);
        self.controller.restart().await
    }

    async fn enable_coordination(&mut self, peers: &[String]) -> Result<()> {
        let context = self.rendered_context()?;
        let port = self.applied_port()?;

        self.write_config(&context, port, Some(peers)).await?;
        if self.coordination.is_none() {
            self.controller.expose_port(self.rpc_port).await?;
        }
        self.controller.restart().await?;

        self.coordination = Some(peers.to_vec());
        self.conditions.set(Condition::CoordinationEnabled)?;
        info!("Coordination enabled with {} peers", peers.len());
        Ok(())
    }

    async fn disable_coordination(&mut self) -> Result<()> {
        let context = self.rendered_context()?;
        let port = self.applied_port()?;

        self.write_config(&context, port, None).await?;
        self.controller.unexpose_port(self.rpc_port).await?;

        self.coordination = None;
        self.conditions.clear(Condition::CoordinationReady);
        info!("Coordination disabled");
        Ok(())
    }

    async fn announce(&mut self, port: u16) -> Result<()> {
        self.publisher.announce_port(port).await?;
        self.announced = Some(port);
        self.conditions.set(Condition::TransportAnnounced)?;
        Ok(())
    }

    /// Stop the service, close its ports, drop session state
    ///
    /// The bound backend context is kept for reconnection; the applied port
    /// is forgotten since nothing listens on it any more.
    async fn teardown(&mut self) -> Result<()> {
        if self.conditions.contains(Condition::BackendConfigured) || self.resumed.is_some() {
            self.controller.stop().await?;
        }

        let mut ports: BTreeSet<u16> = self.controller.exposed_ports().await.into_iter().collect();
        ports.extend(self.persisted.applied_port);
        for port in ports {
            self.controller.unexpose_port(port).await?;
        }

        let mut next = self.persisted.clone();
        next.applied_port = None;
        self.persist(next).await?;

        self.requested = None;
        self.resumed = None;
        self.active = None;
        self.coordination = None;
        self.announced = None;

        let cleared = self.conditions.clear(Condition::BackendRequested);
        debug!("Teardown cleared {:?}", cleared);
        Ok(())
    }

    fn binding(&self, kind: BackendKind) -> Result<&dyn BackendBinding> {
        self.bindings
            .get(&kind)
            .map(|b| b.as_ref())
            .ok_or_else(|| Error::config(format!("No {} binding registered", kind)))
    }

    fn bind(&self, kind: BackendKind, snapshot: &Snapshot) -> Result<BackendContext> {
        let raw = snapshot
            .backend(kind)
            .ok_or_else(|| Error::binding_unavailable(kind, ["relation"]))?;
        self.binding(kind)?.bind(raw, &self.unit)
    }

    fn rendered_context(&self) -> Result<BackendContext> {
        self.persisted
            .backend
            .clone()
            .ok_or_else(|| Error::other("No persisted backend context to re-render"))
    }

    /// The operator port must be usable and distinct from the RPC port
    fn check_port(&self, port: u16) -> Result<()> {
        if port == 0 {
            return Err(Error::config("Service port 0 is not a valid port"));
        }
        if port == self.rpc_port {
            return Err(Error::config(format!(
                "Service port {} collides with the coordination RPC port",
                port
            )));
        }
        Ok(())
    }

    fn applied_port(&self) -> Result<u16> {
        self.persisted
            .applied_port
            .ok_or_else(|| Error::other("No applied port recorded"))
    }

    async fn write_config(
        &self,
        backend: &BackendContext,
        port: u16,
        coordination: Option<&[String]>,
    ) -> Result<()> {
        let template_id = self.binding(backend.kind())?.template_id();
        let context = RenderContext::from_backend(backend)
            .overlay(keys::PORT, port)
            .overlay(keys::COORDINATION_ENABLED, coordination.is_some())
            .overlay(
                keys::COORDINATION_NODES,
                coordination.map(|peers| peers.join(",")).unwrap_or_default(),
            )
            .overlay(keys::RPC_PORT, self.rpc_port);

        let changed = self
            .renderer
            .render_to(template_id, &context, &self.target_path)
            .await?;
        if changed {
            info!(
                "Rendered {} from {} (port {})",
                self.target_path.display(),
                template_id,
                port
            );
        }
        Ok(())
    }

    /// Save first, then adopt: a failed save leaves memory and disk agreeing
    async fn persist(&mut self, next: PersistedContext) -> Result<()> {
        if next.same_content(&self.persisted) {
            return Ok(());
        }
        self.store.save(&next).await?;
        self.persisted = next;
        Ok(())
    }

    fn derive_status(&self, snapshot: &Snapshot) -> Status {
        let c = &self.conditions;

        if !c.contains(Condition::Installed) {
            return if snapshot.install_ready {
                Status::new(LifecycleState::Maintenance, "Installing")
            } else {
                Status::new(
                    LifecycleState::Uninstalled,
                    "Waiting for install prerequisites",
                )
            };
        }

        if snapshot.eligible_backends().len() > 1 {
            return Status::from_error(&Error::BackendConflict);
        }

        if c.contains(Condition::Started)
            && let Some(backend) = self.active_backend()
        {
            return Status::new(
                LifecycleState::Active {
                    backend,
                    coordination: c.contains(Condition::CoordinationEnabled),
                },
                "",
            );
        }

        match snapshot.select_backend() {
            Ok(Some(kind)) if !self.bindings.contains_key(&kind) => Status::blocked(
                BlockedReason::BackendUnavailable,
                format!("No {} binding is registered", kind),
            ),
            Ok(Some(kind)) => {
                Status::new(LifecycleState::Maintenance, format!("Binding {}", kind))
            }
            _ => Status::blocked(
                BlockedReason::NoBackend,
                "Waiting for a PostgreSQL or Cassandra relation",
            ),
        }
    }
}

fn external_conditions(snapshot: &Snapshot) -> [(Condition, bool); 4] {
    [
        (Condition::SqlConnected, snapshot.sql.is_some()),
        (Condition::WideConnected, snapshot.wide.is_some()),
        (
            Condition::CoordinationReady,
            snapshot
                .coordination_peers()
                .is_some_and(|peers| !peers.is_empty()),
        ),
        (Condition::TransportAvailable, snapshot.transport),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RelationData, keys as backend_keys};
    use crate::state::MemoryContextStore;
    use crate::traits::{CommandOutput, CommandRunner, PortManager, ServiceManager};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct Quiet;

    #[async_trait]
    impl ServiceManager for Quiet {
        async fn start(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn stop(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn restart(&self, _: &str) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl PortManager for Quiet {
        async fn open_port(&self, _: u16) -> Result<()> {
            Ok(())
        }
        async fn close_port(&self, _: u16) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl CommandRunner for Quiet {
        async fn run(&self, _: &str, _: &[String]) -> Result<CommandOutput> {
            Ok(CommandOutput::success())
        }
    }

    #[async_trait]
    impl RelationPublisher for Quiet {
        async fn request_database(&self, _: BackendKind, _: &str) -> Result<()> {
            Ok(())
        }
        async fn announce_port(&self, _: u16) -> Result<()> {
            Ok(())
        }
    }

    struct SqlBinding {
        schema: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BackendBinding for SqlBinding {
        fn kind(&self) -> BackendKind {
            BackendKind::Postgresql
        }

        fn template_id(&self) -> &str {
            crate::render::POSTGRESQL_TEMPLATE
        }

        fn bind(&self, raw: &RelationData, _unit: &str) -> Result<BackendContext> {
            raw.require(BackendKind::Postgresql, &[backend_keys::HOST])?;
            Ok(BackendContext::new(BackendKind::Postgresql)
                .with(backend_keys::HOST, raw.get(backend_keys::HOST).unwrap_or_default())
                .with(backend_keys::DB_PORT, "5432")
                .with(backend_keys::DATABASE, "tb")
                .with(backend_keys::USERNAME, "tb")
                .with(backend_keys::PASSWORD, "x"))
        }

        async fn schema_present(&self, _: &BackendContext) -> Result<bool> {
            Ok(self.schema.load(Ordering::SeqCst))
        }
    }

    async fn reconciler(dir: &TempDir) -> Reconciler {
        let mut config = ControllerConfig::new("thingsboard/0");
        config.render.target_path = dir.path().join("thingsboard.yml");

        let controller = ServiceController::new(
            config.service.clone(),
            Box::new(Quiet),
            Box::new(Quiet),
            Box::new(Quiet),
        );
        Reconciler::new(
            &config,
            vec![Box::new(SqlBinding {
                schema: Arc::new(AtomicBool::new(false)),
            })],
            controller,
            ConfigRenderer::with_builtin_templates(),
            Box::new(MemoryContextStore::new()),
            Box::new(Quiet),
        )
        .await
        .unwrap()
    }

    fn sql_snapshot() -> Snapshot {
        Snapshot::new().with_install_ready(true).with_backend(
            BackendKind::Postgresql,
            RelationData::new().with(backend_keys::HOST, "10.0.0.5"),
        )
    }

    #[tokio::test]
    async fn test_plan_walks_the_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(&dir).await;
        let snap = sql_snapshot();

        let mut seen = Vec::new();
        loop {
            let action = r.step(&snap).await.unwrap();
            if action.is_idle() {
                break;
            }
            seen.push(action);
        }

        assert_eq!(
            seen,
            vec![
                Action::Install,
                Action::RequestBackend {
                    kind: BackendKind::Postgresql
                },
                Action::BindBackend {
                    kind: BackendKind::Postgresql
                },
                Action::Start {
                    kind: BackendKind::Postgresql
                },
            ]
        );
        assert_eq!(r.status().to_string(), "Active (PostgreSQL)");
    }

    #[tokio::test]
    async fn test_plan_is_pure() {
        let dir = tempfile::tempdir().unwrap();
        let r = reconciler(&dir).await;
        let snap = sql_snapshot();

        assert_eq!(r.plan(&snap), Action::Install);
        assert_eq!(r.plan(&snap), Action::Install);
        assert!(r.conditions().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_install_prerequisites() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(&dir).await;

        let outcome = r.reconcile(&Snapshot::new()).await;
        assert!(outcome.applied.is_empty());
        assert_eq!(outcome.status.state, LifecycleState::Uninstalled);
    }

    #[tokio::test]
    async fn test_missing_fields_block_without_step_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(&dir).await;
        let snap = Snapshot::new()
            .with_install_ready(true)
            .with_backend(BackendKind::Postgresql, RelationData::new());

        let outcome = r.reconcile(&snap).await;
        assert!(matches!(outcome.error, Some(Error::BindingUnavailable { .. })));
        assert_eq!(
            outcome.status.state.blocked_reason(),
            Some(BlockedReason::BackendUnavailable)
        );
        assert!(!r.conditions().contains(Condition::BackendConfigured));
        assert!(r.conditions().contains(Condition::BackendRequested));
    }

    #[tokio::test]
    async fn test_unregistered_backend_stays_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(&dir).await;
        let snap = Snapshot::new()
            .with_install_ready(true)
            .with_backend(BackendKind::Cassandra, RelationData::new());

        let outcome = r.reconcile(&snap).await;
        assert_eq!(outcome.applied, vec![Action::Install]);
        assert_eq!(
            outcome.status.state.blocked_reason(),
            Some(BlockedReason::BackendUnavailable)
        );
    }

    #[tokio::test]
    async fn test_transport_announce_and_withdraw() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = reconciler(&dir).await;

        r.reconcile(&sql_snapshot()).await;
        let outcome = r.reconcile(&sql_snapshot().with_transport(true)).await;
        assert_eq!(outcome.applied, vec![Action::AnnounceTransport { port: 8080 }]);
        assert!(r.conditions().contains(Condition::TransportAnnounced));

        let outcome = r.reconcile(&sql_snapshot()).await;
        assert_eq!(outcome.applied, vec![Action::WithdrawTransport]);
        assert!(!r.conditions().contains(Condition::TransportAvailable));
    }
}
