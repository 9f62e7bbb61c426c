// # tbctld - ThingsBoard Lifecycle Daemon
//
// A thin integration layer around tbctl-core. It is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Registering backend bindings and context stores
// 4. Wiring the host collaborators (systemctl, port commands, outbox)
// 5. Running the engine until SIGTERM/SIGINT
//
// All lifecycle logic lives in tbctl-core.
//
// ## Configuration
//
// ### Identity and service
// - `TBCTL_UNIT`: Unit identity, e.g. `thingsboard/0` (required)
// - `TBCTL_SERVICE_NAME`: systemd unit (default `thingsboard`)
// - `TBCTL_SERVICE_VERSION`: Package version, install runs once per version
// - `TBCTL_INSTALL_COMMAND`, `TBCTL_BOOTSTRAP_COMMAND`: Whitespace separated
//
// ### Rendering
// - `TBCTL_RENDER_TARGET`: Rendered configuration file
// - `TBCTL_TEMPLATE_DIR`: Directory overriding built-in templates by name
// - `TBCTL_RPC_PORT`: Cluster RPC port exposed with coordination (default 9001)
//
// ### Backends
// - `TBCTL_BACKENDS`: Comma separated subset of `postgresql,cassandra`
// - `TBCTL_CONNECT_TIMEOUT_SECS`: Schema probe timeout
// - `TBCTL_CQLSH_PATH`: `cqlsh` used by the Cassandra probe
//
// ### State and I/O
// - `TBCTL_CONTEXT_STORE_TYPE`: `file` (default) or `memory`
// - `TBCTL_CONTEXT_STORE_PATH`: Context file (default /var/lib/tbctl/context.json)
// - `TBCTL_SNAPSHOT_PATH`: Snapshot JSON, re-read on SIGHUP (required)
// - `TBCTL_OUTBOX_PATH`: Relation outbox (default /var/lib/tbctl/outbox.json)
// - `TBCTL_SYSTEMCTL`, `TBCTL_OPEN_PORT_COMMAND`, `TBCTL_CLOSE_PORT_COMMAND`
//
// ### Engine
// - `TBCTL_MAX_STEPS_PER_PASS`: Action bound per pass
// - `TBCTL_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export TBCTL_UNIT=thingsboard/0
// export TBCTL_SNAPSHOT_PATH=/var/lib/tbctl/snapshot.json
// export TBCTL_BACKENDS=postgresql
//
// tbctld &
// kill -HUP $!   # after rewriting the snapshot
// ```

mod config;
mod host;
mod outbox;
mod source;

use anyhow::{Context, Result};
use std::process::ExitCode;
use tbctl_core::{BackendRegistry, ConfigRenderer, Engine, EngineEvent, Reconciler, ServiceController};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::host::{CommandPortManager, ShellCommandRunner, SystemctlServiceManager};
use crate::outbox::FileRelationPublisher;
use crate::source::FileSnapshotSource;

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum TbctlExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<TbctlExitCode> for ExitCode {
    fn from(code: TbctlExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return TbctlExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return TbctlExitCode::ConfigError.into();
    }

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return TbctlExitCode::ConfigError.into();
    }

    info!("Starting tbctld for {}", config.unit);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return TbctlExitCode::RuntimeError.into();
        }
    };

    rt.block_on(async {
        let engine = match build_engine(&config).await {
            Ok(engine) => engine,
            Err(e) => {
                error!("Startup failed: {:#}", e);
                return TbctlExitCode::ConfigError;
            }
        };

        match run_engine(engine).await {
            Ok(()) => TbctlExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                TbctlExitCode::RuntimeError
            }
        }
    })
    .into()
}

/// Build the registry
fn registry() -> BackendRegistry {
    let registry = BackendRegistry::with_builtin_stores();

    #[cfg(feature = "postgres")]
    {
        info!("Registering PostgreSQL binding");
        tbctl_backend_postgres::register(&registry);
    }

    #[cfg(feature = "cassandra")]
    {
        info!("Registering Cassandra binding");
        tbctl_backend_cassandra::register(&registry);
    }

    registry
}

/// Wire every component named by the configuration
async fn build_engine(config: &Config) -> Result<(Engine, tokio::sync::mpsc::Receiver<EngineEvent>)> {
    let controller_config = config.controller_config();
    controller_config.validate()?;

    let registry = registry();
    let bindings = registry
        .create_bindings(&controller_config.backends)
        .with_context(|| {
            format!(
                "Failed to create backend bindings (registered: {})",
                registry.list_bindings().join(", ")
            )
        })?;
    let store = registry
        .create_context_store(&controller_config.context_store)
        .await
        .context("Failed to open context store")?;

    let mut renderer = ConfigRenderer::with_builtin_templates();
    if let Some(dir) = &controller_config.render.template_dir {
        let loaded = renderer.load_overrides(dir).await?;
        info!("Loaded {} template override(s) from {}", loaded, dir.display());
    }

    let controller = ServiceController::new(
        controller_config.service.clone(),
        Box::new(SystemctlServiceManager::new(&config.systemctl)),
        Box::new(CommandPortManager::new(
            &config.open_port_command,
            &config.close_port_command,
        )),
        Box::new(ShellCommandRunner),
    );

    let publisher = FileRelationPublisher::new(&config.outbox_path).await;

    let reconciler = Reconciler::new(
        &controller_config,
        bindings,
        controller,
        renderer,
        store,
        Box::new(publisher),
    )
    .await?;

    info!("Initial status: {}", reconciler.status());

    Ok(Engine::new(
        Box::new(FileSnapshotSource::new(&config.snapshot_path)),
        reconciler,
        &controller_config.engine,
    ))
}

/// Run the engine until SIGTERM or SIGINT, logging its events
async fn run_engine(
    (mut engine, mut events): (Engine, tokio::sync::mpsc::Receiver<EngineEvent>),
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::StatusChanged { status } => info!("Status changed: {}", status),
                EngineEvent::PassFailed { error, .. } => warn!("Pass failed: {}", error),
                EngineEvent::Stopped { reason } => info!("Engine stopped: {}", reason),
                _ => {}
            }
        }
    });

    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => error!("Signal handling failed, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    engine.run_with_shutdown(shutdown_rx).await?;
    info!("Shut down cleanly");
    Ok(())
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for SIGINT
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    Ok("SIGINT")
}
