//! Service controller
//!
//! Wraps the host effects the reconciler needs: install the package, run the
//! first-run bootstrap, start/stop/restart the service and expose ports.
//! Every operation is safe to repeat. Install is skipped when the requested
//! version is already installed, and port exposure is tracked so the
//! reconciler can close everything it opened on teardown.

use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ServiceSettings;
use crate::error::{Error, Result};
use crate::traits::{CommandOutput, CommandRunner, PortManager, ServiceManager};

/// Result of [`ServiceController::install`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The install command ran and succeeded
    Installed,
    /// The configured version was already installed; nothing ran
    AlreadyInstalled,
}

/// Install and run the managed service
pub struct ServiceController {
    settings: ServiceSettings,
    services: Box<dyn ServiceManager>,
    ports: Box<dyn PortManager>,
    commands: Box<dyn CommandRunner>,
    exposed: Mutex<BTreeSet<u16>>,
}

impl ServiceController {
    /// Create a controller over the given host seams
    pub fn new(
        settings: ServiceSettings,
        services: Box<dyn ServiceManager>,
        ports: Box<dyn PortManager>,
        commands: Box<dyn CommandRunner>,
    ) -> Self {
        Self {
            settings,
            services,
            ports,
            commands,
            exposed: Mutex::new(BTreeSet::new()),
        }
    }

    /// Version this controller installs
    pub fn version(&self) -> &str {
        &self.settings.version
    }

    /// Service unit name
    pub fn service_name(&self) -> &str {
        &self.settings.name
    }

    /// Install the package unless `installed_version` already matches
    ///
    /// A non-zero exit is returned as `Error::Install`.
    pub async fn install(&self, installed_version: Option<&str>) -> Result<InstallOutcome> {
        if installed_version == Some(self.settings.version.as_str()) {
            debug!("Version {} already installed, skipping install", self.settings.version);
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let command = command_line(&self.settings.install_command);
        info!("Installing {} {}: {}", self.settings.name, self.settings.version, command);

        let output = self.run(&self.settings.install_command).await?;
        if !output.is_success() {
            warn!("Install command failed: {}", output.stderr.trim());
            return Err(Error::Install {
                command,
                code: output.code,
            });
        }

        Ok(InstallOutcome::Installed)
    }

    /// Bootstrap an empty backend, then start the service
    ///
    /// Used on a backend without service-owned schema. The service is not
    /// started when the bootstrap command fails (`Error::Bootstrap`).
    pub async fn first_run(&self) -> Result<()> {
        let command = command_line(&self.settings.bootstrap_command);
        info!("Bootstrapping schema: {}", command);

        let output = self.run(&self.settings.bootstrap_command).await?;
        if !output.is_success() {
            warn!("Bootstrap command failed: {}", output.stderr.trim());
            return Err(Error::Bootstrap {
                command,
                code: output.code,
            });
        }

        self.start().await
    }

    /// Start the service
    pub async fn start(&self) -> Result<()> {
        debug!("Starting {}", self.settings.name);
        self.services.start(&self.settings.name).await
    }

    /// Stop the service
    pub async fn stop(&self) -> Result<()> {
        debug!("Stopping {}", self.settings.name);
        self.services.stop(&self.settings.name).await
    }

    /// Restart the service
    pub async fn restart(&self) -> Result<()> {
        debug!("Restarting {}", self.settings.name);
        self.services.restart(&self.settings.name).await
    }

    /// Open a port
    pub async fn expose_port(&self, port: u16) -> Result<()> {
        self.ports.open_port(port).await?;
        self.exposed.lock().await.insert(port);
        debug!("Exposed port {}", port);
        Ok(())
    }

    /// Close a port
    pub async fn unexpose_port(&self, port: u16) -> Result<()> {
        self.ports.close_port(port).await?;
        self.exposed.lock().await.remove(&port);
        debug!("Unexposed port {}", port);
        Ok(())
    }

    /// Ports opened by this controller and not closed since
    pub async fn exposed_ports(&self) -> Vec<u16> {
        self.exposed.lock().await.iter().copied().collect()
    }

    async fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::config("Empty command line"))?;
        self.commands.run(program, args).await
    }
}

fn command_line(argv: &[String]) -> String {
    argv.join(" ")
}
