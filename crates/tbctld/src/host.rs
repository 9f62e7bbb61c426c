//! Host effects for the daemon
//!
//! Production implementations of the core's host seams. All of them shell
//! out through [`ShellCommandRunner`] and report failures as
//! `Error::Service`; none of them retry.

use async_trait::async_trait;
use std::process::Stdio;
use tbctl_core::traits::{CommandOutput, CommandRunner, PortManager, ServiceManager};
use tbctl_core::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// Runs external commands with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ShellCommandRunner;

#[async_trait]
impl CommandRunner for ShellCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("Running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::service(format!("Failed to run {}: {}", program, e)))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run a command and turn a non-zero exit into `Error::Service`
async fn run_checked(runner: &ShellCommandRunner, program: &str, args: Vec<String>) -> Result<()> {
    let output = runner.run(program, &args).await?;
    if output.is_success() {
        Ok(())
    } else {
        Err(Error::service(format!(
            "`{} {}` exited with {:?}: {}",
            program,
            args.join(" "),
            output.code,
            output.stderr.trim()
        )))
    }
}

/// Service supervisor backed by `systemctl`
#[derive(Debug, Clone)]
pub struct SystemctlServiceManager {
    systemctl: String,
    runner: ShellCommandRunner,
}

impl SystemctlServiceManager {
    pub fn new(systemctl: impl Into<String>) -> Self {
        Self {
            systemctl: systemctl.into(),
            runner: ShellCommandRunner,
        }
    }

    async fn systemctl(&self, verb: &str, service: &str) -> Result<()> {
        run_checked(
            &self.runner,
            &self.systemctl,
            vec![verb.to_string(), service.to_string()],
        )
        .await
    }
}

#[async_trait]
impl ServiceManager for SystemctlServiceManager {
    async fn start(&self, service: &str) -> Result<()> {
        self.systemctl("start", service).await
    }

    async fn stop(&self, service: &str) -> Result<()> {
        self.systemctl("stop", service).await
    }

    async fn restart(&self, service: &str) -> Result<()> {
        self.systemctl("restart", service).await
    }
}

/// Port exposure through configurable open/close commands
///
/// Each command is called with a single `<port>/tcp` argument, which matches
/// the `open-port` / `close-port` hook tools.
#[derive(Debug, Clone)]
pub struct CommandPortManager {
    open_command: String,
    close_command: String,
    runner: ShellCommandRunner,
}

impl CommandPortManager {
    pub fn new(open_command: impl Into<String>, close_command: impl Into<String>) -> Self {
        Self {
            open_command: open_command.into(),
            close_command: close_command.into(),
            runner: ShellCommandRunner,
        }
    }
}

#[async_trait]
impl PortManager for CommandPortManager {
    async fn open_port(&self, port: u16) -> Result<()> {
        run_checked(&self.runner, &self.open_command, vec![format!("{}/tcp", port)]).await
    }

    async fn close_port(&self, port: u16) -> Result<()> {
        run_checked(&self.runner, &self.close_command, vec![format!("{}/tcp", port)]).await
    }
}
