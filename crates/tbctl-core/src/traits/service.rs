// # Host Effect Traits
//
// The three seams through which the controller touches the host:
//
// - `ServiceManager`: start/stop/restart the managed service (e.g. systemd)
// - `PortManager`: open/close ports to the outside
// - `CommandRunner`: run install and bootstrap commands
//
// All calls are synchronous from the reconciler's point of view: they return
// once the host has finished, and are never retried by the implementation.

use async_trait::async_trait;

/// Captured result of an external command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with no text
    pub fn success() -> Self {
        Self {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the command exited with status 0
    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Process supervisor for the managed service
///
/// Every method must be idempotent: starting a running service or stopping
/// a stopped one succeeds without side effects.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Start the service
    async fn start(&self, service: &str) -> Result<(), crate::Error>;

    /// Stop the service
    async fn stop(&self, service: &str) -> Result<(), crate::Error>;

    /// Restart the service (start it if stopped)
    async fn restart(&self, service: &str) -> Result<(), crate::Error>;
}

/// Port exposure
#[async_trait]
pub trait PortManager: Send + Sync {
    /// Open a TCP port
    async fn open_port(&self, port: u16) -> Result<(), crate::Error>;

    /// Close a TCP port
    async fn close_port(&self, port: u16) -> Result<(), crate::Error>;
}

/// External command execution
///
/// Implementations report the exit status; they do not interpret it.
/// A failure to spawn at all is returned as `Err`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` to completion
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, crate::Error>;
}
