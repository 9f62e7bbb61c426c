//! Environment configuration for tbctld
//!
//! Every setting comes from a `TBCTL_*` environment variable. Values are
//! read through a lookup function so tests can supply a map instead of
//! touching the process environment.

use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tbctl_core::config::{BackendConfig, ContextStoreConfig, ControllerConfig};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub unit: String,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
    pub install_command: Option<Vec<String>>,
    pub bootstrap_command: Option<Vec<String>>,
    pub render_target: Option<PathBuf>,
    pub template_dir: Option<PathBuf>,
    pub rpc_port: Option<u16>,
    pub backends: Vec<String>,
    pub connect_timeout_secs: Option<u64>,
    pub cqlsh_path: Option<String>,
    pub context_store_type: String,
    pub context_store_path: Option<String>,
    pub snapshot_path: PathBuf,
    pub outbox_path: PathBuf,
    pub systemctl: String,
    pub open_port_command: String,
    pub close_port_command: String,
    pub max_steps_per_pass: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from a map (tests)
    #[cfg(test)]
    pub fn from_map(vars: &std::collections::HashMap<&str, &str>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            unit: var("TBCTL_UNIT").context("TBCTL_UNIT is required")?,
            service_name: var("TBCTL_SERVICE_NAME"),
            service_version: var("TBCTL_SERVICE_VERSION"),
            install_command: var("TBCTL_INSTALL_COMMAND").map(|s| split_command(&s)),
            bootstrap_command: var("TBCTL_BOOTSTRAP_COMMAND").map(|s| split_command(&s)),
            render_target: var("TBCTL_RENDER_TARGET").map(PathBuf::from),
            template_dir: var("TBCTL_TEMPLATE_DIR").map(PathBuf::from),
            rpc_port: parse(&var, "TBCTL_RPC_PORT")?,
            backends: var("TBCTL_BACKENDS")
                .unwrap_or_else(|| "postgresql,cassandra".to_string())
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            connect_timeout_secs: parse(&var, "TBCTL_CONNECT_TIMEOUT_SECS")?,
            cqlsh_path: var("TBCTL_CQLSH_PATH"),
            context_store_type: var("TBCTL_CONTEXT_STORE_TYPE")
                .unwrap_or_else(|| "file".to_string()),
            context_store_path: var("TBCTL_CONTEXT_STORE_PATH")
                .or_else(|| Some("/var/lib/tbctl/context.json".to_string())),
            snapshot_path: var("TBCTL_SNAPSHOT_PATH")
                .map(PathBuf::from)
                .context("TBCTL_SNAPSHOT_PATH is required")?,
            outbox_path: var("TBCTL_OUTBOX_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/tbctl/outbox.json")),
            systemctl: var("TBCTL_SYSTEMCTL").unwrap_or_else(|| "systemctl".to_string()),
            open_port_command: var("TBCTL_OPEN_PORT_COMMAND")
                .unwrap_or_else(|| "open-port".to_string()),
            close_port_command: var("TBCTL_CLOSE_PORT_COMMAND")
                .unwrap_or_else(|| "close-port".to_string()),
            max_steps_per_pass: parse(&var, "TBCTL_MAX_STEPS_PER_PASS")?,
            log_level: var("TBCTL_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    ///
    /// Everything that can be checked before touching the host is checked
    /// here, so a bad deployment fails at startup with exit code 1.
    pub fn validate(&self) -> Result<()> {
        if self.unit.contains(char::is_whitespace) {
            anyhow::bail!("TBCTL_UNIT must not contain whitespace. Got: '{}'", self.unit);
        }

        if self.backends.is_empty() {
            anyhow::bail!(
                "TBCTL_BACKENDS must name at least one backend. \
                Supported backends: postgresql, cassandra"
            );
        }
        for backend in &self.backends {
            match backend.as_str() {
                "postgresql" | "cassandra" => {}
                other => anyhow::bail!(
                    "TBCTL_BACKENDS entry '{}' is not supported. \
                    Supported backends: postgresql, cassandra",
                    other
                ),
            }
        }

        if self.rpc_port == Some(0) {
            anyhow::bail!("TBCTL_RPC_PORT must be between 1 and 65535");
        }

        if let Some(timeout) = self.connect_timeout_secs
            && !(1..=300).contains(&timeout)
        {
            anyhow::bail!(
                "TBCTL_CONNECT_TIMEOUT_SECS must be between 1 and 300 seconds. Got: {}",
                timeout
            );
        }

        if let Some(steps) = self.max_steps_per_pass
            && !(1..=1000).contains(&steps)
        {
            anyhow::bail!(
                "TBCTL_MAX_STEPS_PER_PASS must be between 1 and 1000. Got: {}",
                steps
            );
        }

        for (name, command) in [
            ("TBCTL_INSTALL_COMMAND", &self.install_command),
            ("TBCTL_BOOTSTRAP_COMMAND", &self.bootstrap_command),
        ] {
            if command.as_ref().is_some_and(|c| c.is_empty()) {
                anyhow::bail!("{} cannot be empty", name);
            }
        }

        match self.context_store_type.as_str() {
            "file" => {
                let path = self.context_store_path.as_deref().unwrap_or_default();
                require_parent(Path::new(path), "TBCTL_CONTEXT_STORE_PATH")?;
            }
            "memory" => {}
            other => anyhow::bail!(
                "TBCTL_CONTEXT_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        }

        require_parent(&self.outbox_path, "TBCTL_OUTBOX_PATH")?;

        if let Some(dir) = &self.template_dir
            && !dir.is_dir()
        {
            anyhow::bail!("TBCTL_TEMPLATE_DIR is not a directory: {}", dir.display());
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "TBCTL_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Build the core controller configuration
    pub fn controller_config(&self) -> ControllerConfig {
        let mut config = ControllerConfig::new(&self.unit);

        if let Some(name) = &self.service_name {
            config.service.name = name.clone();
        }
        if let Some(version) = &self.service_version {
            config.service.version = version.clone();
        }
        if let Some(command) = &self.install_command {
            config.service.install_command = command.clone();
        }
        if let Some(command) = &self.bootstrap_command {
            config.service.bootstrap_command = command.clone();
        }
        if let Some(target) = &self.render_target {
            config.render.target_path = target.clone();
        }
        config.render.template_dir = self.template_dir.clone();
        if let Some(port) = self.rpc_port {
            config.coordination.rpc_port = port;
        }

        config.backends = self
            .backends
            .iter()
            .filter_map(|name| self.backend_config(name))
            .collect();

        config.context_store = match self.context_store_type.as_str() {
            "memory" => ContextStoreConfig::Memory,
            _ => ContextStoreConfig::File {
                path: self.context_store_path.clone().unwrap_or_default(),
            },
        };

        if let Some(steps) = self.max_steps_per_pass {
            config.engine.max_steps_per_pass = steps;
        }

        config
    }

    fn backend_config(&self, name: &str) -> Option<BackendConfig> {
        let connect_timeout_secs = self.connect_timeout_secs.unwrap_or(10);
        match name {
            "postgresql" => Some(BackendConfig::Postgresql {
                connect_timeout_secs,
            }),
            "cassandra" => Some(BackendConfig::Cassandra {
                cqlsh_path: self
                    .cqlsh_path
                    .clone()
                    .unwrap_or_else(|| "cqlsh".to_string()),
                connect_timeout_secs,
            }),
            _ => None,
        }
    }
}

/// Split a command line on whitespace
fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn parse<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|s| {
            s.trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("{} is not valid ({}). Got: {}", key, e, s))
        })
        .transpose()
}

fn require_parent(path: &Path, name: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        anyhow::bail!(
            "{} parent directory does not exist: {}. \
            Create it first: sudo mkdir -p {}",
            name,
            parent.display(),
            parent.display()
        );
    }
    Ok(())
}
