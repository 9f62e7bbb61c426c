//! Configuration types for tbctl
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Unit identity, e.g. `thingsboard/0`
    pub unit: String,

    /// Managed service settings
    pub service: ServiceSettings,

    /// Configuration rendering settings
    pub render: RenderSettings,

    /// Coordination layer settings
    #[serde(default)]
    pub coordination: CoordinationSettings,

    /// Backend bindings to register, one per supported database
    pub backends: Vec<BackendConfig>,

    /// Persisted context store
    #[serde(default)]
    pub context_store: ContextStoreConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ControllerConfig {
    /// Create a configuration with defaults for the given unit
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            service: ServiceSettings::default(),
            render: RenderSettings::default(),
            coordination: CoordinationSettings::default(),
            backends: vec![
                BackendConfig::Postgresql {
                    connect_timeout_secs: default_connect_timeout_secs(),
                },
                BackendConfig::Cassandra {
                    cqlsh_path: default_cqlsh_path(),
                    connect_timeout_secs: default_connect_timeout_secs(),
                },
            ],
            context_store: ContextStoreConfig::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.unit.trim().is_empty() {
            return Err(crate::Error::config("Unit name cannot be empty"));
        }

        if self.backends.is_empty() {
            return Err(crate::Error::config("No backends configured"));
        }

        for backend in &self.backends {
            backend.validate()?;
        }

        self.service.validate()?;
        self.render.validate()?;

        if self.coordination.rpc_port == 0 {
            return Err(crate::Error::config("Coordination RPC port must be > 0"));
        }

        if self.engine.max_steps_per_pass == 0 {
            return Err(crate::Error::config("max_steps_per_pass must be > 0"));
        }

        Ok(())
    }
}

/// Managed service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Service unit name known to the process supervisor
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Package version; install runs at most once per version
    #[serde(default = "default_service_version")]
    pub version: String,

    /// Install command (program followed by arguments)
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,

    /// First-run bootstrap command, run before the first start on an empty backend
    #[serde(default = "default_bootstrap_command")]
    pub bootstrap_command: Vec<String>,
}

impl ServiceSettings {
    /// Validate the service settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::config("Service name cannot be empty"));
        }
        if self.version.is_empty() {
            return Err(crate::Error::config("Service version cannot be empty"));
        }
        if self.install_command.first().is_none_or(|p| p.is_empty()) {
            return Err(crate::Error::config("Install command cannot be empty"));
        }
        if self.bootstrap_command.first().is_none_or(|p| p.is_empty()) {
            return Err(crate::Error::config("Bootstrap command cannot be empty"));
        }
        Ok(())
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            version: default_service_version(),
            install_command: default_install_command(),
            bootstrap_command: default_bootstrap_command(),
        }
    }
}

/// Configuration rendering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Path of the rendered service configuration
    #[serde(default = "default_target_path")]
    pub target_path: PathBuf,

    /// Directory whose files override built-in templates by name
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
}

impl RenderSettings {
    /// Validate the render settings
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.target_path.as_os_str().is_empty() {
            return Err(crate::Error::config("Render target path cannot be empty"));
        }
        if self.target_path.file_name().is_none() {
            return Err(crate::Error::config(format!(
                "Render target path has no file name: {}",
                self.target_path.display()
            )));
        }
        Ok(())
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            target_path: default_target_path(),
            template_dir: None,
        }
    }
}

/// Coordination layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationSettings {
    /// Port exposed for cluster RPC while coordination is enabled
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
}

impl Default for CoordinationSettings {
    fn default() -> Self {
        Self {
            rpc_port: default_rpc_port(),
        }
    }
}

/// Backend binding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    /// PostgreSQL binding
    Postgresql {
        /// Timeout for the schema probe connection
        #[serde(default = "default_connect_timeout_secs")]
        connect_timeout_secs: u64,
    },

    /// Cassandra binding
    Cassandra {
        /// Path to the `cqlsh` executable used for the schema probe
        #[serde(default = "default_cqlsh_path")]
        cqlsh_path: String,
        /// Timeout for the schema probe connection
        #[serde(default = "default_connect_timeout_secs")]
        connect_timeout_secs: u64,
    },

    /// Custom binding
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl BackendConfig {
    /// Validate the backend configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            BackendConfig::Postgresql { connect_timeout_secs } => {
                if *connect_timeout_secs == 0 {
                    return Err(crate::Error::config(
                        "PostgreSQL connect timeout must be > 0",
                    ));
                }
                Ok(())
            }
            BackendConfig::Cassandra {
                cqlsh_path,
                connect_timeout_secs,
            } => {
                if cqlsh_path.is_empty() {
                    return Err(crate::Error::config("cqlsh path cannot be empty"));
                }
                if *connect_timeout_secs == 0 {
                    return Err(crate::Error::config("Cassandra connect timeout must be > 0"));
                }
                Ok(())
            }
            BackendConfig::Custom { factory, config } => {
                if factory.is_empty() {
                    return Err(crate::Error::config("Custom backend factory cannot be empty"));
                }
                if config.is_null() {
                    return Err(crate::Error::config("Custom backend config cannot be null"));
                }
                Ok(())
            }
        }
    }

    /// Get the binding type name
    pub fn type_name(&self) -> &str {
        match self {
            BackendConfig::Postgresql { .. } => "postgresql",
            BackendConfig::Cassandra { .. } => "cassandra",
            BackendConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Persisted context store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextStoreConfig {
    /// File-based store
    File {
        /// Path to the context file
        path: String,
    },

    /// In-memory store (not persistent)
    #[default]
    Memory,

    /// Custom store
    Custom {
        /// Factory name to use
        factory: String,
        /// Custom configuration data
        config: serde_json::Value,
    },
}

impl ContextStoreConfig {
    /// Get the store type name
    pub fn type_name(&self) -> &str {
        match self {
            ContextStoreConfig::File { .. } => "file",
            ContextStoreConfig::Memory => "memory",
            ContextStoreConfig::Custom { factory, .. } => factory,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Upper bound on actions applied within one reconciliation pass
    ///
    /// A well-formed transition table settles in a handful of steps; hitting
    /// this bound ends the pass with an error instead of spinning.
    #[serde(default = "default_max_steps_per_pass")]
    pub max_steps_per_pass: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: default_event_channel_capacity(),
            max_steps_per_pass: default_max_steps_per_pass(),
        }
    }
}

fn default_service_name() -> String {
    "thingsboard".to_string()
}

fn default_service_version() -> String {
    "1.3.1".to_string()
}

fn default_install_command() -> Vec<String> {
    vec![
        "dpkg".to_string(),
        "-i".to_string(),
        "/opt/thingsboard/thingsboard-1.3.1.deb".to_string(),
    ]
}

fn default_bootstrap_command() -> Vec<String> {
    vec!["/usr/share/thingsboard/bin/install/install.sh".to_string()]
}

fn default_target_path() -> PathBuf {
    PathBuf::from("/etc/thingsboard/conf/thingsboard.yml")
}

fn default_rpc_port() -> u16 {
    9001
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_cqlsh_path() -> String {
    "cqlsh".to_string()
}

fn default_event_channel_capacity() -> usize {
    100
}

fn default_max_steps_per_pass() -> usize {
    32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ControllerConfig::new("thingsboard/0");
        config.validate().unwrap();
        assert_eq!(config.backends.len(), 2);
    }

    #[test]
    fn test_empty_unit_rejected() {
        let config = ControllerConfig::new(" ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_config_tagging() {
        let json = r#"{"type": "cassandra", "cqlsh_path": "/usr/bin/cqlsh"}"#;
        let backend: BackendConfig = serde_json::from_str(json).unwrap();
        assert_eq!(backend.type_name(), "cassandra");
        match backend {
            BackendConfig::Cassandra {
                connect_timeout_secs,
                ..
            } => assert_eq!(connect_timeout_secs, 10),
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn test_empty_install_command_rejected() {
        let mut config = ControllerConfig::new("thingsboard/0");
        config.service.install_command.clear();
        assert!(config.validate().is_err());
    }
}
