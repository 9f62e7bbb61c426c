// # Context Store Trait
//
// Defines the interface for the persisted reconciler context.
//
// ## Purpose
//
// The context store survives process restarts and holds:
// - The last applied backend context
// - The first-run marker
// - The installed package version
// - The port the service configuration was last rendered with
//
// With the backend context on disk, a port change can be re-rendered
// without asking the backend relation for credentials again.
//
// ## Implementations
//
// - File-based: JSON file with atomic writes and backup recovery
// - In-memory: tests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backend::BackendContext;

/// Durable reconciler context
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedContext {
    /// Last applied backend context
    #[serde(default)]
    pub backend: Option<BackendContext>,

    /// Service has been installed but never started
    #[serde(default)]
    pub first_run: bool,

    /// Package version that was installed
    #[serde(default)]
    pub installed_version: Option<String>,

    /// Port the configuration was last rendered and exposed with
    #[serde(default)]
    pub applied_port: Option<u16>,

    /// Timestamp of the last save
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PersistedContext {
    /// Copy with the timestamp refreshed
    pub(crate) fn touched(&self) -> Self {
        Self {
            updated_at: Some(chrono::Utc::now()),
            ..self.clone()
        }
    }

    /// Equality ignoring the timestamp
    pub fn same_content(&self, other: &Self) -> bool {
        self.backend == other.backend
            && self.first_run == other.first_run
            && self.installed_version == other.installed_version
            && self.applied_port == other.applied_port
    }
}

/// Trait for context store implementations
///
/// The reconciler is the only writer. Each `save` must be durable when it
/// returns; a failed `save` must leave the previously stored context intact.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Load the stored context, or the default if nothing is stored
    async fn load(&self) -> Result<PersistedContext, crate::Error>;

    /// Replace the stored context
    async fn save(&self, context: &PersistedContext) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing context stores from configuration
#[async_trait]
pub trait ContextStoreFactory: Send + Sync {
    /// Create a ContextStore instance from configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Serialized [`crate::config::ContextStoreConfig`]
    async fn create(
        &self,
        config: &serde_json::Value,
    ) -> Result<Box<dyn ContextStore>, crate::Error>;
}
