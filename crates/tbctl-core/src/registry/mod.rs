//! Plugin-based backend registry
//!
//! Backend bindings and context stores are registered by name at startup and
//! built from configuration, so the daemon never matches on concrete
//! implementations.
//!
//! ## Registration
//!
//! Binding crates expose a `register` function:
//!
//! ```rust,ignore
//! # use tbctl_core::registry::BackendRegistry;
//! // In tbctl-backend-postgres
//! pub fn register(registry: &BackendRegistry) {
//!     registry.register_binding("postgresql", Box::new(PostgresBindingFactory));
//! }
//! ```
//!
//! and the daemon builds everything the configuration names:
//!
//! ```rust,ignore
//! let bindings = registry.create_bindings(&config.backends)?;
//! let store = registry.create_context_store(&config.context_store).await?;
//! ```

use crate::config::{BackendConfig, ContextStoreConfig};
use crate::error::{Error, Result};
use crate::state::{FileContextStoreFactory, MemoryContextStoreFactory};
use crate::traits::{BackendBinding, BackendBindingFactory, ContextStore, ContextStoreFactory};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Registry of binding and context store factories
///
/// ## Thread Safety
///
/// Interior mutability with RwLock: concurrent reads, exclusive writes.
#[derive(Default)]
pub struct BackendRegistry {
    /// Registered binding factories
    bindings: RwLock<HashMap<String, Box<dyn BackendBindingFactory>>>,

    /// Registered context store factories
    context_stores: RwLock<HashMap<String, Arc<dyn ContextStoreFactory>>>,
}

impl BackendRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in `file` and `memory` context stores
    pub fn with_builtin_stores() -> Self {
        let registry = Self::new();
        registry.register_context_store("file", Box::new(FileContextStoreFactory));
        registry.register_context_store("memory", Box::new(MemoryContextStoreFactory));
        registry
    }

    /// Register a binding factory
    ///
    /// # Parameters
    ///
    /// - `name`: Binding type name (e.g., "postgresql", "cassandra")
    /// - `factory`: Factory object for creating binding instances
    pub fn register_binding(
        &self,
        name: impl Into<String>,
        factory: Box<dyn BackendBindingFactory>,
    ) {
        write(&self.bindings).insert(name.into(), factory);
    }

    /// Register a context store factory
    pub fn register_context_store(
        &self,
        name: impl Into<String>,
        factory: Box<dyn ContextStoreFactory>,
    ) {
        write(&self.context_stores).insert(name.into(), Arc::from(factory));
    }

    /// Create a binding from configuration
    ///
    /// # Returns
    ///
    /// - `Ok(Box<dyn BackendBinding>)`: Created binding
    /// - `Err(Error)`: If the binding type is not registered or creation fails
    pub fn create_binding(&self, config: &BackendConfig) -> Result<Box<dyn BackendBinding>> {
        let binding_type = config.type_name();
        let bindings = read(&self.bindings);

        let factory = bindings
            .get(binding_type)
            .ok_or_else(|| Error::config(format!("Unknown backend type: {}", binding_type)))?;

        factory.create(config)
    }

    /// Create every configured binding
    pub fn create_bindings(&self, configs: &[BackendConfig]) -> Result<Vec<Box<dyn BackendBinding>>> {
        configs.iter().map(|c| self.create_binding(c)).collect()
    }

    /// Create a context store from configuration
    pub async fn create_context_store(
        &self,
        config: &ContextStoreConfig,
    ) -> Result<Box<dyn ContextStore>> {
        let store_type = config.type_name();

        let factory = read(&self.context_stores)
            .get(store_type)
            .ok_or_else(|| Error::config(format!("Unknown context store type: {}", store_type)))?
            .clone();

        // Custom stores receive their own config blob
        let config_json = match config {
            ContextStoreConfig::Custom { config, .. } => config.clone(),
            other => serde_json::to_value(other)?,
        };

        factory.create(&config_json).await
    }

    /// List registered binding types
    pub fn list_bindings(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.bindings).keys().cloned().collect();
        names.sort();
        names
    }

    /// List registered context store types
    pub fn list_context_stores(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.context_stores).keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a binding type is registered
    pub fn has_binding(&self, name: &str) -> bool {
        read(&self.bindings).contains_key(name)
    }

    /// Check if a context store type is registered
    pub fn has_context_store(&self, name: &str) -> bool {
        read(&self.context_stores).contains_key(name)
    }
}

// A panicking registrant cannot leave a map half-written; keep serving
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
