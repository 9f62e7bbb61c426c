// # Memory Context Store
//
// In-memory implementation of ContextStore.
//
// ## Purpose
//
// Keeps the persisted context only for the life of the process. Useful for
// tests and for trying the controller out; after a restart the controller
// behaves as on a fresh machine (the install step is re-checked and the
// backend re-bound).

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::context_store::{ContextStore, ContextStoreFactory, PersistedContext};

/// In-memory context store implementation
///
/// Clones share the same underlying context, which lets tests keep a handle
/// on the store after handing a boxed copy to the reconciler.
#[derive(Debug, Clone, Default)]
pub struct MemoryContextStore {
    inner: Arc<RwLock<PersistedContext>>,
    saves: Arc<std::sync::atomic::AtomicUsize>,
}

impl MemoryContextStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a context
    pub fn with_context(context: PersistedContext) -> Self {
        Self {
            inner: Arc::new(RwLock::new(context)),
            saves: Arc::default(),
        }
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn load(&self) -> Result<PersistedContext, Error> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, context: &PersistedContext) -> Result<(), Error> {
        *self.inner.write().await = context.touched();
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing buffered
        Ok(())
    }
}

/// Factory for [`MemoryContextStore`]
pub struct MemoryContextStoreFactory;

#[async_trait]
impl ContextStoreFactory for MemoryContextStoreFactory {
    async fn create(&self, _config: &serde_json::Value) -> Result<Box<dyn ContextStore>, Error> {
        Ok(Box::new(MemoryContextStore::new()))
    }
}
