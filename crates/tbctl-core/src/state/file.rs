// # File Context Store
//
// File-based implementation of ContextStore with crash recovery.
//
// ## Purpose
//
// Keeps the persisted reconciler context across controller restarts so a
// restarted controller knows the service is installed, which backend it was
// bound to, and which port it last applied.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good context
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "context": {
//     "backend": { "kind": "postgresql", "fields": { "host": "10.0.0.5", ... } },
//     "first_run": false,
//     "installed_version": "1.3.1",
//     "applied_port": 8080,
//     "updated_at": "2026-01-09T12:00:00Z"
//   }
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::config::ContextStoreConfig;
use crate::traits::context_store::{ContextStore, ContextStoreFactory, PersistedContext};

/// Context file format version
const CONTEXT_FILE_VERSION: &str = "1.0";

/// File-based context store with crash recovery
///
/// # Example
///
/// ```rust,no_run
/// use tbctl_core::state::FileContextStore;
/// use tbctl_core::traits::{ContextStore, PersistedContext};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileContextStore::new("/var/lib/tbctl/context.json").await?;
///
///     let mut context = store.load().await?;
///     context.applied_port = Some(8080);
///     store.save(&context).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileContextStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    context: PersistedContext,
}

/// Serializable context file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ContextFileFormat {
    version: String,
    context: PersistedContext,
}

impl FileContextStore {
    /// Create or load a file context store
    ///
    /// This will:
    /// 1. Try to load the existing context file
    /// 2. If corruption detected, try to load from backup
    /// 3. If both fail, start with an empty context
    /// 4. Create parent directories if needed
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create context directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let context = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState { context })),
        })
    }

    /// Load the context file, falling back to the backup on corruption
    async fn load_with_recovery(path: &Path) -> Result<PersistedContext, Error> {
        match Self::load_file(path).await {
            Ok(context) => Ok(context),
            Err(LoadError::Io(e)) => Err(e),
            Err(LoadError::Corrupt(reason)) => {
                tracing::warn!(
                    "Context file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    reason
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty context.");
                    return Ok(PersistedContext::default());
                }

                match Self::load_file(&backup_path).await {
                    Ok(context) => {
                        tracing::info!("Recovered context from backup {}", backup_path.display());
                        if let Err(e) = fs::copy(&backup_path, path).await {
                            tracing::error!("Failed to restore context file from backup: {}", e);
                        }
                        Ok(context)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unreadable: {}. Starting with empty context.",
                            backup_err
                        );
                        Ok(PersistedContext::default())
                    }
                }
            }
        }
    }

    async fn load_file(path: &Path) -> Result<PersistedContext, LoadError> {
        if !path.exists() {
            tracing::debug!("Context file does not exist: {}", path.display());
            return Ok(PersistedContext::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::context_store(format!(
                "Failed to read context file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: ContextFileFormat = serde_json::from_str(&content)
            .map_err(|e| LoadError::Corrupt(e.to_string()))?;

        if file.version != CONTEXT_FILE_VERSION {
            tracing::warn!(
                "Context file version mismatch: expected {}, got {}. Attempting to load anyway.",
                CONTEXT_FILE_VERSION,
                file.version
            );
        }

        Ok(file.context)
    }

    /// Write the context to disk atomically
    async fn write_file(&self, context: &PersistedContext) -> Result<(), Error> {
        let file = ContextFileFormat {
            version: CONTEXT_FILE_VERSION.to_string(),
            context: context.clone(),
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::context_store(format!("Failed to serialize context: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut out = fs::File::create(&temp_path).await.map_err(|e| {
                Error::context_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            out.write_all(json.as_bytes()).await.map_err(|e| {
                Error::context_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            out.sync_all().await.map_err(|e| {
                Error::context_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::context_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Context written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Path of the context file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

enum LoadError {
    Io(Error),
    Corrupt(String),
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Io(e) => write!(f, "{}", e),
            LoadError::Corrupt(reason) => write!(f, "corrupt context file: {}", reason),
        }
    }
}

#[async_trait]
impl ContextStore for FileContextStore {
    async fn load(&self) -> Result<PersistedContext, Error> {
        Ok(self.state.read().await.context.clone())
    }

    async fn save(&self, context: &PersistedContext) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        let stamped = context.touched();

        // The in-memory copy only changes once the file is durable
        self.write_file(&stamped).await?;
        guard.context = stamped;
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Saves are written through; only recreate a file removed underneath us
        let guard = self.state.read().await;
        if !self.path.exists() && guard.context != PersistedContext::default() {
            self.write_file(&guard.context).await?;
        }
        Ok(())
    }
}

/// Factory for [`FileContextStore`]
pub struct FileContextStoreFactory;

#[async_trait]
impl ContextStoreFactory for FileContextStoreFactory {
    async fn create(&self, config: &serde_json::Value) -> Result<Box<dyn ContextStore>, Error> {
        let config: ContextStoreConfig = serde_json::from_value(config.clone())?;
        match config {
            ContextStoreConfig::File { path } => {
                if path.is_empty() {
                    return Err(Error::config("File context store path cannot be empty"));
                }
                Ok(Box::new(FileContextStore::new(path).await?))
            }
            other => Err(Error::config(format!(
                "File context store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}
