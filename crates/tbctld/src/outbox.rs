//! File-based relation publisher
//!
//! Requests and announcements are written to a JSON outbox that the
//! surrounding orchestration forwards to the collaborators:
//!
//! ```json
//! {
//!   "database_requests": { "postgresql": "thingsboard_0" },
//!   "announced_port": 8080
//! }
//! ```
//!
//! Writes are atomic and skipped when nothing changed, so repeating a
//! request has no further effect.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tbctl_core::backend::BackendKind;
use tbctl_core::render::write_atomic;
use tbctl_core::traits::RelationPublisher;
use tbctl_core::Result;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Outbox contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outbox {
    /// Requested database / keyspace name per backend tag
    #[serde(default)]
    pub database_requests: BTreeMap<String, String>,

    /// Port announced on the transport relation
    #[serde(default)]
    pub announced_port: Option<u16>,
}

/// Publishes relation messages into a JSON outbox file
pub struct FileRelationPublisher {
    path: PathBuf,
    outbox: Mutex<Outbox>,
}

impl FileRelationPublisher {
    /// Open the outbox, starting empty if the file is missing or unreadable
    pub async fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let outbox = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!("Outbox {} is corrupted ({}), starting empty", path.display(), e);
                Outbox::default()
            }),
            Err(_) => Outbox::default(),
        };

        Self {
            path,
            outbox: Mutex::new(outbox),
        }
    }

    async fn update(&self, change: impl FnOnce(&mut Outbox)) -> Result<()> {
        let mut outbox = self.outbox.lock().await;
        let mut next = outbox.clone();
        change(&mut next);

        let bytes = serde_json::to_vec_pretty(&next)?;
        write_atomic(&self.path, &bytes).await?;

        *outbox = next;
        Ok(())
    }
}

#[async_trait]
impl RelationPublisher for FileRelationPublisher {
    async fn request_database(&self, kind: BackendKind, name: &str) -> Result<()> {
        info!("Requesting {} database '{}'", kind, name);
        self.update(|outbox| {
            outbox
                .database_requests
                .insert(kind.tag().to_string(), name.to_string());
        })
        .await
    }

    async fn announce_port(&self, port: u16) -> Result<()> {
        info!("Announcing port {} to transport", port);
        self.update(|outbox| outbox.announced_port = Some(port)).await
    }
}
