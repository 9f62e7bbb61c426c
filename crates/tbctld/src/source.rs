//! Snapshot file source
//!
//! The orchestration layer writes the current conditions as a JSON
//! [`Snapshot`] and sends SIGHUP; each signal re-reads the file and feeds
//! the result to the engine. Nothing is polled.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tbctl_core::{Error, Result, Snapshot, SnapshotSource};
use tokio_stream::Stream;
use tracing::{info, warn};

/// Reads snapshots from a JSON file, re-read on SIGHUP
#[derive(Debug, Clone)]
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Read one snapshot; a missing file is an empty snapshot
pub async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No snapshot at {} yet, starting empty", path.display());
            Ok(Snapshot::new())
        }
        Err(e) => Err(Error::Io(e)),
    }
}

#[async_trait]
impl SnapshotSource for FileSnapshotSource {
    async fn current(&self) -> Result<Snapshot> {
        read_snapshot(&self.path).await
    }

    fn watch(&self) -> Pin<Box<dyn Stream<Item = Snapshot> + Send + 'static>> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let path = self.path.clone();
            match signal(SignalKind::hangup()) {
                Ok(mut hangup) => {
                    tokio::spawn(async move {
                        info!("Watching {} (reload with SIGHUP)", path.display());
                        while hangup.recv().await.is_some() {
                            match read_snapshot(&path).await {
                                Ok(snapshot) => {
                                    if tx.send(snapshot).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("Ignoring unreadable snapshot: {}", e),
                            }
                        }
                    });
                }
                Err(e) => warn!("Failed to set up SIGHUP handler: {}", e),
            }
        }

        #[cfg(not(unix))]
        drop(tx);

        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tbctl_core::BackendKind;

    #[tokio::test]
    async fn test_missing_file_is_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSnapshotSource::new(dir.path().join("snapshot.json"));

        assert_eq!(source.current().await.unwrap(), Snapshot::new());
    }

    #[tokio::test]
    async fn test_reads_relation_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        tokio::fs::write(
            &path,
            r#"{
                "install_ready": true,
                "sql": {"host": "10.0.0.5", "port": "5432", "database": "tb_1",
                        "username": "tb", "password": "x"},
                "port": 9090
            }"#,
        )
        .await
        .unwrap();

        let snapshot = FileSnapshotSource::new(&path).current().await.unwrap();

        assert!(snapshot.install_ready);
        assert_eq!(snapshot.port, 9090);
        assert_eq!(snapshot.eligible_backends(), vec![BackendKind::Postgresql]);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let result = FileSnapshotSource::new(&path).current().await;
        assert!(matches!(result, Err(Error::Json(_))));
    }
}
