//! Outbound relation messages
//!
//! The reconciler talks back to two collaborators: the backend relation
//! (asking it to create a database for this unit) and the transport relation
//! (telling it which port the service listens on).

use async_trait::async_trait;

use crate::backend::BackendKind;

/// Publishes requests and announcements to relation collaborators
///
/// Both calls must be idempotent: repeating a request with the same
/// arguments has no further effect on the collaborator.
#[async_trait]
pub trait RelationPublisher: Send + Sync {
    /// Ask a backend to create a logical database / keyspace
    async fn request_database(&self, kind: BackendKind, name: &str) -> Result<(), crate::Error>;

    /// Announce the service port on the transport relation
    async fn announce_port(&self, port: u16) -> Result<(), crate::Error>;
}
