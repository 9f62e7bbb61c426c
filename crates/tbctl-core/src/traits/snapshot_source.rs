// # Snapshot Source Trait
//
// Defines how condition snapshots reach the engine.
//
// ## Usage
//
// ```rust,ignore
// use tbctl_core::SnapshotSource;
// use tokio_stream::StreamExt;
//
// let source = /* SnapshotSource implementation */;
//
// // Initial conditions
// let snapshot = source.current().await?;
//
// // Every later change
// let mut stream = source.watch();
// while let Some(snapshot) = stream.next().await {
//     println!("conditions changed: {:?}", snapshot);
// }
// ```

use async_trait::async_trait;
use std::pin::Pin;
use tokio_stream::Stream;

use crate::snapshot::Snapshot;

/// Trait for snapshot source implementations
///
/// # Behavior
///
/// - `current()` returns the conditions as they are now
/// - `watch()` yields a snapshot each time a watched condition changes
/// - Sources wait for events; they do not poll on a timer
/// - Delivering the same snapshot twice is allowed; the reconciler treats a
///   repeat as a no-op
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Get the current snapshot
    async fn current(&self) -> Result<Snapshot, crate::Error>;

    /// Watch for snapshot changes
    ///
    /// Must be cancellation-safe (dropping the stream cleans up resources).
    fn watch(&self) -> Pin<Box<dyn Stream<Item = Snapshot> + Send + 'static>>;
}
