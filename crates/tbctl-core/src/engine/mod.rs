//! Driver engine
//!
//! The Engine is responsible for:
//! - Reading the initial snapshot from a SnapshotSource
//! - Feeding every later snapshot to the Reconciler, one pass at a time
//! - Reporting pass results and status changes as events
//! - Flushing the context store on shutdown
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐
//! │ SnapshotSource │─── Snapshot ───┐
//! └────────────────┘                │
//!                                   ▼
//!                           ┌──────────────┐
//!                           │    Engine    │
//!                           └──────────────┘
//!                                   │
//!                   ┌───────────────┴───────────────┐
//!                   ▼                               ▼
//!           ┌──────────────┐                ┌─────────────┐
//!           │  Reconciler  │                │   Events    │
//!           │  (one pass)  │                │  (notify)   │
//!           └──────────────┘                └─────────────┘
//! ```
//!
//! Passes never overlap: the next snapshot is only taken from the stream
//! once the current pass has returned. The engine does not retry a failed
//! pass; the next delivered snapshot is the retry.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::reconciler::{Action, Reconciler, Status};
use crate::snapshot::Snapshot;
use crate::traits::SnapshotSource;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

/// Events emitted by the Engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started {
        /// Status before the first pass
        status: Status,
    },

    /// Pass settled
    PassCompleted {
        /// Actions applied during the pass
        actions: Vec<Action>,
        /// Status at the end of the pass
        status: Status,
    },

    /// Pass ended early on an error
    PassFailed {
        /// Error text
        error: String,
        /// Status at the end of the pass
        status: Status,
    },

    /// Status differs from the one reported after the previous pass
    StatusChanged {
        /// New status
        status: Status,
    },

    /// Engine stopped
    Stopped {
        /// Why
        reason: String,
    },
}

/// Driver loop around a [`Reconciler`]
///
/// ## Lifecycle
///
/// 1. Create with [`Engine::new()`]
/// 2. Start with [`Engine::run()`]
/// 3. Engine runs until a shutdown signal is received
/// 4. The context store is flushed before `run()` returns
///
/// ## Load Resistance
///
/// Events go through a bounded channel. When it is full, new events are
/// dropped with a warning; reconciliation is never held up by a slow
/// consumer.
pub struct Engine {
    /// Snapshot source
    source: Box<dyn SnapshotSource>,

    /// Reconciler, exclusively owned
    reconciler: Reconciler,

    /// Status reported after the last pass
    last_status: Status,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl Engine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Box<dyn SnapshotSource>,
        reconciler: Reconciler,
        config: &EngineConfig,
    ) -> (Self, mpsc::Receiver<EngineEvent>) {
        let (tx, rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let last_status = reconciler.status().clone();

        let engine = Self {
            source,
            reconciler,
            last_status,
            event_tx: tx,
        };

        (engine, rx)
    }

    /// Reconciler driven by this engine
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Run the engine until SIGINT
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Clean shutdown
    /// - `Err(Error)`: The initial snapshot could not be read, or the final flush failed
    pub async fn run(&mut self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run with a programmatic shutdown signal instead of SIGINT
    ///
    /// Used by tests and by embedders that manage signals themselves.
    pub async fn run_with_shutdown(
        &mut self,
        shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    ) -> Result<()> {
        self.run_internal(Some(shutdown_rx)).await
    }

    async fn run_internal(
        &mut self,
        shutdown_rx: Option<tokio::sync::oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.emit_event(EngineEvent::Started {
            status: self.last_status.clone(),
        });

        let initial = self.source.current().await?;
        info!("Initial snapshot received");
        self.handle_snapshot(&initial).await;

        let mut snapshots = self.source.watch();

        if let Some(mut rx) = shutdown_rx {
            loop {
                tokio::select! {
                    next = snapshots.next() => match next {
                        Some(snapshot) => self.handle_snapshot(&snapshot).await,
                        None => {
                            // Source closed; wait for shutdown only
                            let _ = (&mut rx).await;
                            self.stopped("Shutdown signal");
                            break;
                        }
                    },

                    _ = &mut rx => {
                        info!("Shutdown signal received");
                        self.stopped("Shutdown signal");
                        break;
                    }
                }
            }
        } else {
            loop {
                tokio::select! {
                    next = snapshots.next() => match next {
                        Some(snapshot) => self.handle_snapshot(&snapshot).await,
                        None => {
                            warn!("Snapshot source closed; waiting for shutdown");
                            let _ = tokio::signal::ctrl_c().await;
                            self.stopped("Shutdown signal");
                            break;
                        }
                    },

                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received");
                        self.stopped("Shutdown signal");
                        break;
                    }
                }
            }
        }

        self.reconciler.flush().await?;
        info!("Context flushed, engine stopped");

        Ok(())
    }

    /// Run one reconciliation pass and report it
    async fn handle_snapshot(&mut self, snapshot: &Snapshot) {
        debug!("Reconciling snapshot: {:?}", snapshot);
        let outcome = self.reconciler.reconcile(snapshot).await;

        match &outcome.error {
            None => {
                if !outcome.applied.is_empty() {
                    info!(
                        "Pass applied {} actions; status: {}",
                        outcome.applied.len(),
                        outcome.status
                    );
                }
                self.emit_event(EngineEvent::PassCompleted {
                    actions: outcome.applied.clone(),
                    status: outcome.status.clone(),
                });
            }
            Some(e) => {
                if e.is_blocking_only() {
                    info!("Pass blocked: {}", e);
                } else {
                    error!("Pass failed: {}", e);
                }
                self.emit_event(EngineEvent::PassFailed {
                    error: e.to_string(),
                    status: outcome.status.clone(),
                });
            }
        }

        if outcome.status != self.last_status {
            info!("Status: {}", outcome.status);
            self.last_status = outcome.status.clone();
            self.emit_event(EngineEvent::StatusChanged {
                status: outcome.status,
            });
        }
    }

    fn stopped(&self, reason: &str) {
        self.emit_event(EngineEvent::Stopped {
            reason: reason.to_string(),
        });
    }

    /// Emit an engine event, dropping it if the channel is full
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::LifecycleState;

    #[test]
    fn test_engine_event_equality() {
        let event = EngineEvent::StatusChanged {
            status: Status::new(LifecycleState::Uninstalled, ""),
        };
        assert_eq!(event.clone(), event);
    }
}
