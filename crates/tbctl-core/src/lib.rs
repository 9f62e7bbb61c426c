// # tbctl-core
//
// Core library for the declarative ThingsBoard lifecycle controller.
//
// ## Architecture Overview
//
// This library provides the pieces of a standalone service-lifecycle
// reconciler:
// - **Conditions**: named boolean facts forming a prerequisite DAG
// - **BackendBinding**: trait turning relation data into a connection context
// - **ConfigRenderer**: deterministic template rendering with atomic writes
// - **ServiceController**: install/start/stop/restart and port exposure
// - **Reconciler**: the state machine deciding and applying one action at a time
// - **ContextStore**: persisted context surviving restarts
// - **Engine**: driver loop feeding snapshots to the reconciler
// - **BackendRegistry**: plugin-based registry for bindings and stores
//
// ## Design Principles
//
// 1. **Pure planning**: `Reconciler::plan` decides, `step` applies
// 2. **Event-Driven**: snapshots arrive on a stream, nothing polls
// 3. **Plugin-Based**: backends are registered by name, no hard-coded dispatch
// 4. **Library-First**: the daemon is a thin wiring layer
// 5. **Idempotency**: replaying a snapshot is a no-op

pub mod backend;
pub mod conditions;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod reconciler;
pub mod registry;
pub mod render;
pub mod snapshot;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use backend::{BackendContext, BackendKind, RelationData};
pub use conditions::{Condition, ConditionSet};
pub use config::{BackendConfig, ContextStoreConfig, ControllerConfig};
pub use controller::{InstallOutcome, ServiceController};
pub use engine::{Engine, EngineEvent};
pub use error::{ConnectivityFailureKind, Error, Result};
pub use reconciler::{Action, BlockedReason, LifecycleState, PassOutcome, Reconciler, Status};
pub use registry::BackendRegistry;
pub use render::ConfigRenderer;
pub use snapshot::Snapshot;
pub use state::{FileContextStore, MemoryContextStore};
pub use traits::{
    BackendBinding, CommandRunner, ContextStore, PortManager, RelationPublisher, ServiceManager,
    SnapshotSource,
};
