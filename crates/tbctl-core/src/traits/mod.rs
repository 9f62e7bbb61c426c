//! Core traits for tbctl
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`BackendBinding`]: Derive a connection context from a backend relation
//! - [`ContextStore`]: Durable storage for the last applied backend context
//! - [`SnapshotSource`]: Deliver condition snapshots to the engine
//! - [`RelationPublisher`]: Publish requests and announcements to collaborators
//! - [`ServiceManager`], [`PortManager`], [`CommandRunner`]: host-level effects

pub mod backend_binding;
pub mod context_store;
pub mod relation;
pub mod service;
pub mod snapshot_source;

pub use backend_binding::{BackendBinding, BackendBindingFactory};
pub use context_store::{ContextStore, ContextStoreFactory, PersistedContext};
pub use relation::RelationPublisher;
pub use service::{CommandOutput, CommandRunner, PortManager, ServiceManager};
pub use snapshot_source::SnapshotSource;
