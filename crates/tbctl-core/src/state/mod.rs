// # Context Store Implementations
//
// This module provides implementations of the ContextStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::{FileContextStore, FileContextStoreFactory};
pub use memory::{MemoryContextStore, MemoryContextStoreFactory};
