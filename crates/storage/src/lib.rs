//! Persistence boundary: checkpoint save/load.
//!
//! The pipeline core depends on nothing else for durability; a checkpoint
//! is written after every completed stage so a crash loses at most one
//! stage's work.

#![warn(missing_docs)]

mod checkpoint_store;

pub use checkpoint_store::{CheckpointStore, Result, StorageError};
