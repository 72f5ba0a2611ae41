//! Codeloom core data models.
//!
//! This crate defines the dependency graph of code-generation units, their
//! lifecycle state machine, the failure taxonomy, and the checkpoint
//! snapshot that makes a run resumable.

#![warn(missing_docs)]

mod checkpoint;
mod failure;
mod graph;
mod state;
mod unit;

pub use checkpoint::WorkflowCheckpoint;
pub use failure::Failure;
pub use graph::{DependencyGraph, GraphError, Layer};
pub use state::{StateError, UnitState};
pub use unit::Unit;

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
