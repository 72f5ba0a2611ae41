//! Durable snapshot of a run.

use serde::{Deserialize, Serialize};

use crate::graph::DependencyGraph;
use crate::Time;

/// A snapshot of the dependency graph plus pipeline progress, written after
/// each completed stage so a crash loses at most one stage's work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// The user instruction this run was started from.
    pub instruction: String,

    /// Full graph state, including every unit's content and state.
    pub graph: DependencyGraph,

    /// Name of the last stage that completed, if any.
    pub last_completed_stage: Option<String>,

    /// When this snapshot was written.
    pub saved_at: Time,
}

impl WorkflowCheckpoint {
    /// Snapshot the given graph and cursor now.
    pub fn new(
        instruction: impl Into<String>,
        graph: DependencyGraph,
        last_completed_stage: Option<String>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            graph,
            last_completed_stage,
            saved_at: chrono::Utc::now(),
        }
    }
}
