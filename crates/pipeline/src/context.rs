//! Explicit per-run workflow state.

use codeloom_core::{DependencyGraph, WorkflowCheckpoint};
use tracing::warn;

use crate::stage::Stage;

/// All mutable state of one pipeline run.
///
/// Passed explicitly to every stage entry point instead of living in a
/// process-wide singleton, so tests can hold independent contexts and
/// `reset` cannot leak across them.
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    /// The user instruction driving this run.
    pub instruction: String,

    /// The dependency graph of generation units.
    pub graph: DependencyGraph,

    /// The last stage that completed, if any.
    pub last_completed_stage: Option<Stage>,
}

impl WorkflowContext {
    /// Create a fresh context for the given instruction.
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            graph: DependencyGraph::new(),
            last_completed_stage: None,
        }
    }

    /// Drop all progress, returning the context to its initial state.
    pub fn reset(&mut self) {
        self.graph.clear();
        self.last_completed_stage = None;
    }

    /// Snapshot this context for persistence.
    pub fn checkpoint(&self) -> WorkflowCheckpoint {
        WorkflowCheckpoint::new(
            self.instruction.clone(),
            self.graph.clone(),
            self.last_completed_stage.map(|s| s.name().to_string()),
        )
    }

    /// Rebuild a context from a stored snapshot, fully replacing in-memory
    /// state.
    pub fn from_checkpoint(checkpoint: WorkflowCheckpoint) -> Self {
        let last_completed_stage = match checkpoint.last_completed_stage.as_deref() {
            None => None,
            Some(name) => {
                let stage = Stage::from_name(name);
                if stage.is_none() {
                    warn!(stage = name, "Unknown stage in checkpoint, ignoring cursor");
                }
                stage
            }
        };
        Self {
            instruction: checkpoint.instruction,
            graph: checkpoint.graph,
            last_completed_stage,
        }
    }
}
