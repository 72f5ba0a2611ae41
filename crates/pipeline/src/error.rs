//! Pipeline error taxonomy.

use codeloom_core::{Failure, GraphError, StateError, UnitState};

use crate::worker::WorkerError;

/// Errors surfaced from a stage run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// No unit matched the stage's start state: a configuration error,
    /// not a generation error.
    #[error("no units eligible for stage '{stage}' in state {state:?}")]
    NoEligibleUnits {
        /// The requested stage.
        stage: &'static str,
        /// The state the stage selects on.
        state: UnitState,
    },

    /// Graph mutation or layering failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// An illegal state transition was attempted.
    #[error(transparent)]
    State(#[from] StateError),

    /// The generation worker gave up.
    #[error(transparent)]
    Worker(#[from] WorkerError),

    /// No handler in the failure chain accepted this failure.
    #[error("unhandled failure: {0}")]
    Unrouted(Failure),

    /// Recovery kept failing validation within its attempt budget.
    #[error("recovery exhausted for unit '{unit}' after {attempts} attempts: {message}")]
    RecoveryExhausted {
        /// The unit that kept failing.
        unit: String,
        /// Attempts spent.
        attempts: usize,
        /// Last validator message.
        message: String,
    },

    /// A parallel batch task panicked or was cancelled unexpectedly.
    #[error("batch task failed: {0}")]
    Join(String),
}
