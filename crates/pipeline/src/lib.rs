//! The generation pipeline: staged, layer-aware scheduling of generation
//! work over the dependency graph, with retrying workers and a
//! failure-routing recovery chain.

#![warn(missing_docs)]

mod context;
mod error;
mod prompt;
mod router;
mod runner;
mod stage;
mod worker;

pub use context::WorkflowContext;
pub use error::PipelineError;
pub use prompt::{GenerationRequest, PromptBuilder, TemplatePromptBuilder};
pub use router::{FailureKind, FailureRouter, Recovery, RecoveryAction};
pub use runner::{RunnerConfig, StageRunner};
pub use stage::{RunMode, Stage, StageResult};
pub use worker::{GenerationOutcome, GenerationWorker, WorkerError};
