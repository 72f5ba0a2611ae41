//! codeloom CLI - layered code generation pipeline.

mod plan;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use codeloom_core::UnitState;
use codeloom_llm::{OpenAiConfig, OpenAiGenerator};
use codeloom_pipeline::{
    GenerationWorker, PipelineError, RunMode, Stage, StageRunner, TemplatePromptBuilder,
    WorkflowContext,
};
use codeloom_quality::BasicValidator;
use codeloom_storage::CheckpointStore;
use tracing::{info, warn};

use plan::Plan;

#[derive(Parser)]
#[command(name = "codeloom")]
#[command(about = "Layered LLM code generation pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Layer,
    Sequential,
    Parallel,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Layer => RunMode::Layer,
            Mode::Sequential => RunMode::Sequential,
            Mode::Parallel => RunMode::Parallel,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run from a plan file
    Run {
        /// Plan file: the instruction plus unit declarations
        #[arg(long)]
        plan: PathBuf,
        /// Workspace directory for checkpoints
        #[arg(long, default_value = ".codeloom")]
        workspace: PathBuf,
        /// Graph traversal mode
        #[arg(long, value_enum, default_value_t = Mode::Layer)]
        mode: Mode,
    },
    /// Continue a checkpointed run
    Resume {
        /// Workspace directory holding the checkpoint
        #[arg(long, default_value = ".codeloom")]
        workspace: PathBuf,
        /// Graph traversal mode
        #[arg(long, value_enum, default_value_t = Mode::Layer)]
        mode: Mode,
    },
    /// Print unit states from the checkpoint
    Status {
        /// Workspace directory holding the checkpoint
        #[arg(long, default_value = ".codeloom")]
        workspace: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            plan,
            workspace,
            mode,
        } => {
            let text = tokio::fs::read_to_string(&plan)
                .await
                .with_context(|| format!("reading plan {}", plan.display()))?;
            let plan = Plan::parse(&text).context("parsing plan")?;
            if plan.units.is_empty() {
                bail!("plan declares no units");
            }

            let mut ctx = WorkflowContext::new(plan.instruction.clone());
            ctx.graph = plan.build_graph()?;

            let store = CheckpointStore::new(&workspace).await?;
            run_stages(&mut ctx, &store, mode.into()).await?;
            print_states(&ctx);
        }
        Commands::Resume { workspace, mode } => {
            let store = CheckpointStore::new(&workspace).await?;
            let mut ctx = WorkflowContext::from_checkpoint(store.load().await?);
            info!(
                stage = ?ctx.last_completed_stage,
                units = ctx.graph.len(),
                "Resuming from checkpoint"
            );
            run_stages(&mut ctx, &store, mode.into()).await?;
            print_states(&ctx);
        }
        Commands::Status { workspace } => {
            let store = CheckpointStore::new(&workspace).await?;
            let ctx = WorkflowContext::from_checkpoint(store.load().await?);
            println!("Instruction: {}", ctx.instruction);
            println!(
                "Last completed stage: {}",
                ctx.last_completed_stage
                    .map(|s| s.name())
                    .unwrap_or("-")
            );
            print_states(&ctx);
        }
    }

    Ok(())
}

fn build_runner() -> Result<StageRunner> {
    let config = OpenAiConfig::from_env()?;
    let generator = Arc::new(OpenAiGenerator::new(config)?);
    let worker = GenerationWorker::new(generator, Arc::new(TemplatePromptBuilder::new()));
    Ok(StageRunner::new(worker, Arc::new(BasicValidator::new())))
}

/// Run every remaining stage in pipeline order, checkpointing after each
/// successful pass. In layer mode a stage is re-invoked until no eligible
/// layer remains; running out of eligible units means the stage is done.
async fn run_stages(
    ctx: &mut WorkflowContext,
    store: &CheckpointStore,
    mode: RunMode,
) -> Result<()> {
    let runner = build_runner()?;
    for stage in Stage::ALL {
        loop {
            match runner.run_stage(ctx, stage, mode).await {
                Ok(result) => {
                    for warning in &result.warnings {
                        warn!(%stage, warning, "Stage warning");
                    }
                    store.save(&ctx.checkpoint()).await?;
                    if mode != RunMode::Layer {
                        break;
                    }
                }
                Err(PipelineError::NoEligibleUnits { .. }) => break,
                Err(e) => {
                    // persist partial progress before surfacing the error
                    store.save(&ctx.checkpoint()).await?;
                    return Err(e.into());
                }
            }
        }
    }
    Ok(())
}

fn print_states(ctx: &WorkflowContext) {
    println!("Units ({})", ctx.graph.len());
    for unit in ctx.graph.units() {
        println!(
            "  {} | {} - {}",
            unit.name(),
            format_state(unit.state()),
            unit.description,
        );
    }
}

fn format_state(state: UnitState) -> &'static str {
    match state {
        UnitState::NotStarted => "NOT STARTED",
        UnitState::Designed => "DESIGNED",
        UnitState::Written => "WRITTEN",
        UnitState::Reviewed => "REVIEWED",
        UnitState::Checked => "CHECKED",
    }
}
