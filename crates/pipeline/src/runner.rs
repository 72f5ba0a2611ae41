//! Stage execution over the dependency graph.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use std::sync::Arc;

use codeloom_core::{DependencyGraph, Failure, UnitState};
use codeloom_quality::StructuralValidator;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::context::WorkflowContext;
use crate::error::PipelineError;
use crate::prompt::GenerationRequest;
use crate::router::{FailureRouter, Recovery, RecoveryAction};
use crate::stage::{RunMode, Stage, StageResult};
use crate::worker::{GenerationOutcome, GenerationWorker};

/// Tunables for stage execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// How many bug-recovery regenerations a check may spend per unit.
    pub max_recovery_attempts: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
        }
    }
}

/// Walks the graph one stage at a time and drives workers over it.
///
/// `run_stage` is the pipeline's only externally invoked entry point.
pub struct StageRunner {
    worker: GenerationWorker,
    validator: Arc<dyn StructuralValidator>,
    router: FailureRouter,
    config: RunnerConfig,
}

impl StageRunner {
    /// Create a runner with the standard failure chain.
    pub fn new(worker: GenerationWorker, validator: Arc<dyn StructuralValidator>) -> Self {
        Self {
            worker,
            validator,
            router: FailureRouter::standard(),
            config: RunnerConfig::default(),
        }
    }

    /// Replace the failure chain.
    pub fn with_router(mut self, router: FailureRouter) -> Self {
        self.router = router;
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Run one stage in the given traversal mode.
    pub async fn run_stage(
        &self,
        ctx: &mut WorkflowContext,
        stage: Stage,
        mode: RunMode,
    ) -> Result<StageResult, PipelineError> {
        info!(%stage, ?mode, "Running stage");
        let eligible = self.eligible_units(ctx, stage, mode)?;
        debug!(units = eligible.len(), "Eligible units selected");

        let mut result = StageResult::default();
        match (mode, stage) {
            (RunMode::Parallel, Stage::Check) => {
                // validation reads shared dependency state; run units one
                // at a time even when parallel was requested
                result.warnings.push(
                    "check stage always processes units one at a time".to_string(),
                );
                for name in &eligible {
                    self.process_check(ctx, name).await?;
                    result.changed.push(name.clone());
                }
            }
            (RunMode::Parallel, _) => {
                self.run_parallel(ctx, stage, &eligible, &mut result).await?;
            }
            _ => {
                for name in &eligible {
                    match stage {
                        Stage::Check => self.process_check(ctx, name).await?,
                        _ => self.process_generation(ctx, stage, name).await?,
                    }
                    result.changed.push(name.clone());
                }
            }
        }

        ctx.last_completed_stage = Some(stage);
        info!(%stage, changed = result.changed.len(), "Stage complete");
        Ok(result)
    }

    /// Route an externally raised failure (critic rejection, human
    /// feedback) through the chain and run its recovery.
    pub async fn handle_failure(
        &self,
        ctx: &mut WorkflowContext,
        failure: Failure,
    ) -> Result<StageResult, PipelineError> {
        let Some(recovery) = self.router.route(&failure) else {
            return Err(PipelineError::Unrouted(failure));
        };

        let mut result = StageResult::default();
        match &recovery.unit {
            Some(name) => {
                self.run_recovery(ctx, name, &recovery).await?;
                result.changed.push(name.clone());
            }
            None => {
                result.warnings.push(format!(
                    "feedback accepted but names no unit: {}",
                    recovery.payload
                ));
            }
        }
        Ok(result)
    }

    fn eligible_units(
        &self,
        ctx: &mut WorkflowContext,
        stage: Stage,
        mode: RunMode,
    ) -> Result<Vec<String>, PipelineError> {
        let state = stage.start_state();
        let eligible: Vec<String> = match mode {
            RunMode::Layer => {
                let Some(index) = ctx.graph.min_layer_index_by_state(state)? else {
                    return Err(PipelineError::NoEligibleUnits {
                        stage: stage.name(),
                        state,
                    });
                };
                let layers = ctx.graph.compute_layers()?;
                layers[index]
                    .members()
                    .iter()
                    .cloned()
                    .collect()
            }
            RunMode::Sequential | RunMode::Parallel => ctx
                .graph
                .units()
                .filter(|u| u.state() == state)
                .map(|u| u.name().to_string())
                .collect(),
        };

        let eligible: Vec<String> = eligible
            .into_iter()
            .filter(|name| {
                ctx.graph
                    .unit(name)
                    .map(|u| u.state() == state)
                    .unwrap_or(false)
            })
            .collect();

        if eligible.is_empty() {
            return Err(PipelineError::NoEligibleUnits {
                stage: stage.name(),
                state,
            });
        }
        Ok(eligible)
    }

    fn request_for(
        &self,
        ctx: &WorkflowContext,
        stage: Stage,
        name: &str,
        amendment: Option<String>,
    ) -> Result<GenerationRequest, PipelineError> {
        let unit = ctx.graph.unit(name)?;
        let siblings = match stage {
            // full dependency context when fixing a failing unit
            Stage::Check => ctx
                .graph
                .transitive_closure(name)?
                .iter()
                .map(|u| u.body())
                .collect(),
            _ => ctx
                .graph
                .filtered_units(name)
                .iter()
                .map(|u| u.body())
                .collect(),
        };
        Ok(GenerationRequest {
            unit_name: name.to_string(),
            description: unit.description.clone(),
            definition: unit.definition.clone(),
            content: unit.content.clone(),
            instruction: ctx.instruction.clone(),
            siblings,
            stage,
            amendment,
        })
    }

    fn commit_outcome(
        &self,
        ctx: &mut WorkflowContext,
        stage: Stage,
        outcome: &GenerationOutcome,
    ) -> Result<(), PipelineError> {
        let unit = ctx.graph.unit_mut(&outcome.name)?;
        match stage {
            Stage::Design => {
                unit.definition = outcome.definition.clone();
            }
            Stage::Write | Stage::Review | Stage::Check => {
                if unit.definition.is_empty() {
                    unit.definition = outcome.definition.clone();
                }
                unit.content = outcome.content.clone();
                unit.add_imports(outcome.imports.iter().cloned());
            }
        }
        Ok(())
    }

    async fn process_generation(
        &self,
        ctx: &mut WorkflowContext,
        stage: Stage,
        name: &str,
    ) -> Result<(), PipelineError> {
        let request = self.request_for(ctx, stage, name, None)?;
        let outcome = self.worker.generate(&request).await?;
        self.commit_outcome(ctx, stage, &outcome)?;
        ctx.graph.unit_mut(name)?.advance_to(stage.end_state())?;
        Ok(())
    }

    /// Validate one unit against its scoped source, routing failures into
    /// bounded bug-recovery regeneration. The unit stays `Reviewed` until a
    /// validation pass succeeds.
    ///
    /// Each finding is attributed to the unit whose body contains the
    /// offending line, so a defect in a dependency is routed to that
    /// dependency instead of the unit under check.
    async fn process_check(
        &self,
        ctx: &mut WorkflowContext,
        name: &str,
    ) -> Result<(), PipelineError> {
        let mut attempt = 0;
        loop {
            let (source, spans) = check_scope(&ctx.graph, name)?;
            let findings = self.validator.check(&source);
            if findings.is_empty() {
                ctx.graph.unit_mut(name)?.advance_to(UnitState::Checked)?;
                return Ok(());
            }

            let owner = owning_unit(&spans, findings[0].line)
                .unwrap_or(name)
                .to_string();
            let message = findings
                .iter()
                .filter(|f| owning_unit(&spans, f.line).unwrap_or(name) == owner)
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            let failure = Failure::Bug {
                unit: owner.clone(),
                message: message.clone(),
            };
            let Some(recovery) = self.router.route(&failure) else {
                return Err(PipelineError::Unrouted(failure));
            };
            if attempt >= self.config.max_recovery_attempts {
                return Err(PipelineError::RecoveryExhausted {
                    unit: owner,
                    attempts: attempt,
                    message,
                });
            }
            attempt += 1;
            info!(unit = %owner, attempt, "Routing structural bug to recovery");
            self.run_recovery(ctx, &owner, &recovery).await?;
        }
    }

    /// Regenerate a unit with the routed payload attached. The action
    /// decides the framing: error recoveries re-enter the fix prompt,
    /// feedback recoveries re-enter the review prompt.
    async fn run_recovery(
        &self,
        ctx: &mut WorkflowContext,
        name: &str,
        recovery: &Recovery,
    ) -> Result<(), PipelineError> {
        let stage = match recovery.action {
            RecoveryAction::RegenerateWithError => Stage::Check,
            RecoveryAction::RegenerateWithFeedback => Stage::Review,
        };
        let request = self.request_for(ctx, stage, name, Some(recovery.payload.clone()))?;
        let outcome = self.worker.generate(&request).await?;
        self.commit_outcome(ctx, stage, &outcome)?;
        Ok(())
    }

    /// Launch one task per unit and advance state only after the join.
    /// A fatal error halts the batch: in-flight tasks are aborted, while
    /// outcomes that already finished stay committed.
    async fn run_parallel(
        &self,
        ctx: &mut WorkflowContext,
        stage: Stage,
        eligible: &[String],
        result: &mut StageResult,
    ) -> Result<(), PipelineError> {
        // snapshot every request before launching, so concurrent tasks
        // never observe siblings in mid-batch states
        let requests: Vec<GenerationRequest> = eligible
            .iter()
            .map(|name| self.request_for(ctx, stage, name, None))
            .collect::<Result<_, _>>()?;

        let mut set = JoinSet::new();
        for request in requests {
            let worker = self.worker.clone();
            set.spawn(async move { worker.generate(&request).await });
        }

        let mut outcomes: Vec<GenerationOutcome> = Vec::new();
        let mut halted: Option<PipelineError> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(worker_err)) => {
                    if halted.is_none() {
                        warn!(error = %worker_err, "Halting parallel batch");
                        halted = Some(worker_err.into());
                        set.abort_all();
                    }
                }
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    if halted.is_none() {
                        halted = Some(PipelineError::Join(join_err.to_string()));
                        set.abort_all();
                    }
                }
            }
        }

        for outcome in &outcomes {
            self.commit_outcome(ctx, stage, outcome)?;
            ctx.graph
                .unit_mut(&outcome.name)?
                .advance_to(stage.end_state())?;
            result.changed.push(outcome.name.clone());
        }

        match halted {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

type UnitSpans = Vec<(String, RangeInclusive<usize>)>;

/// Build the source a check validates: pooled imports, then the bodies of
/// the unit's transitive closure, then the unit itself. Returns the 1-based
/// line range each body occupies so findings can be traced to their unit.
fn check_scope(
    graph: &DependencyGraph,
    name: &str,
) -> Result<(String, UnitSpans), PipelineError> {
    let mut members = graph.transitive_closure(name)?;
    members.push(graph.unit(name)?);

    let mut imports: BTreeSet<&str> = BTreeSet::new();
    for unit in &members {
        imports.extend(unit.imports.iter().map(String::as_str));
    }

    let mut text = String::new();
    let mut line = 0usize;
    for import in &imports {
        text.push_str(import);
        text.push('\n');
        line += 1;
    }

    let mut spans: UnitSpans = Vec::new();
    for unit in members {
        if unit.content.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push('\n');
            line += 1;
        }
        let start = line + 1;
        line += unit.content.lines().count();
        text.push_str(&unit.content);
        text.push('\n');
        spans.push((unit.name().to_string(), start..=line));
    }
    Ok((text, spans))
}

fn owning_unit(spans: &UnitSpans, line: usize) -> Option<&str> {
    spans
        .iter()
        .find(|(_, range)| range.contains(&line))
        .map(|(name, _)| name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::TemplatePromptBuilder;
    use crate::router::{FailureRouter, RecoveryAction};
    use crate::worker::WorkerError;
    use async_trait::async_trait;
    use codeloom_llm::{GenerateError, Generator, RetryPolicy};
    use codeloom_quality::BasicValidator;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Mutex;

    /// Answers per unit by scanning the prompt for the unit header.
    struct MapGenerator {
        responses: BTreeMap<String, String>,
        fatal: BTreeSet<String>,
        prompts: Mutex<Vec<String>>,
    }

    impl MapGenerator {
        fn new(responses: &[(&str, &str)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(name, text)| (name.to_string(), text.to_string()))
                    .collect(),
                fatal: BTreeSet::new(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(mut self, name: &str) -> Self {
            self.fatal.insert(name.to_string());
            self
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Generator for MapGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerateError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            for name in &self.fatal {
                if prompt.contains(&format!("Function: {name}\n")) {
                    return Err(GenerateError::Fatal(format!("no answer for {name}")));
                }
            }
            for (name, response) in &self.responses {
                if prompt.contains(&format!("Function: {name}\n")) {
                    return Ok(response.clone());
                }
            }
            Err(GenerateError::Fatal("unexpected prompt".to_string()))
        }
    }

    fn fenced(body: &str) -> String {
        format!("```python\n{body}\n```")
    }

    fn runner(generator: MapGenerator) -> StageRunner {
        let worker = GenerationWorker::new(
            Arc::new(generator),
            Arc::new(TemplatePromptBuilder::new()),
        )
        .with_retry(RetryPolicy::immediate(5));
        StageRunner::new(worker, Arc::new(BasicValidator::new()))
    }

    /// B and C depend on A.
    fn diamond_context() -> WorkflowContext {
        let mut ctx = WorkflowContext::new("form a line");
        ctx.graph.add_unit("a", "base helper").unwrap();
        ctx.graph.add_unit("b", "uses a").unwrap();
        ctx.graph.add_unit("c", "uses a").unwrap();
        ctx.graph.connect("b", "a").unwrap();
        ctx.graph.connect("c", "a").unwrap();
        ctx
    }

    fn design_responses() -> MapGenerator {
        MapGenerator::new(&[
            ("a", &fenced("def a():\n    pass")),
            ("b", &fenced("def b():\n    pass")),
            ("c", &fenced("def c():\n    pass")),
        ])
    }

    #[tokio::test]
    async fn test_layer_mode_processes_one_layer_per_run() {
        let mut ctx = diamond_context();
        let runner = runner(design_responses());

        let first = runner
            .run_stage(&mut ctx, Stage::Design, RunMode::Layer)
            .await
            .unwrap();
        assert_eq!(first.changed, ["a"]);
        assert_eq!(ctx.graph.unit("a").unwrap().state(), UnitState::Designed);
        assert_eq!(ctx.graph.unit("b").unwrap().state(), UnitState::NotStarted);

        let second = runner
            .run_stage(&mut ctx, Stage::Design, RunMode::Layer)
            .await
            .unwrap();
        assert_eq!(second.changed, ["b", "c"]);
        assert_eq!(ctx.graph.unit("c").unwrap().state(), UnitState::Designed);
        assert_eq!(ctx.last_completed_stage, Some(Stage::Design));
    }

    #[tokio::test]
    async fn test_sequential_mode_processes_all_eligible() {
        let mut ctx = diamond_context();
        let runner = runner(design_responses());

        let result = runner
            .run_stage(&mut ctx, Stage::Design, RunMode::Sequential)
            .await
            .unwrap();
        assert_eq!(result.changed, ["a", "b", "c"]);
        for name in ["a", "b", "c"] {
            let unit = ctx.graph.unit(name).unwrap();
            assert_eq!(unit.state(), UnitState::Designed);
            assert!(unit.definition.starts_with(&format!("def {name}(")));
        }
    }

    #[tokio::test]
    async fn test_write_commits_body_and_imports() {
        let mut ctx = WorkflowContext::new("task");
        ctx.graph.add_unit("f", "helper").unwrap();
        ctx.graph
            .unit_mut("f")
            .unwrap()
            .advance_to(UnitState::Designed)
            .unwrap();
        let runner = runner(MapGenerator::new(&[(
            "f",
            &fenced("import math\ndef f(x):\n    return math.floor(x)"),
        )]));

        runner
            .run_stage(&mut ctx, Stage::Write, RunMode::Sequential)
            .await
            .unwrap();
        let unit = ctx.graph.unit("f").unwrap();
        assert_eq!(unit.state(), UnitState::Written);
        assert!(unit.content.contains("math.floor"));
        assert!(unit.imports.contains("import math"));
    }

    #[tokio::test]
    async fn test_no_eligible_units() {
        let mut ctx = diamond_context();
        for name in ["a", "b", "c"] {
            ctx.graph
                .unit_mut(name)
                .unwrap()
                .advance_to(UnitState::Designed)
                .unwrap();
        }
        let err = runner(design_responses())
            .run_stage(&mut ctx, Stage::Design, RunMode::Layer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::NoEligibleUnits {
                stage: "design",
                state: UnitState::NotStarted,
            }
        ));
        // a failed stage never moves the cursor
        assert_eq!(ctx.last_completed_stage, None);
    }

    #[tokio::test]
    async fn test_parallel_advances_all_at_join() {
        let mut ctx = diamond_context();
        let result = runner(design_responses())
            .run_stage(&mut ctx, Stage::Design, RunMode::Parallel)
            .await
            .unwrap();
        assert_eq!(result.changed.len(), 3);
        for name in ["a", "b", "c"] {
            assert_eq!(ctx.graph.unit(name).unwrap().state(), UnitState::Designed);
        }
    }

    #[tokio::test]
    async fn test_parallel_fatal_halts_batch_but_keeps_finished_work() {
        let mut ctx = diamond_context();
        let err = runner(design_responses().failing_on("a"))
            .run_stage(&mut ctx, Stage::Design, RunMode::Parallel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Worker(WorkerError::Fatal(_))
        ));
        // the failing unit never advances
        assert_eq!(ctx.graph.unit("a").unwrap().state(), UnitState::NotStarted);
        for name in ["b", "c"] {
            assert_eq!(ctx.graph.unit(name).unwrap().state(), UnitState::Designed);
        }
        assert_eq!(ctx.last_completed_stage, None);
    }

    fn reviewed_unit(ctx: &mut WorkflowContext, name: &str, content: &str) {
        ctx.graph.add_unit(name, "checked unit").unwrap();
        let unit = ctx.graph.unit_mut(name).unwrap();
        unit.definition = format!("def {name}():");
        unit.content = content.to_string();
        unit.advance_to(UnitState::Reviewed).unwrap();
    }

    #[tokio::test]
    async fn test_check_passes_clean_source() {
        let mut ctx = WorkflowContext::new("task");
        reviewed_unit(&mut ctx, "x", "def x():\n    return 1");
        let generator = MapGenerator::new(&[]);
        runner(generator)
            .run_stage(&mut ctx, Stage::Check, RunMode::Sequential)
            .await
            .unwrap();
        assert_eq!(ctx.graph.unit("x").unwrap().state(), UnitState::Checked);
    }

    #[tokio::test]
    async fn test_check_routes_bug_and_recovers() {
        let mut ctx = WorkflowContext::new("task");
        reviewed_unit(&mut ctx, "x", "def x():\n    return y()");
        let runner = runner(MapGenerator::new(&[(
            "x",
            &fenced("def x():\n    return 1"),
        )]));

        runner
            .run_stage(&mut ctx, Stage::Check, RunMode::Sequential)
            .await
            .unwrap();
        assert_eq!(ctx.graph.unit("x").unwrap().state(), UnitState::Checked);
        assert!(ctx.graph.unit("x").unwrap().content.contains("return 1"));
    }

    #[tokio::test]
    async fn test_recovery_prompt_carries_exact_error() {
        let mut ctx = WorkflowContext::new("task");
        reviewed_unit(&mut ctx, "x", "def x():\n    return y()");
        let generator = Arc::new(MapGenerator::new(&[(
            "x",
            &fenced("def x():\n    return 1"),
        )]));
        let worker = GenerationWorker::new(
            generator.clone(),
            Arc::new(TemplatePromptBuilder::new()),
        )
        .with_retry(RetryPolicy::immediate(5));
        let runner = StageRunner::new(worker, Arc::new(BasicValidator::new()));

        runner
            .run_stage(&mut ctx, Stage::Check, RunMode::Sequential)
            .await
            .unwrap();
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("undefined name 'y'"));
        assert!(prompts[0].contains("Fix the reported error"));
    }

    #[tokio::test]
    async fn test_check_does_not_blame_clean_unit_for_sibling_bug() {
        let mut ctx = WorkflowContext::new("task");
        reviewed_unit(&mut ctx, "a", "def a():\n    return 1");
        reviewed_unit(&mut ctx, "b", "def b():\n    return ghost()");
        let generator = Arc::new(MapGenerator::new(&[(
            "b",
            &fenced("def b():\n    return 2"),
        )]));
        let worker = GenerationWorker::new(
            generator.clone(),
            Arc::new(TemplatePromptBuilder::new()),
        )
        .with_retry(RetryPolicy::immediate(5));
        let runner = StageRunner::new(worker, Arc::new(BasicValidator::new()));

        runner
            .run_stage(&mut ctx, Stage::Check, RunMode::Sequential)
            .await
            .unwrap();
        assert_eq!(ctx.graph.unit("a").unwrap().state(), UnitState::Checked);
        assert_eq!(ctx.graph.unit("b").unwrap().state(), UnitState::Checked);
        // the clean unit is never regenerated
        for prompt in generator.prompts() {
            assert!(!prompt.contains("Function: a\n"));
        }
    }

    #[tokio::test]
    async fn test_dependency_defect_routed_to_dependency() {
        let mut ctx = WorkflowContext::new("task");
        reviewed_unit(&mut ctx, "z", "def z():\n    return ghost()");
        reviewed_unit(&mut ctx, "m", "def m():\n    return z()");
        ctx.graph.connect("m", "z").unwrap();
        let runner = runner(MapGenerator::new(&[(
            "z",
            &fenced("def z():\n    return 1"),
        )]));

        // m is checked first and its scope includes z; the defect in z must
        // be routed to z, not m
        runner
            .run_stage(&mut ctx, Stage::Check, RunMode::Sequential)
            .await
            .unwrap();
        assert!(ctx.graph.unit("z").unwrap().content.contains("return 1"));
        assert_eq!(ctx.graph.unit("m").unwrap().state(), UnitState::Checked);
        assert_eq!(ctx.graph.unit("z").unwrap().state(), UnitState::Checked);
    }

    #[tokio::test]
    async fn test_recovery_exhausted() {
        let mut ctx = WorkflowContext::new("task");
        reviewed_unit(&mut ctx, "x", "def x():\n    return y()");
        // every regeneration reproduces the same defect
        let runner = runner(MapGenerator::new(&[(
            "x",
            &fenced("def x():\n    return y()"),
        )]))
        .with_config(RunnerConfig {
            max_recovery_attempts: 2,
        });

        let err = runner
            .run_stage(&mut ctx, Stage::Check, RunMode::Sequential)
            .await
            .unwrap_err();
        match err {
            PipelineError::RecoveryExhausted {
                unit,
                attempts,
                message,
            } => {
                assert_eq!(unit, "x");
                assert_eq!(attempts, 2);
                assert!(message.contains("undefined name 'y'"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(ctx.graph.unit("x").unwrap().state(), UnitState::Reviewed);
    }

    #[tokio::test]
    async fn test_unrouted_failure_is_fatal() {
        let mut ctx = WorkflowContext::new("task");
        reviewed_unit(&mut ctx, "x", "def x():\n    return y()");
        let err = runner(MapGenerator::new(&[]))
            .with_router(FailureRouter::new())
            .run_stage(&mut ctx, Stage::Check, RunMode::Sequential)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unrouted(Failure::Bug { .. })));
    }

    #[tokio::test]
    async fn test_handle_critic_rejection_regenerates_unit() {
        let mut ctx = WorkflowContext::new("task");
        reviewed_unit(&mut ctx, "x", "def x():\n    return 1");
        let generator = Arc::new(MapGenerator::new(&[(
            "x",
            &fenced("def x():\n    return 2"),
        )]));
        let worker = GenerationWorker::new(
            generator.clone(),
            Arc::new(TemplatePromptBuilder::new()),
        )
        .with_retry(RetryPolicy::immediate(5));
        let runner = StageRunner::new(worker, Arc::new(BasicValidator::new()));

        let result = runner
            .handle_failure(
                &mut ctx,
                Failure::CriticRejection {
                    unit: "x".to_string(),
                    feedback: "return 2 instead".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(result.changed, ["x"]);
        assert!(ctx.graph.unit("x").unwrap().content.contains("return 2"));
        // feedback recoveries re-enter the review prompt, not the fix prompt
        assert!(generator.prompts()[0].contains("return 2 instead"));
        assert!(generator.prompts()[0].contains("Review the following function"));
        assert!(!generator.prompts()[0].contains("Fix the reported error"));
    }

    #[tokio::test]
    async fn test_handle_human_feedback_without_unit_warns() {
        let mut ctx = WorkflowContext::new("task");
        let result = runner(MapGenerator::new(&[]))
            .handle_failure(
                &mut ctx,
                Failure::HumanFeedback {
                    feedback: "slow down".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(result.changed.is_empty());
        assert_eq!(result.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_unrouted_external_failure_propagates() {
        let mut ctx = WorkflowContext::new("task");
        let chain = FailureRouter::new()
            .with_handler(crate::router::FailureKind::Bug, RecoveryAction::RegenerateWithError);
        let err = runner(MapGenerator::new(&[]))
            .with_router(chain)
            .handle_failure(
                &mut ctx,
                Failure::HumanFeedback {
                    feedback: "anything".to_string(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Unrouted(_)));
    }
}
