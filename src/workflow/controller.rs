//! The workflow state machine.
//!
//! Drives one run through fetch, generate, evaluate, and finalize. Retries
//! are driven only by evaluation scores through [`decide`]; any stage fault
//! before the decision rule ends the run in `FAILED`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::Instrument;

use super::decision::{decide, Decision};
use super::error::{WorkflowError, WorkflowResult};
use super::finalizer::ArtifactFinalizer;
use super::model::{EvaluationVerdict, GenerationAttempt, Status, WorkflowRun};
use super::stages::{ArtifactPersister, CodeEvaluator, CodeGenerator, DependencyClient};

/// Summary handed back to the caller of [`WorkflowController::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub item_id: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meets_threshold: Option<bool>,
    pub iteration_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunReport {
    /// Whether the run completed.
    pub fn is_success(&self) -> bool {
        self.status == Status::Completed
    }
}

impl From<&WorkflowRun> for RunReport {
    fn from(run: &WorkflowRun) -> Self {
        Self {
            run_id: run.run_id.clone(),
            item_id: run.item_id.clone(),
            status: run.status,
            final_score: run.current_verdict.as_ref().map(|v| v.score),
            meets_threshold: run.current_verdict.as_ref().map(|v| v.meets_threshold),
            iteration_count: run.iteration_count,
            artifact_location: run.final_artifact.as_ref().map(|a| a.location.clone()),
            error: run.failure.clone(),
        }
    }
}

/// Owns the collaborators and sequences them for each run.
///
/// A controller holds no per-run state, so one instance can drive many
/// independent runs concurrently.
pub struct WorkflowController {
    client: Arc<dyn DependencyClient>,
    generator: Arc<dyn CodeGenerator>,
    evaluator: Arc<dyn CodeEvaluator>,
    persister: Arc<dyn ArtifactPersister>,
    finalizer: ArtifactFinalizer,
    stage_timeout: Option<Duration>,
}

impl WorkflowController {
    /// Create a controller with the default finalizer and no stage timeout.
    pub fn new(
        client: Arc<dyn DependencyClient>,
        generator: Arc<dyn CodeGenerator>,
        evaluator: Arc<dyn CodeEvaluator>,
        persister: Arc<dyn ArtifactPersister>,
    ) -> Self {
        Self {
            client,
            generator,
            evaluator,
            persister,
            finalizer: ArtifactFinalizer::default(),
            stage_timeout: None,
        }
    }

    /// Use a specific finalizer.
    pub fn with_finalizer(mut self, finalizer: ArtifactFinalizer) -> Self {
        self.finalizer = finalizer;
        self
    }

    /// Bound every stage call by `timeout` (`None` disables).
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Run the workflow for one work item.
    pub async fn run(&self, item_id: &str, max_iterations: u32) -> RunReport {
        let run = self.execute(WorkflowRun::new(item_id, max_iterations)).await;
        RunReport::from(&run)
    }

    /// Run the workflow for several work items, at most `concurrency` at a time.
    ///
    /// Reports come back in the order of `item_ids`.
    pub async fn run_many(
        &self,
        item_ids: &[String],
        max_iterations: u32,
        concurrency: usize,
    ) -> Vec<RunReport> {
        stream::iter(item_ids)
            .map(|id| self.run(id, max_iterations))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    /// Drive a run until it reaches a terminal status.
    pub async fn execute(&self, run: WorkflowRun) -> WorkflowRun {
        let span = tracing::info_span!("workflow", run_id = %run.run_id, item = %run.item_id);

        async move {
            tracing::info!(max_iterations = run.max_iterations, "Starting workflow");

            let mut run = run;
            while !run.status.is_terminal() {
                run = self.step(run).await;
            }

            log_summary(&run);
            run
        }
        .instrument(span)
        .await
    }

    /// Perform the work of the current status and move to the next one.
    pub async fn step(&self, run: WorkflowRun) -> WorkflowRun {
        match run.status {
            Status::Initializing => Self::start(run),
            Status::Fetching => self.fetch(run).await,
            Status::Generating => self.generate(run).await,
            Status::Evaluating => self.evaluate(run).await,
            Status::Finalizing => self.finalize(run).await,
            Status::Completed | Status::Failed => run,
        }
    }

    fn start(run: WorkflowRun) -> WorkflowRun {
        if run.max_iterations == 0 {
            return run.fail(WorkflowError::InvalidInput(
                "max_iterations must be greater than zero".to_string(),
            ));
        }
        run.transition(Status::Fetching)
    }

    async fn fetch(&self, run: WorkflowRun) -> WorkflowRun {
        tracing::info!("Fetching work item");

        match self.bounded("fetch", self.client.fetch(&run.item_id)).await {
            Ok(graph) => {
                tracing::info!(
                    name = %graph.item.name,
                    blocked_by = graph.blocked_by.len(),
                    blocking = graph.blocking.len(),
                    unresolved = graph.unresolved_count(),
                    "Work item fetched"
                );
                run.with_graph(graph).transition(Status::Generating)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch work item");
                run.fail(e)
            }
        }
    }

    async fn generate(&self, run: WorkflowRun) -> WorkflowRun {
        let (run, iteration) = run.begin_generation();
        tracing::info!(iteration, generator = self.generator.name(), "Generating code");

        match self.call_generator(&run).await {
            Ok(code) => {
                tracing::info!(iteration, chars = code.len(), "Code generated");
                let attempt = GenerationAttempt { iteration, code, produced_at: Utc::now() };
                run.with_attempt(attempt).transition(Status::Evaluating)
            }
            Err(e) => {
                tracing::error!(iteration, error = %e, "Code generation failed");
                run.fail(e)
            }
        }
    }

    async fn call_generator(&self, run: &WorkflowRun) -> WorkflowResult<String> {
        let graph = run
            .dependency_graph
            .as_ref()
            .ok_or_else(|| WorkflowError::InvalidState("generation before fetch".to_string()))?;

        let generation =
            self.generator.generate(&graph.item, graph, run.current_verdict.as_ref());
        self.bounded("generation", generation).await
    }

    async fn evaluate(&self, run: WorkflowRun) -> WorkflowRun {
        tracing::info!(iteration = run.iteration_count, "Evaluating code");

        let verdict = self.call_evaluator(&run).await;
        let decision = decide(&verdict, run.iteration_count, run.max_iterations);
        match decision {
            Decision::Accept => {
                tracing::info!(score = verdict.score, "Code meets requirements threshold");
            }
            Decision::Exhausted => {
                tracing::warn!(
                    score = verdict.score,
                    max_iterations = run.max_iterations,
                    "Max iterations reached, proceeding with current code"
                );
            }
            Decision::Retry => {
                tracing::info!(
                    score = verdict.score,
                    next_iteration = run.iteration_count + 1,
                    "Code needs improvement, regenerating"
                );
            }
        }

        run.with_verdict(verdict).transition(decision.next_status())
    }

    async fn call_evaluator(&self, run: &WorkflowRun) -> EvaluationVerdict {
        let (Some(item), Some(attempt)) = (run.item(), run.current_attempt.as_ref()) else {
            return EvaluationVerdict::degraded("nothing to evaluate");
        };

        let evaluation = self.evaluator.evaluate(item, attempt);
        match self.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, evaluation).await.unwrap_or_else(|_| {
                EvaluationVerdict::degraded(format!("timed out after {}s", limit.as_secs()))
            }),
            None => evaluation.await,
        }
    }

    async fn finalize(&self, run: WorkflowRun) -> WorkflowRun {
        tracing::info!("Creating code artifact");

        let artifact = match self.finalizer.finalize(&run) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::error!(error = %e, "Failed to render artifact");
                return run.fail(e);
            }
        };

        match self.bounded("finalization", self.persister.save(&artifact)).await {
            Ok(location) => run.complete(location, artifact),
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist artifact");
                run.fail(e)
            }
        }
    }

    /// Apply the stage timeout to a fallible stage call.
    async fn bounded<T, F>(&self, stage: &'static str, call: F) -> WorkflowResult<T>
    where
        F: Future<Output = WorkflowResult<T>>,
    {
        match self.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| WorkflowError::Timeout { stage, seconds: limit.as_secs() })?,
            None => call.await,
        }
    }
}

fn log_summary(run: &WorkflowRun) {
    let score = run.current_verdict.as_ref().map(|v| v.score);
    let location = run.final_artifact.as_ref().map(|a| a.location.as_str());

    match run.status {
        Status::Completed => tracing::info!(
            status = %run.status,
            iterations = run.iteration_count,
            score,
            location,
            "Workflow completed"
        ),
        _ => tracing::error!(
            status = %run.status,
            iterations = run.iteration_count,
            cause = run.failure.as_deref().unwrap_or("unknown"),
            "Workflow failed"
        ),
    }
}
