use crate::executor::TaskExecutor;
use crate::run::WorkflowRun;
use crate::types::{ExecutionResult, Outcome, Report, RunSnapshot, StepStatus};
use crate::validation::ValidationPipeline;
use gantry_core::{AgentFailure, Plan, StepSpec};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// What a spawned step task reports back to the dispatch loop.
enum StepCompletion {
    /// The step finished executing (and validating, when applicable).
    Finished {
        step_id: String,
        result: ExecutionResult,
    },
    /// Cancellation landed before the step started running.
    NotStarted { step_id: String },
}

/// Drives one plan to its terminal report.
///
/// The engine rescans readiness after every terminal transition and
/// dispatches every ready step concurrently, optionally bounded by a
/// global concurrency limit. All cross-step transitions (skip cascades,
/// finalization) happen in the dispatch loop; a step task writes only its
/// own status while it runs.
pub struct WorkflowEngine {
    run: Arc<WorkflowRun>,
    executor: Arc<TaskExecutor>,
    pipeline: Arc<ValidationPipeline>,
    concurrency: Option<Arc<Semaphore>>,
}

impl WorkflowEngine {
    /// Create an engine for one plan. Cycle detection already happened at
    /// plan submission; the engine assumes a valid DAG.
    pub fn new(
        plan: Arc<Plan>,
        executor: Arc<TaskExecutor>,
        pipeline: Arc<ValidationPipeline>,
    ) -> Self {
        let run = Arc::new(WorkflowRun::new(plan, Arc::clone(executor.metrics())));
        Self {
            run,
            executor,
            pipeline,
            concurrency: None,
        }
    }

    /// Bound the number of steps executing at once.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    /// The run context this engine drives.
    pub fn run_context(&self) -> &Arc<WorkflowRun> {
        &self.run
    }

    /// Stop dispatching new steps; in-flight steps finish and the run
    /// finalizes with a `Cancelled` report.
    pub fn cancel(&self) {
        info!(plan = %self.run.plan().name, "cancellation requested");
        self.run.cancel();
    }

    /// Point-in-time view of the step status table.
    pub fn snapshot(&self) -> RunSnapshot {
        self.run.snapshot()
    }

    /// Execute the plan to completion and produce the terminal report.
    ///
    /// Always returns a report: partial success, failure and
    /// cancellation are all representable terminal states.
    pub async fn execute(&self) -> Report {
        let started = Instant::now();
        let plan = Arc::clone(self.run.plan());
        info!(
            plan = %plan.name,
            plan_id = %plan.id,
            steps = plan.step_count(),
            "workflow run started"
        );

        let mut in_flight: JoinSet<StepCompletion> = JoinSet::new();

        loop {
            for step in self.run.claim_ready() {
                let run = Arc::clone(&self.run);
                let executor = Arc::clone(&self.executor);
                let pipeline = Arc::clone(&self.pipeline);
                let permit_source = self.concurrency.clone();
                in_flight.spawn(async move {
                    run_step(run, executor, pipeline, permit_source, step).await
                });
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };
            match joined {
                Ok(completion) => self.apply(completion),
                Err(e) => {
                    // The stall guard at finalization skips whatever step
                    // the lost task belonged to.
                    error!(error = %e, "step task aborted");
                }
            }
        }

        let leftover = self.run.skip_remaining();
        if leftover > 0 && !self.run.is_cancelled() {
            warn!(
                plan = %plan.name,
                skipped = leftover,
                "steps could not make progress"
            );
        }

        let status = self.run.finalize();
        let report = self
            .executor
            .metrics()
            .finalize(&plan, status, started.elapsed());
        info!(
            plan = %plan.name,
            status = ?report.status,
            succeeded = report.steps_succeeded,
            failed = report.steps_failed,
            skipped = report.steps_skipped,
            duration_ms = report.duration_ms,
            "workflow run finished"
        );
        report
    }

    /// Apply a step task's completion to the status table.
    fn apply(&self, completion: StepCompletion) {
        match completion {
            StepCompletion::NotStarted { step_id } => {
                self.run.mark_skipped(&step_id);
            }
            StepCompletion::Finished { step_id, result } => {
                if result.is_success() {
                    info!(step = %step_id, attempts = result.attempts, "step succeeded");
                    self.run
                        .mark_succeeded(&step_id, result.result.unwrap_or(Value::Null));
                    return;
                }

                let reason = result
                    .error
                    .as_ref()
                    .map(|e| e.detail.clone())
                    .unwrap_or_else(|| "unknown failure".to_string());
                let optional = self
                    .run
                    .plan()
                    .step(&step_id)
                    .map(|s| s.optional)
                    .unwrap_or(false);
                warn!(
                    step = %step_id,
                    outcome = ?result.outcome,
                    attempts = result.attempts,
                    optional,
                    reason = %reason,
                    "step failed"
                );
                self.run.mark_failed(&step_id, reason);

                let skipped = self.run.skip_dependents(&step_id);
                if !skipped.is_empty() {
                    info!(step = %step_id, dependents = ?skipped, "skipped dependents");
                }
            }
        }
    }
}

/// Body of one spawned step task.
async fn run_step(
    run: Arc<WorkflowRun>,
    executor: Arc<TaskExecutor>,
    pipeline: Arc<ValidationPipeline>,
    permit_source: Option<Arc<Semaphore>>,
    step: StepSpec,
) -> StepCompletion {
    let _permit = match permit_source {
        Some(semaphore) => semaphore.acquire_owned().await.ok(),
        None => None,
    };

    // Cancellation may have landed while this step waited for a slot.
    if run.is_cancelled() {
        return StepCompletion::NotStarted { step_id: step.id };
    }

    run.set_status(&step.id, StepStatus::Running);

    let params = match run.resolve_params(&step) {
        Ok(params) => params,
        Err(detail) => {
            return StepCompletion::Finished {
                step_id: step.id.clone(),
                result: ExecutionResult {
                    step_id: step.id,
                    agent_id: None,
                    outcome: Outcome::Failed,
                    result: None,
                    error: Some(AgentFailure::fatal(detail)),
                    attempts: 0,
                    validation: None,
                    duration_ms: 0,
                },
            };
        }
    };

    let mut result = executor.execute(&run, &step, params).await;

    if result.is_success() {
        run.set_status(&step.id, StepStatus::Validating);
        result = pipeline.run(&executor, &step, result).await;
    }

    StepCompletion::Finished {
        step_id: step.id,
        result,
    }
}
