use gantry_core::AgentFailure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a step in the run's status table.
///
/// Transitions are monotone except the bounded `Retrying` → `Running`
/// cycle: Pending → Ready → Running → {Validating → Succeeded | Retrying →
/// Running | Failed}, with `Skipped` as the terminal state for steps whose
/// dependency chain includes a failed step or whose run was cancelled
/// before they started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Validating,
    Retrying,
    Succeeded,
    Failed { reason: String },
    Skipped,
}

impl StepStatus {
    /// Whether the step can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed { .. } | StepStatus::Skipped
        )
    }
}

/// Outcome tag of a step's (final) execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    TimedOut,
}

/// Tagged result of running a step's output through the validation
/// pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// All checks passed on the first pass.
    Passed,
    /// Checks passed after this many corrective round-trips.
    Corrected(u32),
    /// The correction budget is spent and checks still fail.
    Exhausted {
        /// Names of the checks that were still failing.
        failed_checks: Vec<String>,
    },
}

/// Result of executing one step. One instance is produced per attempt;
/// only the final attempt's instance is retained for the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Id of the step this result belongs to.
    pub step_id: String,
    /// Id of the agent that handled the final attempt, when one was
    /// resolved.
    pub agent_id: Option<String>,
    /// Outcome of the final attempt.
    pub outcome: Outcome,
    /// Result payload on success.
    pub result: Option<Value>,
    /// Failure detail otherwise.
    pub error: Option<AgentFailure>,
    /// Number of attempts made, including the final one.
    pub attempts: u32,
    /// Validation outcome, once the pipeline has run.
    pub validation: Option<ValidationOutcome>,
    /// Wall-clock time spent across all attempts, in milliseconds.
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Whether the final attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Terminal status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// The terminal, read-only summary of a workflow run.
///
/// Always produced, even on failure or cancellation; step counters
/// (`steps_succeeded + steps_failed + steps_skipped`) sum to
/// `total_steps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Id of the plan this run executed.
    pub plan_id: Uuid,
    /// Name of the plan this run executed.
    pub plan_name: String,
    /// Terminal run status.
    pub status: RunStatus,
    /// Number of steps in the plan.
    pub total_steps: u64,
    /// Steps that made at least one execution attempt.
    pub steps_executed: u64,
    /// Steps that reached `Succeeded`.
    pub steps_succeeded: u64,
    /// Steps that reached `Failed` (optional steps included).
    pub steps_failed: u64,
    /// Steps that reached `Skipped`.
    pub steps_skipped: u64,
    /// Steps that re-sent their request at least once.
    pub steps_retried: u64,
    /// Execution attempts across all steps (corrective round-trips not
    /// included).
    pub total_attempts: u64,
    /// Validation passes run by the pipeline.
    pub validations_run: u64,
    /// Corrective round-trips applied by the pipeline.
    pub auto_corrections_applied: u64,
    /// Wall-clock duration of the run in milliseconds.
    pub duration_ms: u64,
}

/// Per-step view within a [`RunSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub id: String,
    pub capability: String,
    pub status: StepStatus,
    pub attempts: u32,
}

/// Point-in-time view of a run's step status table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// Id of the plan being executed.
    pub plan_id: Uuid,
    /// Run status at snapshot time.
    pub status: RunStatus,
    /// One entry per plan step, in plan order.
    pub steps: Vec<StepState>,
}

impl RunSnapshot {
    /// Number of steps in a terminal state.
    pub fn terminal_count(&self) -> usize {
        self.steps.iter().filter(|s| s.status.is_terminal()).count()
    }
}
