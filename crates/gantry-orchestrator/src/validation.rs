use crate::executor::TaskExecutor;
use crate::types::{ExecutionResult, Outcome, ValidationOutcome};
use gantry_core::{AgentFailure, GantryError, StepSpec};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A single failed structural check.
#[derive(Debug, Clone, Serialize)]
pub struct CheckFailure {
    /// Name of the check, used to look up a corrective action.
    pub check: String,
    /// What the check found.
    pub detail: String,
}

impl CheckFailure {
    /// Creates a check failure.
    pub fn new(check: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            detail: detail.into(),
        }
    }
}

/// Capability-specific structural checks supplied by the external
/// collaborator, registered alongside the capability they cover.
pub trait Validator: Send + Sync {
    /// The capability whose outputs this validator checks.
    fn capability(&self) -> &str;

    /// Run every check against a successful step output. An empty vec
    /// means the output is valid.
    fn validate(&self, step: &StepSpec, output: &Value) -> Vec<CheckFailure>;
}

/// Runs post-step checks and bounded auto-correction.
///
/// When a check fails and the producing agent exposes a corrective action
/// for it, the pipeline issues one corrective request through the task
/// executor and re-validates, up to `max_corrections` round-trips
/// (default 1). Spending the budget, or hitting a failure no corrective
/// action covers, marks the step failed with a validation-exhausted
/// error; the loop is never unbounded.
pub struct ValidationPipeline {
    validators: RwLock<HashMap<String, Arc<dyn Validator>>>,
    max_corrections: u32,
}

impl Default for ValidationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationPipeline {
    /// Create a pipeline with the default correction budget of 1.
    pub fn new() -> Self {
        Self {
            validators: RwLock::new(HashMap::new()),
            max_corrections: 1,
        }
    }

    /// Override the auto-correction budget per step.
    pub fn with_max_corrections(mut self, max_corrections: u32) -> Self {
        self.max_corrections = max_corrections;
        self
    }

    /// Register a validator for its capability, replacing any previous one.
    pub fn register(&self, validator: Arc<dyn Validator>) {
        let capability = validator.capability().to_string();
        self.validators.write().insert(capability, validator);
    }

    /// Number of registered validators.
    pub fn validator_count(&self) -> usize {
        self.validators.read().len()
    }

    /// Validate a successful execution result, auto-correcting within the
    /// budget. Returns the result with its validation outcome settled;
    /// on exhaustion the outcome flips to `Failed`.
    pub async fn run(
        &self,
        executor: &TaskExecutor,
        step: &StepSpec,
        mut result: ExecutionResult,
    ) -> ExecutionResult {
        let validator = self.validators.read().get(&step.capability).cloned();
        let Some(validator) = validator else {
            // No checks supplied for this capability.
            return result;
        };

        executor.metrics().record_validation();

        let mut output = result.result.clone().unwrap_or(Value::Null);
        let mut corrections = 0u32;

        loop {
            let failures = validator.validate(step, &output);
            if failures.is_empty() {
                result.validation = Some(if corrections == 0 {
                    ValidationOutcome::Passed
                } else {
                    ValidationOutcome::Corrected(corrections)
                });
                result.result = Some(output);
                return result;
            }

            let failed_checks: Vec<String> =
                failures.iter().map(|f| f.check.clone()).collect();

            if corrections >= self.max_corrections {
                warn!(
                    step = %step.id,
                    checks = ?failed_checks,
                    corrections,
                    "correction budget spent, validation exhausted"
                );
                return exhausted(result, step, failed_checks);
            }

            let agent = result
                .agent_id
                .as_deref()
                .and_then(|id| executor.registry().get(id));
            let Some(agent) = agent else {
                warn!(step = %step.id, "producing agent no longer registered");
                return exhausted(result, step, failed_checks);
            };

            // Every failing check must map to a corrective action, or the
            // failure class is not auto-correctable at all.
            let mut action = None;
            for failure in &failures {
                match agent.corrective_action(&failure.check) {
                    Some(a) => {
                        action.get_or_insert(a);
                    }
                    None => {
                        action = None;
                        break;
                    }
                }
            }
            let Some(action) = action else {
                return exhausted(result, step, failed_checks);
            };

            corrections += 1;
            executor.metrics().record_correction();
            info!(
                step = %step.id,
                agent = %agent.id(),
                action = %action,
                checks = ?failed_checks,
                "issuing corrective request"
            );

            let params = json!({
                "original_params": step.params,
                "previous_output": output,
                "failed_checks": failures,
            });
            match executor.send_corrective(step, agent.id(), &action, params).await {
                Ok(corrected) => output = corrected,
                Err(failure) => {
                    warn!(step = %step.id, detail = %failure.detail, "corrective request failed");
                    return exhausted(result, step, failed_checks);
                }
            }
        }
    }
}

fn exhausted(
    mut result: ExecutionResult,
    step: &StepSpec,
    failed_checks: Vec<String>,
) -> ExecutionResult {
    result.outcome = Outcome::Failed;
    let error = GantryError::ValidationExhausted {
        step: step.id.clone(),
        detail: format!("failing checks [{}]", failed_checks.join(", ")),
    };
    result.error = Some(AgentFailure::fatal(error.to_string()));
    result.result = None;
    result.validation = Some(ValidationOutcome::Exhausted { failed_checks });
    result
}
