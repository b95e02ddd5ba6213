use crate::metrics::MetricsCollector;
use crate::types::{RunSnapshot, RunStatus, StepState, StepStatus};
use gantry_core::{Plan, StepSpec};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

struct StepEntry {
    status: StepStatus,
    attempts: u32,
}

struct RunState {
    status: RunStatus,
    steps: HashMap<String, StepEntry>,
    /// Successful step outputs, kept for downstream parameter resolution.
    results: HashMap<String, Value>,
}

/// The mutable context of one workflow run: the step status table, the
/// store of successful outputs, and the run's metrics.
///
/// Passed explicitly to every component call for the run; there is no
/// process-wide instance. Step tasks only ever write their own step's
/// entry; cross-step transitions (skips, finalization) happen in the
/// engine's dispatch loop.
pub struct WorkflowRun {
    plan: Arc<Plan>,
    metrics: Arc<MetricsCollector>,
    state: RwLock<RunState>,
    cancelled: AtomicBool,
    /// Step id → ids of steps that directly depend on it.
    dependents: HashMap<String, Vec<String>>,
}

impl WorkflowRun {
    /// Create the run context for a plan with all steps `Pending`.
    pub fn new(plan: Arc<Plan>, metrics: Arc<MetricsCollector>) -> Self {
        let steps = plan
            .steps
            .iter()
            .map(|s| {
                (
                    s.id.clone(),
                    StepEntry {
                        status: StepStatus::Pending,
                        attempts: 0,
                    },
                )
            })
            .collect();

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for step in &plan.steps {
            for dep in &step.depends_on {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(step.id.clone());
            }
        }

        Self {
            plan,
            metrics,
            state: RwLock::new(RunState {
                status: RunStatus::Running,
                steps,
                results: HashMap::new(),
            }),
            cancelled: AtomicBool::new(false),
            dependents,
        }
    }

    /// The plan this run executes.
    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    /// The run's metrics collector.
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Request cancellation: no new steps are dispatched, in-flight steps
    /// finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Transition one step's status. Terminal states are never
    /// overwritten.
    pub fn set_status(&self, step_id: &str, status: StepStatus) {
        let mut state = self.state.write();
        if let Some(entry) = state.steps.get_mut(step_id) {
            if entry.status.is_terminal() {
                warn!(step = %step_id, ?status, "ignoring transition out of terminal state");
                return;
            }
            debug!(step = %step_id, from = ?entry.status, to = ?status, "step transition");
            entry.status = status;
        }
    }

    /// Current status of a step.
    pub fn status_of(&self, step_id: &str) -> Option<StepStatus> {
        self.state.read().steps.get(step_id).map(|e| e.status.clone())
    }

    /// Record one execution attempt against the step's snapshot entry.
    pub fn note_attempt(&self, step_id: &str) {
        if let Some(entry) = self.state.write().steps.get_mut(step_id) {
            entry.attempts += 1;
        }
    }

    /// Claim every `Pending` step whose dependencies have all `Succeeded`,
    /// marking each `Ready`. Returns nothing once cancellation was
    /// requested.
    pub fn claim_ready(&self) -> Vec<StepSpec> {
        if self.is_cancelled() {
            return Vec::new();
        }
        let mut state = self.state.write();
        let mut ready = Vec::new();
        for step in &self.plan.steps {
            let pending = state
                .steps
                .get(&step.id)
                .map(|e| e.status == StepStatus::Pending)
                .unwrap_or(false);
            if !pending {
                continue;
            }
            let deps_met = step.depends_on.iter().all(|dep| {
                state
                    .steps
                    .get(dep)
                    .map(|e| e.status == StepStatus::Succeeded)
                    .unwrap_or(false)
            });
            if deps_met {
                if let Some(entry) = state.steps.get_mut(&step.id) {
                    entry.status = StepStatus::Ready;
                }
                ready.push(step.clone());
            }
        }
        ready
    }

    /// Resolve `{{dep}}` / `{{dep.field}}` references in the step's params
    /// against stored dependency outputs. Only declared dependencies are in
    /// scope; unresolvable references are an error.
    pub fn resolve_params(&self, step: &StepSpec) -> Result<Value, String> {
        let state = self.state.read();
        resolve_value(step, &step.params, &state.results)
    }

    /// Mark a step `Succeeded` and store its output for dependents.
    pub fn mark_succeeded(&self, step_id: &str, output: Value) {
        self.set_status(step_id, StepStatus::Succeeded);
        self.state.write().results.insert(step_id.to_string(), output);
        self.metrics.record_step_succeeded();
    }

    /// Mark a step `Failed`.
    pub fn mark_failed(&self, step_id: &str, reason: impl Into<String>) {
        self.set_status(
            step_id,
            StepStatus::Failed {
                reason: reason.into(),
            },
        );
        self.metrics.record_step_failed();
    }

    /// Mark a single not-yet-started step `Skipped`.
    pub fn mark_skipped(&self, step_id: &str) {
        self.set_status(step_id, StepStatus::Skipped);
        self.metrics.record_step_skipped();
    }

    /// Skip every not-yet-started step whose dependency chain includes the
    /// given step. Returns the skipped step ids.
    pub fn skip_dependents(&self, step_id: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        let mut queue: Vec<&str> = vec![step_id];
        let mut state = self.state.write();
        while let Some(current) = queue.pop() {
            if let Some(children) = self.dependents.get(current) {
                for child in children {
                    let not_started = state
                        .steps
                        .get(child)
                        .map(|e| {
                            matches!(e.status, StepStatus::Pending | StepStatus::Ready)
                        })
                        .unwrap_or(false);
                    if not_started {
                        if let Some(entry) = state.steps.get_mut(child) {
                            entry.status = StepStatus::Skipped;
                        }
                        self.metrics.record_step_skipped();
                        skipped.push(child.clone());
                    }
                    queue.push(child);
                }
            }
        }
        skipped
    }

    /// Skip whatever never reached a terminal state. Used at finalization
    /// after cancellation (or as a stall guard).
    pub fn skip_remaining(&self) -> usize {
        let mut state = self.state.write();
        let mut count = 0;
        for entry in state.steps.values_mut() {
            if !entry.status.is_terminal() {
                entry.status = StepStatus::Skipped;
                self.metrics.record_step_skipped();
                count += 1;
            }
        }
        count
    }

    /// Whether every step reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.state
            .read()
            .steps
            .values()
            .all(|e| e.status.is_terminal())
    }

    /// Settle the run's terminal status: `Cancelled` wins, then `Failed`
    /// if any non-optional step failed, otherwise `Succeeded`.
    pub fn finalize(&self) -> RunStatus {
        let mut state = self.state.write();
        let status = if self.is_cancelled() {
            RunStatus::Cancelled
        } else {
            let non_optional_failure = self.plan.steps.iter().any(|s| {
                !s.optional
                    && matches!(
                        state.steps.get(&s.id).map(|e| &e.status),
                        Some(StepStatus::Failed { .. }) | Some(StepStatus::Skipped)
                    )
            });
            if non_optional_failure {
                RunStatus::Failed
            } else {
                RunStatus::Succeeded
            }
        };
        state.status = status;
        status
    }

    /// Point-in-time view of the status table, in plan order.
    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.state.read();
        RunSnapshot {
            plan_id: self.plan.id,
            status: state.status,
            steps: self
                .plan
                .steps
                .iter()
                .filter_map(|s| {
                    state.steps.get(&s.id).map(|e| StepState {
                        id: s.id.clone(),
                        capability: s.capability.clone(),
                        status: e.status.clone(),
                        attempts: e.attempts,
                    })
                })
                .collect(),
        }
    }
}

fn resolve_value(
    step: &StepSpec,
    value: &Value,
    results: &HashMap<String, Value>,
) -> Result<Value, String> {
    match value {
        Value::String(s) => match reference_of(s) {
            Some((dep, field)) => {
                if !step.depends_on.iter().any(|d| d == dep) {
                    return Err(format!(
                        "step '{}' references '{{{{{dep}}}}}' which is not a declared dependency",
                        step.id
                    ));
                }
                let output = results
                    .get(dep)
                    .ok_or_else(|| format!("no stored output for dependency '{dep}'"))?;
                match field {
                    None => Ok(output.clone()),
                    Some(field) => output.get(field).cloned().ok_or_else(|| {
                        format!("output of dependency '{dep}' has no field '{field}'")
                    }),
                }
            }
            None => Ok(value.clone()),
        },
        Value::Object(map) => {
            let mut resolved = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                resolved.insert(k.clone(), resolve_value(step, v, results)?);
            }
            Ok(Value::Object(resolved))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(step, v, results))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        _ => Ok(value.clone()),
    }
}

/// Parse `{{dep}}` / `{{dep.field}}` into its parts.
fn reference_of(s: &str) -> Option<(&str, Option<&str>)> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?.trim();
    if inner.is_empty() {
        return None;
    }
    match inner.split_once('.') {
        Some((dep, field)) => Some((dep.trim(), Some(field.trim()))),
        None => Some((inner, None)),
    }
}
