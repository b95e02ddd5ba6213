use crate::{GantryError, GantryResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// One step of a plan as submitted by the caller.
///
/// This is the external submission mapping; [`Plan::from_input`] turns it
/// into a validated [`StepSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInput {
    /// Step id, unique within the plan.
    pub id: String,
    /// Capability the step requires from an agent.
    pub capability: String,
    /// Action name sent to the resolved agent. Defaults to the capability.
    #[serde(default)]
    pub action: Option<String>,
    /// Action parameters.
    #[serde(default)]
    pub params: HashMap<String, Value>,
    /// Step ids this step depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Maximum retry count after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-step timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether a failure of this step may leave the run successful.
    #[serde(default)]
    pub optional: bool,
}

/// A declarative plan as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanInput {
    /// Human-readable plan name.
    pub name: String,
    /// The steps making up the dependency graph.
    pub steps: Vec<StepInput>,
}

/// A validated step within a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Step id, unique within the plan.
    pub id: String,
    /// Capability the step requires from an agent.
    pub capability: String,
    /// Action name sent to the resolved agent.
    pub action: String,
    /// Action parameters.
    pub params: Value,
    /// Step ids this step depends on.
    pub depends_on: Vec<String>,
    /// Maximum retry count after the first attempt.
    pub max_retries: u32,
    /// Per-step timeout in milliseconds.
    pub timeout_ms: u64,
    /// Whether a failure of this step may leave the run successful.
    pub optional: bool,
}

impl StepSpec {
    /// The step's timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A validated, immutable dependency graph of generation steps.
///
/// Constructed only through [`Plan::from_input`], which rejects duplicate
/// step ids, references to unknown steps, and dependency cycles. Never
/// mutated after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan id assigned at submission.
    pub id: Uuid,
    /// Human-readable plan name.
    pub name: String,
    /// The validated steps, in submission order.
    pub steps: Vec<StepSpec>,
}

impl Plan {
    /// Validates a submitted [`PlanInput`] and builds the plan.
    ///
    /// Fails with [`GantryError::Config`] on an empty name, an empty step
    /// list, a duplicate step id, or a dependency on an unknown step, and
    /// with [`GantryError::CycleDetected`] if the dependency graph is not
    /// acyclic. Nothing is dispatched before these checks pass.
    pub fn from_input(input: PlanInput) -> GantryResult<Self> {
        if input.name.trim().is_empty() {
            return Err(GantryError::Config("plan name must not be empty".into()));
        }
        if input.steps.is_empty() {
            return Err(GantryError::Config(format!(
                "plan '{}' has no steps",
                input.name
            )));
        }

        let mut steps = Vec::with_capacity(input.steps.len());
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for (idx, step) in input.steps.into_iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(GantryError::Config(format!(
                    "step #{idx} has an empty id"
                )));
            }
            if by_id.insert(step.id.clone(), idx).is_some() {
                return Err(GantryError::Config(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            let action = step.action.unwrap_or_else(|| step.capability.clone());
            steps.push(StepSpec {
                id: step.id,
                capability: step.capability,
                action,
                params: Value::Object(step.params.into_iter().collect()),
                depends_on: step.depends_on,
                max_retries: step.max_retries,
                timeout_ms: step.timeout_ms,
                optional: step.optional,
            });
        }

        for step in &steps {
            for dep in &step.depends_on {
                if !by_id.contains_key(dep) {
                    return Err(GantryError::Config(format!(
                        "step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
                if dep == &step.id {
                    return Err(GantryError::CycleDetected(step.id.clone()));
                }
            }
        }

        detect_cycle(&steps, &by_id)?;

        Ok(Self {
            id: Uuid::new_v4(),
            name: input.name,
            steps,
        })
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Total number of steps in the plan.
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Tricolor DFS over the dependency edges. White = unvisited, gray = on
/// the current path, black = fully explored.
fn detect_cycle(steps: &[StepSpec], by_id: &HashMap<String, usize>) -> GantryResult<()> {
    let mut color: HashMap<&str, u8> = HashMap::new();

    fn visit<'a>(
        id: &'a str,
        steps: &'a [StepSpec],
        by_id: &HashMap<String, usize>,
        color: &mut HashMap<&'a str, u8>,
    ) -> GantryResult<()> {
        match color.get(id) {
            Some(1) => return Err(GantryError::CycleDetected(id.to_string())),
            Some(2) => return Ok(()),
            _ => {}
        }
        color.insert(id, 1);
        if let Some(&idx) = by_id.get(id) {
            for dep in &steps[idx].depends_on {
                visit(dep, steps, by_id, color)?;
            }
        }
        color.insert(id, 2);
        Ok(())
    }

    for step in steps {
        visit(&step.id, steps, by_id, &mut color)?;
    }
    Ok(())
}
