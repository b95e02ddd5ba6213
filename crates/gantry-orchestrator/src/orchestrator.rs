use crate::agent::Agent;
use crate::channel::MessageChannel;
use crate::engine::WorkflowEngine;
use crate::executor::{RetryPolicy, TaskExecutor};
use crate::metrics::MetricsCollector;
use crate::registry::AgentRegistry;
use crate::types::{Report, RunSnapshot};
use crate::validation::{ValidationPipeline, Validator};
use gantry_core::{GantryError, GantryResult, Plan, PlanInput};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Facade over the orchestration core.
///
/// Owns the agent registry, the message channel and the validation
/// pipeline, and creates one workflow engine plus one metrics collector
/// per run; there is no process-wide mutable instance behind it.
///
/// Must be created within a tokio runtime (the channel starts its router
/// task on construction).
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    channel: Arc<MessageChannel>,
    pipeline: Arc<ValidationPipeline>,
    plans: RwLock<HashMap<Uuid, Arc<Plan>>>,
    engines: RwLock<HashMap<Uuid, Arc<WorkflowEngine>>>,
    policy: RetryPolicy,
    max_concurrency: Option<usize>,
}

impl Orchestrator {
    /// Create an orchestrator with an empty registry and default policies.
    pub fn new() -> Self {
        let registry = Arc::new(AgentRegistry::new());
        let channel = Arc::new(MessageChannel::new(Arc::clone(&registry)));
        Self {
            registry,
            channel,
            pipeline: Arc::new(ValidationPipeline::new()),
            plans: RwLock::new(HashMap::new()),
            engines: RwLock::new(HashMap::new()),
            policy: RetryPolicy::default(),
            max_concurrency: None,
        }
    }

    /// Override the executor's retry backoff policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound how many steps run at once per workflow.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Override the validation pipeline's auto-correction budget.
    pub fn with_max_corrections(mut self, max_corrections: u32) -> Self {
        self.pipeline = Arc::new(ValidationPipeline::new().with_max_corrections(max_corrections));
        self
    }

    /// The shared agent registry.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Register an agent. Fails with [`GantryError::DuplicateAgent`] if
    /// the id is taken.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) -> GantryResult<()> {
        self.registry.register(agent)
    }

    /// Deregister an agent by id. Idempotent.
    pub fn unregister_agent(&self, agent_id: &str) {
        self.registry.unregister(agent_id);
    }

    /// Register a capability validator on the pipeline.
    pub fn register_validator(&self, validator: Arc<dyn Validator>) {
        self.pipeline.register(validator);
    }

    /// Validate and store a plan; returns its id.
    ///
    /// Duplicate step ids, unknown dependencies and dependency cycles are
    /// rejected here, before anything is dispatched.
    pub async fn create_project(&self, input: PlanInput) -> GantryResult<Uuid> {
        let plan = Plan::from_input(input)?;
        let plan_id = plan.id;
        info!(plan = %plan.name, plan_id = %plan_id, steps = plan.step_count(), "plan accepted");
        self.plans.write().await.insert(plan_id, Arc::new(plan));
        Ok(plan_id)
    }

    /// Execute a previously submitted plan to its terminal report.
    ///
    /// Each invocation gets a fresh engine and metrics collector. A plan
    /// already executing cannot be started twice.
    pub async fn execute_workflow(&self, plan_id: Uuid) -> GantryResult<Report> {
        let plan = self
            .plans
            .read()
            .await
            .get(&plan_id)
            .cloned()
            .ok_or(GantryError::PlanNotFound(plan_id))?;

        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.channel),
            Arc::new(MetricsCollector::new()),
            self.policy,
        ));
        let mut engine = WorkflowEngine::new(plan, executor, Arc::clone(&self.pipeline));
        if let Some(limit) = self.max_concurrency {
            engine = engine.with_max_concurrency(limit);
        }
        let engine = Arc::new(engine);

        {
            let mut engines = self.engines.write().await;
            if engines.contains_key(&plan_id) {
                return Err(GantryError::Orchestrator(format!(
                    "plan {plan_id} is already executing"
                )));
            }
            engines.insert(plan_id, Arc::clone(&engine));
        }

        let report = engine.execute().await;
        self.engines.write().await.remove(&plan_id);
        Ok(report)
    }

    /// Request cancellation of an in-progress run. A submitted but idle
    /// plan is a no-op; an unknown plan id is an error.
    pub async fn cancel_workflow(&self, plan_id: Uuid) -> GantryResult<()> {
        if let Some(engine) = self.engines.read().await.get(&plan_id) {
            engine.cancel();
            return Ok(());
        }
        if self.plans.read().await.contains_key(&plan_id) {
            return Ok(());
        }
        Err(GantryError::PlanNotFound(plan_id))
    }

    /// Status snapshot of an in-progress run, if the plan is executing.
    pub async fn workflow_snapshot(&self, plan_id: Uuid) -> Option<RunSnapshot> {
        self.engines
            .read()
            .await
            .get(&plan_id)
            .map(|engine| engine.snapshot())
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}
