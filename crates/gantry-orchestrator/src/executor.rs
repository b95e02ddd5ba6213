use crate::channel::{Delivery, MessageChannel};
use crate::metrics::MetricsCollector;
use crate::registry::AgentRegistry;
use crate::run::WorkflowRun;
use crate::types::{ExecutionResult, Outcome, StepStatus};
use gantry_core::{AgentFailure, Request, StepSpec};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exponential backoff applied between retry attempts: the base delay
/// doubles per attempt, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Sends one step's request to one capability-matched agent, enforcing
/// the step's timeout and retry policy.
///
/// Timeouts and agent-reported transient failures are retried up to the
/// step's `max_retries` with exponential backoff; fatal failures surface
/// immediately. One [`ExecutionResult`] is produced per attempt and the
/// final attempt's result is returned.
pub struct TaskExecutor {
    registry: Arc<AgentRegistry>,
    channel: Arc<MessageChannel>,
    metrics: Arc<MetricsCollector>,
    policy: RetryPolicy,
    sender: String,
}

impl TaskExecutor {
    /// Sender id stamped on outgoing requests.
    pub const SENDER: &'static str = "orchestrator";

    /// Create an executor over the given registry and channel.
    pub fn new(
        registry: Arc<AgentRegistry>,
        channel: Arc<MessageChannel>,
        metrics: Arc<MetricsCollector>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            channel,
            metrics,
            policy,
            sender: Self::SENDER.to_string(),
        }
    }

    /// The registry this executor resolves agents from.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The run-scoped metrics this executor reports into.
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Execute one step with its resolved parameters.
    ///
    /// Each attempt re-resolves an agent and re-sends the same action and
    /// params. The attempt count never exceeds `max_retries + 1`.
    pub async fn execute(
        &self,
        run: &WorkflowRun,
        step: &StepSpec,
        params: Value,
    ) -> ExecutionResult {
        let started = Instant::now();
        let max_attempts = step.max_retries + 1;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.metrics.record_attempt(attempt);
            run.note_attempt(&step.id);

            let agent = match self.registry.acquire(&step.capability) {
                Ok(agent) => agent,
                Err(e) => {
                    // Nothing can serve this capability; retrying would
                    // resolve against the same empty index.
                    warn!(step = %step.id, capability = %step.capability, error = %e, "resolution failed");
                    return ExecutionResult {
                        step_id: step.id.clone(),
                        agent_id: None,
                        outcome: Outcome::Failed,
                        result: None,
                        error: Some(AgentFailure::fatal(e.to_string())),
                        attempts: attempt,
                        validation: None,
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
            };
            let agent_id = agent.id().to_string();

            let request = Request::new(
                &self.sender,
                &agent_id,
                &step.action,
                params.clone(),
                step.timeout(),
            );
            debug!(
                step = %step.id,
                agent = %agent_id,
                action = %step.action,
                attempt,
                "dispatching step"
            );

            let delivery = self.channel.send(request).await;
            self.registry.release(&agent_id);

            let (outcome, error, result) = match delivery {
                Err(e) => (
                    Outcome::Failed,
                    Some(AgentFailure::fatal(e.to_string())),
                    None,
                ),
                Ok(Delivery::TimedOut) => (
                    Outcome::TimedOut,
                    Some(AgentFailure::transient(format!(
                        "no response within {}ms",
                        step.timeout_ms
                    ))),
                    None,
                ),
                Ok(Delivery::Response(resp)) if resp.is_ok() => {
                    (Outcome::Success, None, resp.result)
                }
                Ok(Delivery::Response(resp)) => {
                    let failure = resp.error.unwrap_or_else(|| {
                        AgentFailure::fatal("agent reported failure without detail")
                    });
                    (Outcome::Failed, Some(failure), None)
                }
            };

            if outcome == Outcome::Success {
                return ExecutionResult {
                    step_id: step.id.clone(),
                    agent_id: Some(agent_id),
                    outcome,
                    result,
                    error: None,
                    attempts: attempt,
                    validation: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }

            let retryable = error.as_ref().map(|e| !e.is_fatal()).unwrap_or(false);
            if retryable && attempt < max_attempts {
                let delay = self.policy.delay_for(attempt);
                warn!(
                    step = %step.id,
                    agent = %agent_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, backing off"
                );
                run.set_status(&step.id, StepStatus::Retrying);
                tokio::time::sleep(delay).await;
                run.set_status(&step.id, StepStatus::Running);
                continue;
            }

            return ExecutionResult {
                step_id: step.id.clone(),
                agent_id: Some(agent_id),
                outcome,
                result: None,
                error,
                attempts: attempt,
                validation: None,
                duration_ms: started.elapsed().as_millis() as u64,
            };
        }
    }

    /// Send a single corrective request to a specific agent on behalf of
    /// the validation pipeline. Not retried, and not counted as an
    /// execution attempt.
    pub async fn send_corrective(
        &self,
        step: &StepSpec,
        agent_id: &str,
        action: &str,
        params: Value,
    ) -> Result<Value, AgentFailure> {
        let request = Request::new(&self.sender, agent_id, action, params, step.timeout());
        self.registry.mark_busy(agent_id);
        let delivery = self.channel.send(request).await;
        self.registry.release(agent_id);

        match delivery {
            Err(e) => Err(AgentFailure::fatal(e.to_string())),
            Ok(Delivery::TimedOut) => Err(AgentFailure::transient(format!(
                "no corrective response within {}ms",
                step.timeout_ms
            ))),
            Ok(Delivery::Response(resp)) if resp.is_ok() => {
                Ok(resp.result.unwrap_or(Value::Null))
            }
            Ok(Delivery::Response(resp)) => Err(resp.error.unwrap_or_else(|| {
                AgentFailure::fatal("agent reported failure without detail")
            })),
        }
    }
}
