//! End-to-end workflow tests.
//!
//! Drives full plans through the orchestrator facade with mock agents:
//! dependency ordering, fatal/transient failure policy, bounded
//! auto-correction, optional-step accounting, and cancellation.

use async_trait::async_trait;
use gantry_core::{AgentFailure, PlanInput};
use gantry_orchestrator::*;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Mock agent — scripted per-step behavior, event log, concurrency gauge
// ---------------------------------------------------------------------------

type Script = dyn Fn(u32) -> Result<Value, AgentFailure> + Send + Sync;

/// Agent that looks up the step id in the request params and runs the
/// scripted behavior for it, recording start/end events.
struct MockAgent {
    id: String,
    capabilities: Vec<String>,
    delay: Duration,
    scripts: Mutex<std::collections::HashMap<String, (u32, Arc<Script>)>>,
    events: Arc<Mutex<Vec<String>>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl MockAgent {
    fn new(capability: &str, events: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Self::with_delay(capability, events, Duration::from_millis(10))
    }

    fn with_delay(
        capability: &str,
        events: Arc<Mutex<Vec<String>>>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: format!("{capability}-agent"),
            capabilities: vec![capability.to_string()],
            delay,
            scripts: Mutex::new(std::collections::HashMap::new()),
            events,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        })
    }

    fn script(
        &self,
        step: &str,
        behavior: impl Fn(u32) -> Result<Value, AgentFailure> + Send + Sync + 'static,
    ) {
        self.scripts
            .lock()
            .insert(step.to_string(), (0, Arc::new(behavior)));
    }

    fn peak_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn id(&self) -> &str {
        &self.id
    }
    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }
    async fn handle(&self, action: &str, params: &Value) -> Result<Value, AgentFailure> {
        let step = params["step"].as_str().unwrap_or("?").to_string();

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.events.lock().push(format!("start:{step}"));

        tokio::time::sleep(self.delay).await;

        let behavior = {
            let mut scripts = self.scripts.lock();
            scripts.get_mut(&step).map(|(calls, behavior)| {
                *calls += 1;
                (*calls, Arc::clone(behavior))
            })
        };
        let outcome = match behavior {
            Some((call, behavior)) => behavior(call),
            None => Ok(json!({"step": step, "action": action})),
        };

        self.events.lock().push(format!("end:{step}"));
        self.running.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

fn diamond_plan() -> PlanInput {
    serde_json::from_value(json!({
        "name": "diamond",
        "steps": [
            {"id": "a", "capability": "generate", "params": {"step": "a"}},
            {"id": "b", "capability": "generate", "depends_on": ["a"],
             "params": {"step": "b"}, "max_retries": 2},
            {"id": "c", "capability": "generate", "depends_on": ["a"],
             "params": {"step": "c"}},
            {"id": "d", "capability": "generate", "depends_on": ["b", "c"],
             "params": {"step": "d"}}
        ]
    }))
    .unwrap()
}

fn events_index(events: &[String], needle: &str) -> usize {
    events
        .iter()
        .position(|e| e == needle)
        .unwrap_or_else(|| panic!("event '{needle}' missing from {events:?}"))
}

// ---------------------------------------------------------------------------
// Test: diamond DAG — B and C run concurrently after A, D after both
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_diamond_ordering() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let agent = MockAgent::new("generate", Arc::clone(&events));

    let orchestrator = Orchestrator::new();
    orchestrator
        .register_agent(Arc::clone(&agent) as Arc<dyn Agent>)
        .unwrap();

    let plan_id = orchestrator.create_project(diamond_plan()).await.unwrap();
    let report = orchestrator.execute_workflow(plan_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.steps_executed, 4);
    assert_eq!(report.steps_succeeded, 4);
    assert_eq!(report.steps_failed, 0);
    assert_eq!(report.steps_retried, 0);

    let events = events.lock();
    // A strictly first, D strictly last.
    assert_eq!(events_index(&events, "start:a"), 0);
    assert!(events_index(&events, "end:a") < events_index(&events, "start:b"));
    assert!(events_index(&events, "end:a") < events_index(&events, "start:c"));
    assert!(events_index(&events, "end:b") < events_index(&events, "start:d"));
    assert!(events_index(&events, "end:c") < events_index(&events, "start:d"));

    // B and C overlapped on the single shared agent.
    assert!(agent.peak_concurrency() >= 2, "b and c should run concurrently");
}

// ---------------------------------------------------------------------------
// Test: fatal failure — one attempt, dependents skipped, sibling survives
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_fatal_failure_skips_dependents() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let agent = MockAgent::new("generate", Arc::clone(&events));
    agent.script("b", |_| Err(AgentFailure::fatal("unrenderable template")));

    let orchestrator = Orchestrator::new();
    orchestrator
        .register_agent(Arc::clone(&agent) as Arc<dyn Agent>)
        .unwrap();

    let plan_id = orchestrator.create_project(diamond_plan()).await.unwrap();
    let report = orchestrator.execute_workflow(plan_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.steps_succeeded, 2); // a and c
    assert_eq!(report.steps_failed, 1); // b
    assert_eq!(report.steps_skipped, 1); // d
    assert_eq!(report.steps_retried, 0);
    // Fatal means exactly one attempt for b despite max_retries = 2.
    assert_eq!(report.total_attempts, 3);

    // The sibling branch ran to completion.
    let events = events.lock();
    assert!(events.contains(&"end:c".to_string()));
    assert!(!events.iter().any(|e| e == "start:d"));
}

// ---------------------------------------------------------------------------
// Test: transient failure — retried with backoff until success
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_transient_retries_then_succeeds() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let agent = MockAgent::new("generate", Arc::clone(&events));
    agent.script("b", |call| {
        if call <= 2 {
            Err(AgentFailure::transient("collaborator busy"))
        } else {
            Ok(json!({"step": "b"}))
        }
    });

    let orchestrator = Orchestrator::new().with_retry_policy(RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    });
    orchestrator
        .register_agent(Arc::clone(&agent) as Arc<dyn Agent>)
        .unwrap();

    let plan_id = orchestrator.create_project(diamond_plan()).await.unwrap();
    let report = orchestrator.execute_workflow(plan_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.steps_succeeded, 4);
    assert_eq!(report.steps_retried, 1);
    // 3 attempts for b + 1 each for a, c, d.
    assert_eq!(report.total_attempts, 6);
}

// ---------------------------------------------------------------------------
// Test: retries exhaust — transient failure becomes a step failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_transient_exhausts_retry_budget() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let agent = MockAgent::new("generate", Arc::clone(&events));
    agent.script("b", |_| Err(AgentFailure::transient("always busy")));

    let orchestrator = Orchestrator::new().with_retry_policy(RetryPolicy {
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    });
    orchestrator
        .register_agent(Arc::clone(&agent) as Arc<dyn Agent>)
        .unwrap();

    let plan_id = orchestrator.create_project(diamond_plan()).await.unwrap();
    let report = orchestrator.execute_workflow(plan_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    // b: max_retries = 2 → 3 attempts, plus a and c.
    assert_eq!(report.total_attempts, 5);
    assert_eq!(report.steps_failed, 1);
    assert_eq!(report.steps_skipped, 1);
}

// ---------------------------------------------------------------------------
// Test: validation + auto-correction accounting
// ---------------------------------------------------------------------------

struct FilesValidator;

impl Validator for FilesValidator {
    fn capability(&self) -> &str {
        "generate"
    }
    fn validate(&self, _step: &gantry_core::StepSpec, output: &Value) -> Vec<CheckFailure> {
        if output.get("generated_files").is_some() {
            Vec::new()
        } else {
            vec![CheckFailure::new(
                "required_fields",
                "output does not declare 'generated_files'",
            )]
        }
    }
}

/// Agent whose first output misses a required field; its corrective
/// action fills it in.
struct SelfHealingAgent {
    id: String,
    capabilities: Vec<String>,
    corrections: Mutex<u32>,
}

#[async_trait]
impl Agent for SelfHealingAgent {
    fn id(&self) -> &str {
        &self.id
    }
    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }
    async fn handle(&self, action: &str, _params: &Value) -> Result<Value, AgentFailure> {
        match action {
            "amend_output" => {
                *self.corrections.lock() += 1;
                Ok(json!({"generated_files": ["README.md"]}))
            }
            _ => Ok(json!({"missing": "the field"})),
        }
    }
    fn corrective_action(&self, check: &str) -> Option<String> {
        (check == "required_fields").then(|| "amend_output".to_string())
    }
}

#[tokio::test]
async fn test_e2e_validation_auto_correction() {
    let agent = Arc::new(SelfHealingAgent {
        id: "generate-agent".to_string(),
        capabilities: vec!["generate".to_string()],
        corrections: Mutex::new(0),
    });

    let orchestrator = Orchestrator::new();
    orchestrator
        .register_agent(Arc::clone(&agent) as Arc<dyn Agent>)
        .unwrap();
    orchestrator.register_validator(Arc::new(FilesValidator));

    let input: PlanInput = serde_json::from_value(json!({
        "name": "validated",
        "steps": [{"id": "a", "capability": "generate"}]
    }))
    .unwrap();
    let plan_id = orchestrator.create_project(input).await.unwrap();
    let report = orchestrator.execute_workflow(plan_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.validations_run, 1);
    assert_eq!(report.auto_corrections_applied, 1);
    assert_eq!(*agent.corrections.lock(), 1);
}

// ---------------------------------------------------------------------------
// Test: optional step failure — counted failed, dependents skipped,
// run still succeeds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_optional_failure_policy() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let agent = MockAgent::new("generate", Arc::clone(&events));
    agent.script("extras", |_| Err(AgentFailure::fatal("nope")));

    let input: PlanInput = serde_json::from_value(json!({
        "name": "optional",
        "steps": [
            {"id": "core", "capability": "generate", "params": {"step": "core"}},
            {"id": "extras", "capability": "generate", "optional": true,
             "params": {"step": "extras"}},
            {"id": "extras_docs", "capability": "generate", "optional": true,
             "depends_on": ["extras"], "params": {"step": "extras_docs"}}
        ]
    }))
    .unwrap();

    let orchestrator = Orchestrator::new();
    orchestrator
        .register_agent(Arc::clone(&agent) as Arc<dyn Agent>)
        .unwrap();
    let plan_id = orchestrator.create_project(input).await.unwrap();
    let report = orchestrator.execute_workflow(plan_id).await.unwrap();

    // The failed optional step still counts as failed; the run does not.
    assert_eq!(report.status, RunStatus::Succeeded);
    assert_eq!(report.steps_succeeded, 1);
    assert_eq!(report.steps_failed, 1);
    assert_eq!(report.steps_skipped, 1);
    assert_eq!(
        report.steps_succeeded + report.steps_failed + report.steps_skipped,
        report.total_steps
    );
}

// ---------------------------------------------------------------------------
// Test: cancellation — in-flight steps finish, nothing new dispatches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_cancellation_mid_run() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let agent = MockAgent::with_delay("generate", Arc::clone(&events), Duration::from_millis(80));

    // Chain a → b → c with a slow enough head to cancel under.
    let input: PlanInput = serde_json::from_value(json!({
        "name": "chain",
        "steps": [
            {"id": "a", "capability": "generate", "params": {"step": "a"}},
            {"id": "b", "capability": "generate", "depends_on": ["a"],
             "params": {"step": "b"}},
            {"id": "c", "capability": "generate", "depends_on": ["b"],
             "params": {"step": "c"}}
        ]
    }))
    .unwrap();

    let orchestrator = Arc::new(Orchestrator::new());
    orchestrator
        .register_agent(Arc::clone(&agent) as Arc<dyn Agent>)
        .unwrap();
    let plan_id = orchestrator.create_project(input).await.unwrap();

    let runner = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.execute_workflow(plan_id).await })
    };

    // Let step a get in flight, then cancel.
    tokio::time::sleep(Duration::from_millis(15)).await;
    orchestrator.cancel_workflow(plan_id).await.unwrap();

    let report = runner.await.unwrap().unwrap();
    assert_eq!(report.status, RunStatus::Cancelled);
    // The in-flight step was allowed to finish and stays succeeded.
    assert_eq!(report.steps_succeeded, 1);
    assert_eq!(report.steps_skipped, 2);
    assert_eq!(
        report.steps_succeeded + report.steps_failed + report.steps_skipped,
        report.total_steps
    );

    let events = events.lock();
    assert!(events.contains(&"end:a".to_string()));
    assert!(!events.iter().any(|e| e == "start:b"));
}

// ---------------------------------------------------------------------------
// Test: every step reaches a terminal state exactly once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_counters_always_sum() {
    for fail_step in ["a", "b", "c", "d"] {
        let events = Arc::new(Mutex::new(Vec::new()));
        let agent = MockAgent::new("generate", Arc::clone(&events));
        agent.script(fail_step, |_| Err(AgentFailure::fatal("boom")));

        let orchestrator = Orchestrator::new();
        orchestrator
            .register_agent(Arc::clone(&agent) as Arc<dyn Agent>)
            .unwrap();
        let plan_id = orchestrator.create_project(diamond_plan()).await.unwrap();
        let report = orchestrator.execute_workflow(plan_id).await.unwrap();

        assert_eq!(report.status, RunStatus::Failed, "failing step {fail_step}");
        assert_eq!(
            report.steps_succeeded + report.steps_failed + report.steps_skipped,
            report.total_steps,
            "counters must sum for failing step {fail_step}"
        );
        assert_eq!(report.steps_failed, 1);
    }
}

// ---------------------------------------------------------------------------
// Test: missing capability fails the step, report still returned
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_e2e_missing_capability_still_reports() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let agent = MockAgent::new("generate", Arc::clone(&events));

    let input: PlanInput = serde_json::from_value(json!({
        "name": "partial",
        "steps": [
            {"id": "a", "capability": "generate", "params": {"step": "a"}},
            {"id": "deploy", "capability": "deploy", "params": {"step": "deploy"}}
        ]
    }))
    .unwrap();

    let orchestrator = Orchestrator::new();
    orchestrator
        .register_agent(Arc::clone(&agent) as Arc<dyn Agent>)
        .unwrap();
    let plan_id = orchestrator.create_project(input).await.unwrap();
    let report = orchestrator.execute_workflow(plan_id).await.unwrap();

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.steps_succeeded, 1);
    assert_eq!(report.steps_failed, 1);
}
