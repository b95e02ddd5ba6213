//! Workflow orchestration core: dependency-graph scheduling, capability
//! dispatch, retry/backoff, bounded auto-correction, and run reporting.
//!
//! A declarative [`gantry_core::Plan`] is decomposed into a DAG of steps;
//! ready steps dispatch concurrently to capability-matched agents over an
//! asynchronous request/response channel; successful outputs pass a
//! validation pipeline with bounded auto-correction; and every run, even
//! a failed or cancelled one, terminates in a [`Report`].
//!
//! # Main types
//!
//! - [`Orchestrator`] — Facade exposing plan submission, execution,
//!   agent registration and cancellation.
//! - [`WorkflowEngine`] — Drives one plan's dependency graph to a
//!   terminal report.
//! - [`TaskExecutor`] — Sends one step to one agent with timeout and
//!   retry/backoff policy.
//! - [`ValidationPipeline`] — Post-step checks with bounded
//!   auto-correction.
//! - [`AgentRegistry`] — Capability-to-agent lookup with round-robin
//!   dispatch.
//! - [`MessageChannel`] — Correlated request/response transport.
//! - [`MetricsCollector`] — Per-run counters finalized into a report.

/// The capability interface agents implement.
pub mod agent;
/// Correlated request/response transport.
pub mod channel;
/// The per-plan workflow engine.
pub mod engine;
/// Single-step execution with timeout and retry policy.
pub mod executor;
/// Per-run metrics counters and report finalization.
pub mod metrics;
/// The orchestrator facade.
pub mod orchestrator;
/// Capability-to-agent registry.
pub mod registry;
/// The mutable per-run context (status table, outputs, cancellation).
pub mod run;
/// Shared orchestration types (statuses, results, reports).
pub mod types;
/// Post-step validation and bounded auto-correction.
pub mod validation;

pub use agent::Agent;
pub use channel::{Delivery, MessageChannel};
pub use engine::WorkflowEngine;
pub use executor::{RetryPolicy, TaskExecutor};
pub use metrics::MetricsCollector;
pub use orchestrator::Orchestrator;
pub use registry::AgentRegistry;
pub use run::WorkflowRun;
pub use types::{
    ExecutionResult, Outcome, Report, RunSnapshot, RunStatus, StepState, StepStatus,
    ValidationOutcome,
};
pub use validation::{CheckFailure, ValidationPipeline, Validator};
