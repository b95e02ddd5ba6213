//! Core types and error definitions for the Gantry workflow orchestrator.
//!
//! This crate provides the foundational types shared across all Gantry crates:
//! the unified error enum, the declarative plan model, and the wire messages
//! exchanged between the orchestrator and its agents.
//!
//! # Main types
//!
//! - [`GantryError`] — Unified error enum for all Gantry subsystems.
//! - [`GantryResult`] — Convenience alias for `Result<T, GantryError>`.
//! - [`plan::Plan`] — A validated, immutable DAG of generation steps.
//! - [`plan::StepSpec`] — One capability-bound step within a plan.
//! - [`message::Request`] / [`message::Response`] — Correlated wire messages.
//! - [`message::AgentFailure`] — An agent-reported failure with retry class.

/// Correlated request/response wire messages.
pub mod message;
/// Declarative plan model and submission-time validation.
pub mod plan;

use uuid::Uuid;

/// Top-level error type for the Gantry framework.
///
/// Registry and plan-submission errors are rejected synchronously at the API
/// boundary; execution-time failure classes (timeout, transient, fatal) live
/// on [`message::AgentFailure`] instead, because they surface through the
/// terminal report rather than as errors.
#[derive(Debug, thiserror::Error)]
pub enum GantryError {
    /// An agent with the same id is already registered.
    #[error("Duplicate agent id: {0}")]
    DuplicateAgent(String),

    /// No registered agent declares the requested capability.
    #[error("No agent declares capability '{0}'")]
    NoCapableAgent(String),

    /// The submitted plan's dependency graph contains a cycle.
    #[error("Dependency cycle detected at step '{0}'")]
    CycleDetected(String),

    /// A step's output failed validation and the auto-correction budget
    /// is spent.
    #[error("Validation exhausted for step '{step}': {detail}")]
    ValidationExhausted {
        /// Id of the step that could not be corrected.
        step: String,
        /// The checks that were still failing.
        detail: String,
    },

    /// The workflow run was cancelled by the caller.
    #[error("Workflow cancelled")]
    WorkflowCancelled,

    /// No plan with the given id has been submitted.
    #[error("Plan not found: {0}")]
    PlanNotFound(Uuid),

    /// An error in the message channel between orchestrator and agents.
    #[error("Channel error: {0}")]
    Channel(String),

    /// An error in plan input parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the workflow engine or orchestrator facade.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`GantryError`].
pub type GantryResult<T> = Result<T, GantryError>;

pub use message::{AgentFailure, FailureKind, Request, Response, ResponseStatus};
pub use plan::{Plan, PlanInput, StepInput, StepSpec};
