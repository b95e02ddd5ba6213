//! Built-in generation agents for the Gantry orchestrator.
//!
//! These are the deterministic collaborators a plan dispatches to: a
//! project scaffolder that declares a layout for a template kind, and a
//! manifest emitter that writes the run manifest to disk. A structural
//! validator for required output fields ships alongside them.
//!
//! # Main entry points
//!
//! - [`register_builtins()`] — Register the standard agents and their
//!   validators on an orchestrator.
//! - [`ScaffoldAgent`] — Declares the file layout for a project template.
//! - [`ManifestAgent`] — Writes the generation manifest JSON.
//! - [`RequiredFieldsValidator`] — Checks outputs declare required fields.

/// Manifest emission agent.
pub mod manifest;
/// Project scaffolding agent.
pub mod scaffold;
/// Structural output validators.
pub mod validators;

pub use manifest::ManifestAgent;
pub use scaffold::ScaffoldAgent;
pub use validators::RequiredFieldsValidator;

use gantry_core::GantryResult;
use gantry_orchestrator::Orchestrator;
use std::sync::Arc;

/// Register the built-in agents and their validators.
pub fn register_builtins(orchestrator: &Orchestrator) -> GantryResult<()> {
    orchestrator.register_agent(Arc::new(ScaffoldAgent::new()))?;
    orchestrator.register_agent(Arc::new(ManifestAgent::new()))?;
    orchestrator.register_validator(Arc::new(RequiredFieldsValidator::new("scaffold")));
    Ok(())
}
