use gantry_core::StepSpec;
use gantry_orchestrator::{CheckFailure, Validator};
use serde_json::Value;

/// Checks that a step's output declares every field the plan requires.
///
/// The required field names come from the step's own `requires` parameter
/// (an array of strings); a step without one has no checks. Failures are
/// reported under the `required_fields` check name, which agents may map
/// to a corrective action.
pub struct RequiredFieldsValidator {
    capability: String,
}

impl RequiredFieldsValidator {
    /// Create a validator for the given capability.
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

impl Validator for RequiredFieldsValidator {
    fn capability(&self) -> &str {
        &self.capability
    }

    fn validate(&self, step: &StepSpec, output: &Value) -> Vec<CheckFailure> {
        let Some(required) = step.params.get("requires").and_then(Value::as_array) else {
            return Vec::new();
        };
        required
            .iter()
            .filter_map(Value::as_str)
            .filter(|field| output.get(field).is_none())
            .map(|field| {
                CheckFailure::new(
                    "required_fields",
                    format!("output does not declare required field '{field}'"),
                )
            })
            .collect()
    }
}
