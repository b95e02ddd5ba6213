use async_trait::async_trait;
use gantry_core::AgentFailure;
use gantry_orchestrator::Agent;
use serde_json::{json, Value};
use tracing::info;

/// Declares the file layout a project template expands to.
///
/// Deterministic and side-effect free: the layout is described in the
/// output, not written to disk (that is the manifest/renderer's job).
/// Exposes `amend_scaffold` as the corrective action for missing output
/// fields.
pub struct ScaffoldAgent {
    id: String,
    capabilities: Vec<String>,
}

impl ScaffoldAgent {
    /// Create the agent under its default id.
    pub fn new() -> Self {
        Self {
            id: "scaffold-agent".to_string(),
            capabilities: vec!["scaffold".to_string()],
        }
    }

    /// Create the agent under an explicit id (for pools of scaffolders).
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capabilities: vec!["scaffold".to_string()],
        }
    }

    fn layout_for(template: &str, name: &str) -> Option<Vec<String>> {
        let files: Vec<&str> = match template {
            "web_app" => vec![
                "backend/src/main.rs",
                "backend/Cargo.toml",
                "frontend/index.html",
                "frontend/app.js",
                "docker-compose.yml",
                "README.md",
            ],
            "api" => vec![
                "src/main.rs",
                "src/routes.rs",
                "Cargo.toml",
                "openapi.yaml",
                "README.md",
            ],
            "cli" => vec!["src/main.rs", "src/cli.rs", "Cargo.toml", "README.md"],
            "library" => vec!["src/lib.rs", "Cargo.toml", "README.md"],
            _ => return None,
        };
        Some(
            files
                .into_iter()
                .map(|f| format!("{name}/{f}"))
                .collect(),
        )
    }

    fn scaffold(&self, params: &Value) -> Result<Value, AgentFailure> {
        let name = params["name"]
            .as_str()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AgentFailure::fatal("scaffold requires a 'name' parameter"))?;
        let template = params["template"].as_str().unwrap_or("web_app");

        let files = Self::layout_for(template, name)
            .ok_or_else(|| AgentFailure::fatal(format!("unknown template '{template}'")))?;

        info!(project = %name, template, files = files.len(), "scaffold layout declared");
        Ok(json!({
            "project_name": name,
            "template": template,
            "generated_files": files,
        }))
    }

    /// Rebuild a previous output so it declares the fields validation
    /// found missing.
    fn amend(&self, params: &Value) -> Result<Value, AgentFailure> {
        let mut output = params["previous_output"]
            .as_object()
            .cloned()
            .ok_or_else(|| AgentFailure::fatal("amend_scaffold requires 'previous_output'"))?;

        let original = &params["original_params"];
        let name = output
            .get("project_name")
            .and_then(Value::as_str)
            .or_else(|| original["name"].as_str())
            .unwrap_or("project")
            .to_string();
        let template = output
            .get("template")
            .and_then(Value::as_str)
            .or_else(|| original["template"].as_str())
            .unwrap_or("web_app")
            .to_string();

        if !output.contains_key("generated_files") {
            let files = Self::layout_for(&template, &name)
                .ok_or_else(|| AgentFailure::fatal(format!("unknown template '{template}'")))?;
            output.insert("generated_files".to_string(), json!(files));
        }
        output
            .entry("project_name".to_string())
            .or_insert_with(|| json!(name));
        output
            .entry("template".to_string())
            .or_insert_with(|| json!(template));

        Ok(Value::Object(output))
    }
}

impl Default for ScaffoldAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ScaffoldAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn handle(&self, action: &str, params: &Value) -> Result<Value, AgentFailure> {
        match action {
            "scaffold" => self.scaffold(params),
            "amend_scaffold" => self.amend(params),
            other => Err(AgentFailure::fatal(format!(
                "scaffold agent has no action '{other}'"
            ))),
        }
    }

    fn corrective_action(&self, check: &str) -> Option<String> {
        (check == "required_fields").then(|| "amend_scaffold".to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scaffold_declares_layout() {
        let agent = ScaffoldAgent::new();
        let output = agent
            .handle("scaffold", &json!({"name": "shop", "template": "api"}))
            .await
            .unwrap();
        assert_eq!(output["project_name"], "shop");
        let files = output["generated_files"].as_array().unwrap();
        assert!(files.iter().any(|f| f == "shop/openapi.yaml"));
    }

    #[tokio::test]
    async fn test_scaffold_defaults_to_web_app() {
        let agent = ScaffoldAgent::new();
        let output = agent
            .handle("scaffold", &json!({"name": "shop"}))
            .await
            .unwrap();
        assert_eq!(output["template"], "web_app");
    }

    #[tokio::test]
    async fn test_unknown_template_is_fatal() {
        let agent = ScaffoldAgent::new();
        let err = agent
            .handle("scaffold", &json!({"name": "shop", "template": "cobol"}))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_missing_name_is_fatal() {
        let agent = ScaffoldAgent::new();
        let err = agent.handle("scaffold", &json!({})).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.detail.contains("name"));
    }

    #[tokio::test]
    async fn test_amend_fills_missing_files() {
        let agent = ScaffoldAgent::new();
        let output = agent
            .handle(
                "amend_scaffold",
                &json!({
                    "previous_output": {"project_name": "shop", "template": "cli"},
                    "original_params": {"name": "shop", "template": "cli"},
                    "failed_checks": [{"check": "required_fields", "detail": "..."}],
                }),
            )
            .await
            .unwrap();
        let files = output["generated_files"].as_array().unwrap();
        assert!(files.iter().any(|f| f == "shop/src/cli.rs"));
    }

    #[test]
    fn test_corrective_action_exposure() {
        let agent = ScaffoldAgent::new();
        assert_eq!(
            agent.corrective_action("required_fields").as_deref(),
            Some("amend_scaffold")
        );
        assert!(agent.corrective_action("schema_shape").is_none());
    }
}
