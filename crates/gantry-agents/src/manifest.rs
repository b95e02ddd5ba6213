use async_trait::async_trait;
use chrono::Utc;
use gantry_core::AgentFailure;
use gantry_orchestrator::Agent;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

/// Writes the generation manifest (`gantry.json`) into the project's
/// output directory.
///
/// The manifest records what the run produced; it is the only built-in
/// agent with a side effect. I/O failures are reported transient so the
/// executor may retry them.
pub struct ManifestAgent {
    id: String,
    capabilities: Vec<String>,
}

impl ManifestAgent {
    /// Create the agent under its default id.
    pub fn new() -> Self {
        Self {
            id: "manifest-agent".to_string(),
            capabilities: vec!["manifest".to_string()],
        }
    }

    async fn emit(&self, params: &Value) -> Result<Value, AgentFailure> {
        let output_dir = params["output_dir"]
            .as_str()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| AgentFailure::fatal("emit_manifest requires 'output_dir'"))?;
        let name = params["project_name"]
            .as_str()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AgentFailure::fatal("emit_manifest requires 'project_name'"))?;
        let files = params["generated_files"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let manifest = json!({
            "name": name,
            "generator": "gantry",
            "generated_at": Utc::now().to_rfc3339(),
            "generated_files": files,
        });

        let dir = Path::new(output_dir);
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| AgentFailure::transient(format!("creating '{output_dir}': {e}")))?;

        let path = dir.join("gantry.json");
        let body = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| AgentFailure::fatal(format!("serializing manifest: {e}")))?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| AgentFailure::transient(format!("writing '{}': {e}", path.display())))?;

        info!(project = %name, path = %path.display(), "manifest written");
        Ok(json!({
            "manifest_path": path.display().to_string(),
            "file_count": files.len(),
        }))
    }
}

impl Default for ManifestAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ManifestAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    async fn handle(&self, action: &str, params: &Value) -> Result<Value, AgentFailure> {
        match action {
            "manifest" | "emit_manifest" => self.emit(params).await,
            other => Err(AgentFailure::fatal(format!(
                "manifest agent has no action '{other}'"
            ))),
        }
    }
}
