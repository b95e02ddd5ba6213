use async_trait::async_trait;
use gantry_core::AgentFailure;
use serde_json::Value;

/// The capability interface an external worker implements to receive work
/// from the orchestrator.
///
/// `handle` is synchronous from the agent's point of view but invoked
/// asynchronously by the core: the message channel delivers each request on
/// its own task. Agents distinguish retryable from non-retryable failures
/// through [`AgentFailure::kind`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique agent id within the registry.
    fn id(&self) -> &str;

    /// The capability names this agent declares.
    fn capabilities(&self) -> &[String];

    /// Execute one action and return its result payload, or a classified
    /// failure.
    async fn handle(&self, action: &str, params: &Value) -> Result<Value, AgentFailure>;

    /// The corrective action this agent exposes for a failed validation
    /// check, if any. A `None` means the failure class is not
    /// auto-correctable by this agent.
    fn corrective_action(&self, check: &str) -> Option<String> {
        let _ = check;
        None
    }
}
