use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// How an agent classifies a failure it reports.
///
/// The task executor retries `Transient` failures up to the step's retry
/// budget; `Fatal` failures surface immediately without retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Retrying may help: busy collaborator, transient I/O, timeout.
    Transient,
    /// Retrying cannot help: malformed input, unsatisfiable request.
    Fatal,
}

/// A failure reported by an agent while handling an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentFailure {
    /// Whether the failure is worth retrying.
    pub kind: FailureKind,
    /// Human-readable description of what went wrong.
    pub detail: String,
}

impl AgentFailure {
    /// Creates a retryable failure.
    pub fn transient(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            detail: detail.into(),
        }
    }

    /// Creates a non-retryable failure.
    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            detail: detail.into(),
        }
    }

    /// Whether this failure must not be retried.
    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::Fatal
    }
}

/// A request dispatched to an agent over the message channel.
///
/// The request `id` doubles as the correlation id: the matching
/// [`Response`] echoes it back in `correlation_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Unique message id, reused by the response as correlation id.
    pub id: Uuid,
    /// Id of the sending component (the orchestrator, usually).
    pub sender: String,
    /// Agent id the router should deliver to.
    pub recipient: String,
    /// Action name the agent should execute.
    pub action: String,
    /// Action parameters.
    pub params: Value,
    /// How long the sender will wait for the matching response.
    pub timeout_ms: u64,
    /// UTC timestamp of when the request was created.
    pub timestamp: DateTime<Utc>,
}

impl Request {
    /// Creates a new request with a fresh correlation id.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        action: impl Into<String>,
        params: Value,
        timeout: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            recipient: recipient.into(),
            action: action.into(),
            params,
            timeout_ms: timeout.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    /// The sender's wait deadline as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Outcome tag on a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The agent handled the action and produced a result.
    Ok,
    /// The agent reported a failure; see [`Response::error`].
    Error,
}

/// The response matched to a [`Request`] by correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Echo of the originating request's id.
    pub correlation_id: Uuid,
    /// Agent id that produced this response.
    pub sender: String,
    /// Id of the component awaiting the response.
    pub recipient: String,
    /// Outcome tag.
    pub status: ResponseStatus,
    /// Result payload when `status` is [`ResponseStatus::Ok`].
    pub result: Option<Value>,
    /// Failure detail when `status` is [`ResponseStatus::Error`].
    pub error: Option<AgentFailure>,
    /// Agent-side handling time in milliseconds.
    pub elapsed_ms: u64,
    /// UTC timestamp of when the response was created.
    pub timestamp: DateTime<Utc>,
}

impl Response {
    /// Creates a successful response to the given request.
    pub fn ok(request: &Request, result: Value, elapsed_ms: u64) -> Self {
        Self {
            correlation_id: request.id,
            sender: request.recipient.clone(),
            recipient: request.sender.clone(),
            status: ResponseStatus::Ok,
            result: Some(result),
            error: None,
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    /// Creates a failure response to the given request.
    pub fn failure(request: &Request, failure: AgentFailure, elapsed_ms: u64) -> Self {
        Self {
            correlation_id: request.id,
            sender: request.recipient.clone(),
            recipient: request.sender.clone(),
            status: ResponseStatus::Error,
            result: None,
            error: Some(failure),
            elapsed_ms,
            timestamp: Utc::now(),
        }
    }

    /// Whether the agent handled the action successfully.
    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_echoes_correlation_id() {
        let req = Request::new(
            "orchestrator",
            "scaffold-1",
            "scaffold",
            json!({"template": "web_app"}),
            Duration::from_secs(30),
        );
        let resp = Response::ok(&req, json!({"generated_files": []}), 12);
        assert_eq!(resp.correlation_id, req.id);
        assert_eq!(resp.sender, "scaffold-1");
        assert_eq!(resp.recipient, "orchestrator");
        assert!(resp.is_ok());
    }

    #[test]
    fn test_failure_response_carries_kind() {
        let req = Request::new(
            "orchestrator",
            "scaffold-1",
            "scaffold",
            json!({}),
            Duration::from_secs(1),
        );
        let resp = Response::failure(&req, AgentFailure::fatal("bad template"), 3);
        assert!(!resp.is_ok());
        let err = resp.error.unwrap();
        assert!(err.is_fatal());
        assert_eq!(err.detail, "bad template");
    }

    #[test]
    fn test_transient_is_not_fatal() {
        assert!(!AgentFailure::transient("busy").is_fatal());
    }

    #[test]
    fn test_request_timeout_roundtrip() {
        let req = Request::new(
            "orchestrator",
            "a",
            "act",
            json!({}),
            Duration::from_millis(1500),
        );
        assert_eq!(req.timeout_ms, 1500);
        assert_eq!(req.timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn test_message_serialization() {
        let req = Request::new(
            "orchestrator",
            "manifest-1",
            "emit_manifest",
            json!({"name": "demo"}),
            Duration::from_secs(5),
        );
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("emit_manifest"));
        let parsed: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, req.id);
        assert_eq!(parsed.timeout_ms, 5000);
    }
}
