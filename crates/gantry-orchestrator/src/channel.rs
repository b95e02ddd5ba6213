use crate::registry::AgentRegistry;
use gantry_core::{AgentFailure, GantryError, GantryResult, Request, Response};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

/// What the channel resolved a send to.
#[derive(Debug)]
pub enum Delivery {
    /// The matching response arrived within the caller's timeout.
    Response(Response),
    /// The timeout elapsed first. The channel does not retry; retry policy
    /// belongs to the task executor.
    TimedOut,
}

impl Delivery {
    /// Whether the send timed out.
    pub fn timed_out(&self) -> bool {
        matches!(self, Delivery::TimedOut)
    }
}

/// In-process request/response transport between the orchestrator and its
/// agents.
///
/// Requests enter through an mpsc ingress queue; a router task hands each
/// one to its recipient agent on a dedicated task, so messages with
/// different correlation ids are delivered independently and unordered
/// relative to one another. Responses are matched back to the awaiting
/// sender through a correlation-id map; a response arriving after its
/// sender timed out is dropped.
pub struct MessageChannel {
    tx: mpsc::Sender<Request>,
    pending: Arc<Mutex<HashMap<Uuid, oneshot::Sender<Response>>>>,
}

impl MessageChannel {
    /// Default depth of the ingress queue.
    pub const DEFAULT_QUEUE_SIZE: usize = 256;

    /// Create a channel routing to the agents in `registry` and start its
    /// router task. The router stops when the channel is dropped.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self::with_queue_size(registry, Self::DEFAULT_QUEUE_SIZE)
    }

    /// Create a channel with an explicit ingress queue depth.
    pub fn with_queue_size(registry: Arc<AgentRegistry>, queue_size: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Request>(queue_size);
        let pending: Arc<Mutex<HashMap<Uuid, oneshot::Sender<Response>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let pending_router = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let registry = Arc::clone(&registry);
                let pending = Arc::clone(&pending_router);
                tokio::spawn(async move {
                    let response = Self::deliver(&registry, &request).await;
                    let waiter = pending.lock().remove(&response.correlation_id);
                    match waiter {
                        Some(tx) => {
                            // A closed receiver means the sender gave up
                            // (timed out) between removal and send.
                            let _ = tx.send(response);
                        }
                        None => debug!(
                            correlation_id = %response.correlation_id,
                            "dropping late response"
                        ),
                    }
                });
            }
        });

        Self { tx, pending }
    }

    /// Hand one request to its recipient and build the response.
    async fn deliver(registry: &AgentRegistry, request: &Request) -> Response {
        let started = Instant::now();
        match registry.get(&request.recipient) {
            Some(agent) => {
                debug!(
                    agent = %request.recipient,
                    action = %request.action,
                    correlation_id = %request.id,
                    "delivering request"
                );
                match agent.handle(&request.action, &request.params).await {
                    Ok(result) => {
                        Response::ok(request, result, started.elapsed().as_millis() as u64)
                    }
                    Err(failure) => {
                        Response::failure(request, failure, started.elapsed().as_millis() as u64)
                    }
                }
            }
            None => {
                warn!(agent = %request.recipient, "request for unregistered agent");
                Response::failure(
                    request,
                    AgentFailure::fatal(format!(
                        "agent '{}' is not registered",
                        request.recipient
                    )),
                    0,
                )
            }
        }
    }

    /// Send a request and await its matching response or the request's
    /// timeout, whichever comes first.
    pub async fn send(&self, request: Request) -> GantryResult<Delivery> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let correlation_id = request.id;
        let timeout = request.timeout();

        self.pending.lock().insert(correlation_id, resp_tx);

        if self.tx.send(request).await.is_err() {
            self.pending.lock().remove(&correlation_id);
            return Err(GantryError::Channel("router task stopped".into()));
        }

        match tokio::time::timeout(timeout, resp_rx).await {
            Ok(Ok(response)) => Ok(Delivery::Response(response)),
            Ok(Err(_)) => Err(GantryError::Channel(
                "response channel closed before reply".into(),
            )),
            Err(_) => {
                // Unhook so a late response is dropped instead of leaking.
                self.pending.lock().remove(&correlation_id);
                debug!(correlation_id = %correlation_id, "request timed out");
                Ok(Delivery::TimedOut)
            }
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }
}
