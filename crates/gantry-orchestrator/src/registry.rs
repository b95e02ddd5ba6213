use crate::agent::Agent;
use gantry_core::{GantryError, GantryResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

struct AgentEntry {
    agent: Arc<dyn Agent>,
    busy: bool,
    /// Monotonic dispatch sequence number, used for the
    /// least-recently-dispatched fallback when every holder is busy.
    last_dispatch: u64,
}

#[derive(Default)]
struct Inner {
    agents: HashMap<String, AgentEntry>,
    /// Capability name → agent ids in registration order.
    by_capability: HashMap<String, Vec<String>>,
    /// Round-robin cursor per capability.
    cursors: HashMap<String, usize>,
    dispatch_seq: u64,
}

/// Maps capability names to registered agent handles.
///
/// Registration, deregistration and resolution are safe under concurrent
/// access from in-flight steps: all state lives behind one short-lived
/// lock that is never held across agent work, so `resolve` never waits on
/// an agent to finish.
///
/// When multiple agents declare the same capability, `resolve` picks
/// round-robin among the currently idle holders and falls back to the
/// least-recently-dispatched holder when all are busy.
#[derive(Default)]
pub struct AgentRegistry {
    inner: Mutex<Inner>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent handle.
    ///
    /// Fails with [`GantryError::DuplicateAgent`] if an agent with the same
    /// id is already registered.
    pub fn register(&self, agent: Arc<dyn Agent>) -> GantryResult<()> {
        let id = agent.id().to_string();
        let capabilities: Vec<String> = agent.capabilities().to_vec();

        let mut inner = self.inner.lock();
        if inner.agents.contains_key(&id) {
            return Err(GantryError::DuplicateAgent(id));
        }
        for cap in &capabilities {
            inner
                .by_capability
                .entry(cap.clone())
                .or_default()
                .push(id.clone());
        }
        inner.agents.insert(
            id.clone(),
            AgentEntry {
                agent,
                busy: false,
                last_dispatch: 0,
            },
        );
        info!(agent = %id, capabilities = ?capabilities, "agent registered");
        Ok(())
    }

    /// Deregister an agent by id. Idempotent: unknown ids are a no-op.
    pub fn unregister(&self, agent_id: &str) {
        let mut inner = self.inner.lock();
        if inner.agents.remove(agent_id).is_some() {
            for holders in inner.by_capability.values_mut() {
                holders.retain(|id| id != agent_id);
            }
            inner.by_capability.retain(|_, holders| !holders.is_empty());
            info!(agent = %agent_id, "agent deregistered");
        }
    }

    /// Resolve one agent declaring the given capability and mark it busy.
    ///
    /// Fails with [`GantryError::NoCapableAgent`] when no registered agent
    /// declares the capability. The caller must pair this with
    /// [`AgentRegistry::release`] once the dispatched request completes.
    pub fn acquire(&self, capability: &str) -> GantryResult<Arc<dyn Agent>> {
        let mut inner = self.inner.lock();

        let holders = inner
            .by_capability
            .get(capability)
            .cloned()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| GantryError::NoCapableAgent(capability.to_string()))?;

        // Round-robin over idle holders first.
        let start = *inner.cursors.get(capability).unwrap_or(&0);
        let mut chosen: Option<String> = None;
        for offset in 0..holders.len() {
            let idx = (start + offset) % holders.len();
            let id = &holders[idx];
            if inner.agents.get(id).map(|e| !e.busy).unwrap_or(false) {
                chosen = Some(id.clone());
                inner.cursors.insert(capability.to_string(), idx + 1);
                break;
            }
        }

        // All busy: least-recently-dispatched holder. Lookup never blocks
        // on agent completion.
        let id = match chosen {
            Some(id) => id,
            None => holders
                .iter()
                .filter_map(|id| inner.agents.get(id).map(|e| (id, e.last_dispatch)))
                .min_by_key(|(_, seq)| *seq)
                .map(|(id, _)| id.clone())
                .ok_or_else(|| GantryError::NoCapableAgent(capability.to_string()))?,
        };

        inner.dispatch_seq += 1;
        let seq = inner.dispatch_seq;
        let entry = inner
            .agents
            .get_mut(&id)
            .ok_or_else(|| GantryError::NoCapableAgent(capability.to_string()))?;
        entry.busy = true;
        entry.last_dispatch = seq;
        debug!(agent = %id, capability = %capability, "agent acquired");
        Ok(Arc::clone(&entry.agent))
    }

    /// Mark a specific agent busy ahead of a directly addressed dispatch
    /// (corrective round-trips target the agent that produced the output).
    pub fn mark_busy(&self, agent_id: &str) {
        let mut inner = self.inner.lock();
        inner.dispatch_seq += 1;
        let seq = inner.dispatch_seq;
        if let Some(entry) = inner.agents.get_mut(agent_id) {
            entry.busy = true;
            entry.last_dispatch = seq;
        }
    }

    /// Mark an agent idle again after a dispatched request completed.
    pub fn release(&self, agent_id: &str) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.agents.get_mut(agent_id) {
            entry.busy = false;
        }
    }

    /// Look up an agent handle by id without touching dispatch state.
    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.inner
            .lock()
            .agents
            .get(agent_id)
            .map(|e| Arc::clone(&e.agent))
    }

    /// Ids of all registered agents.
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().agents.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Capability name → declaring agent ids.
    pub fn capability_index(&self) -> HashMap<String, Vec<String>> {
        self.inner.lock().by_capability.clone()
    }

    /// Number of registered agents.
    pub fn agent_count(&self) -> usize {
        self.inner.lock().agents.len()
    }
}
