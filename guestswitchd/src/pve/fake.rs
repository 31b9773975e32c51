use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::types::{GuestKind, GuestStatus, GuestSummary, NodeSummary};
use crate::pve::{ApiConnector, ApiError, PveApi};
use crate::registry::ServerDescriptor;

/// Scripted in-memory hypervisor that records every call it receives.
#[derive(Default)]
pub struct FakePve {
    state: Mutex<FakeState>,
}

#[derive(Default)]
struct FakeState {
    nodes: Vec<NodeSummary>,
    nodes_fail: bool,
    guests: HashMap<(String, GuestKind), Vec<GuestSummary>>,
    unreachable_nodes: HashSet<String>,
    statuses: HashMap<u32, String>,
    status_fails: HashSet<u32>,
    commands_fail: bool,
    calls: Vec<String>,
}

fn unreachable(what: &str) -> ApiError {
    ApiError::Status {
        status: 595,
        path: what.to_string(),
    }
}

impl FakePve {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(&self, node: &str) {
        self.state.lock().nodes.push(NodeSummary {
            node: node.to_string(),
            status: Some("online".to_string()),
        });
    }

    pub fn add_guest(&self, node: &str, kind: GuestKind, vmid: u32, name: &str, status: &str) {
        let mut state = self.state.lock();
        state
            .guests
            .entry((node.to_string(), kind))
            .or_default()
            .push(GuestSummary {
                vmid,
                name: Some(name.to_string()),
                status: Some(status.to_string()),
            });
        state.statuses.insert(vmid, status.to_string());
    }

    pub fn set_status(&self, vmid: u32, status: &str) {
        self.state.lock().statuses.insert(vmid, status.to_string());
    }

    pub fn fail_nodes(&self, fail: bool) {
        self.state.lock().nodes_fail = fail;
    }

    pub fn fail_node(&self, node: &str) {
        self.state.lock().unreachable_nodes.insert(node.to_string());
    }

    pub fn recover_node(&self, node: &str) {
        self.state.lock().unreachable_nodes.remove(node);
    }

    pub fn fail_status(&self, vmid: u32, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.status_fails.insert(vmid);
        } else {
            state.status_fails.remove(&vmid);
        }
    }

    pub fn fail_commands(&self, fail: bool) {
        self.state.lock().commands_fail = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of recorded calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn guest_name(state: &FakeState, vmid: u32) -> Option<String> {
        state
            .guests
            .values()
            .flatten()
            .find(|g| g.vmid == vmid)
            .and_then(|g| g.name.clone())
    }
}

#[async_trait]
impl PveApi for FakePve {
    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, ApiError> {
        let mut state = self.state.lock();
        state.calls.push("list_nodes".to_string());
        if state.nodes_fail {
            return Err(unreachable("/nodes"));
        }
        Ok(state.nodes.clone())
    }

    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestSummary>, ApiError> {
        let mut state = self.state.lock();
        state.calls.push(format!("list_guests:{}:{}", node, kind));
        if state.unreachable_nodes.contains(node) {
            return Err(unreachable(node));
        }
        Ok(state
            .guests
            .get(&(node.to_string(), kind))
            .cloned()
            .unwrap_or_default())
    }

    async fn guest_status(&self, node: &str, _kind: GuestKind, vmid: u32) -> Result<GuestStatus, ApiError> {
        let mut state = self.state.lock();
        state.calls.push(format!("status:{}", vmid));
        if state.status_fails.contains(&vmid) || state.unreachable_nodes.contains(node) {
            return Err(unreachable("status/current"));
        }
        let status = state
            .statuses
            .get(&vmid)
            .cloned()
            .ok_or_else(|| unreachable("status/current"))?;
        Ok(GuestStatus {
            status,
            name: Self::guest_name(&state, vmid),
        })
    }

    async fn start_guest(&self, _node: &str, _kind: GuestKind, vmid: u32) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.calls.push(format!("start:{}", vmid));
        if state.commands_fail {
            return Err(unreachable("status/start"));
        }
        state.statuses.insert(vmid, "running".to_string());
        Ok(())
    }

    async fn stop_guest(&self, _node: &str, _kind: GuestKind, vmid: u32) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.calls.push(format!("stop:{}", vmid));
        if state.commands_fail {
            return Err(unreachable("status/stop"));
        }
        state.statuses.insert(vmid, "stopped".to_string());
        Ok(())
    }
}

/// Hands out a pre-built fake per server name
#[derive(Default)]
pub struct FakeConnector {
    servers: HashMap<String, Arc<FakePve>>,
}

impl FakeConnector {
    pub fn with(mut self, server: &str, api: Arc<FakePve>) -> Self {
        self.servers.insert(server.to_string(), api);
        self
    }
}

impl ApiConnector for FakeConnector {
    fn connect(&self, server: &ServerDescriptor) -> anyhow::Result<Arc<dyn PveApi>> {
        let api = self
            .servers
            .get(&server.name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no fake for server {}", server.name))?;
        Ok(api as Arc<dyn PveApi>)
    }
}
