pub mod client;
#[cfg(test)]
pub mod fake;

use std::sync::Arc;
use async_trait::async_trait;
use shared::types::{GuestKind, GuestStatus, GuestSummary, NodeSummary};
use crate::registry::ServerDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status} from {path}")]
    Status { status: u16, path: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
}

/// Capability set of a hypervisor management endpoint.
///
/// Every call may fail with a transport-level error; callers treat all
/// failures uniformly as "unreachable".
#[async_trait]
pub trait PveApi: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, ApiError>;

    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestSummary>, ApiError>;

    async fn guest_status(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<GuestStatus, ApiError>;

    async fn start_guest(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<(), ApiError>;

    async fn stop_guest(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<(), ApiError>;
}

/// Builds an API handle for one configured server.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, server: &ServerDescriptor) -> anyhow::Result<Arc<dyn PveApi>>;
}

/// Connector producing real HTTP clients
pub struct HttpConnector;

impl ApiConnector for HttpConnector {
    fn connect(&self, server: &ServerDescriptor) -> anyhow::Result<Arc<dyn PveApi>> {
        let client = client::PveHttpClient::new(server)?;
        Ok(Arc::new(client))
    }
}
