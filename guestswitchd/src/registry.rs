use std::fmt;
use std::sync::Arc;
use parking_lot::RwLock;
use shared::protocol::DEFAULT_PVE_USER;
use shared::types::NodeSummary;
use crate::config::{ApiTokenConfig, ServerConfig};
use crate::pve::client::TransportConfig;
use crate::pve::{ApiConnector, PveApi};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server {0}: either password or api_token must be provided")]
    MissingCredential(String),
    #[error("server {0}: plain string API tokens are not supported, use {{ token_id, secret }}")]
    PlainToken(String),
    #[error("server {0}: api_token needs both a non-empty token_id and secret")]
    MalformedToken(String),
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password { username: String, password: String },
    Token { token_id: String, secret: String },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { username, .. } => {
                f.debug_struct("Password").field("username", username).finish_non_exhaustive()
            }
            Credential::Token { token_id, .. } => {
                f.debug_struct("Token").field("token_id", token_id).finish_non_exhaustive()
            }
        }
    }
}

/// Empty strings count as absent
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// A validated server entry. Immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub transport: TransportConfig,
    pub credential: Credential,
}

impl ServerDescriptor {
    /// Validate a server entry and log any warnings it produced
    pub fn from_config(server: &ServerConfig) -> Result<Self, ConfigError> {
        let (descriptor, warnings) = Self::validate(server)?;
        for warning in &warnings {
            tracing::warn!("Server {}: {}", server.name, warning);
        }
        Ok(descriptor)
    }

    /// Check that exactly one usable credential form is present. When both
    /// are supplied the token wins and a warning is returned.
    pub fn validate(server: &ServerConfig) -> Result<(Self, Vec<String>), ConfigError> {
        let mut warnings = Vec::new();

        let token = match &server.api_token {
            None => None,
            Some(ApiTokenConfig::Plain(token)) if token.is_empty() => None,
            Some(ApiTokenConfig::Plain(_)) => {
                return Err(ConfigError::PlainToken(server.name.clone()));
            }
            Some(ApiTokenConfig::Table { token_id, secret }) => {
                match (non_empty(token_id), non_empty(secret)) {
                    (Some(token_id), Some(secret)) => Some(Credential::Token {
                        token_id: token_id.to_string(),
                        secret: secret.to_string(),
                    }),
                    _ => return Err(ConfigError::MalformedToken(server.name.clone())),
                }
            }
            Some(ApiTokenConfig::Other(_)) => {
                return Err(ConfigError::MalformedToken(server.name.clone()));
            }
        };

        let credential = match (token, non_empty(&server.password)) {
            (Some(token), password) => {
                if password.is_some() {
                    warnings.push("both password and api_token provided, using api_token".to_string());
                }
                token
            }
            (None, Some(password)) => Credential::Password {
                username: non_empty(&server.username)
                    .unwrap_or(DEFAULT_PVE_USER)
                    .to_string(),
                password: password.to_string(),
            },
            (None, None) => return Err(ConfigError::MissingCredential(server.name.clone())),
        };

        let descriptor = Self {
            name: server.name.clone(),
            host: server.host.clone(),
            port: server.port(),
            transport: TransportConfig {
                accept_invalid_certs: server.allow_self_signed,
            },
            credential,
        };
        Ok((descriptor, warnings))
    }
}

/// One configured server, its API handle, and its latest node list.
pub struct ServerConnection {
    pub server: ServerDescriptor,
    pub api: Arc<dyn PveApi>,
    nodes: RwLock<Vec<NodeSummary>>,
}

impl ServerConnection {
    pub fn new(server: ServerDescriptor, api: Arc<dyn PveApi>) -> Self {
        Self {
            server,
            api,
            nodes: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot of the current node list
    pub fn nodes(&self) -> Vec<NodeSummary> {
        self.nodes.read().clone()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Query the node list and replace ours wholesale. On failure the list
    /// is emptied so this server is skipped until the next success.
    pub async fn refresh_nodes(&self) -> bool {
        match self.api.list_nodes().await {
            Ok(nodes) => {
                tracing::info!(
                    "Connected to server {} ({}:{}) - found {} nodes",
                    self.server.name,
                    self.server.host,
                    self.server.port,
                    nodes.len()
                );
                *self.nodes.write() = nodes;
                true
            }
            Err(e) => {
                tracing::error!(
                    "Failed to connect to server {} ({}:{}): {}",
                    self.server.name,
                    self.server.host,
                    self.server.port,
                    e
                );
                self.nodes.write().clear();
                false
            }
        }
    }
}

/// The set of servers this bridge talks to
#[derive(Default)]
pub struct ServerRegistry {
    connections: Vec<Arc<ServerConnection>>,
}

impl ServerRegistry {
    /// Build one connection per valid server entry. Invalid entries are
    /// logged and skipped, never fatal.
    pub fn connect(servers: &[ServerConfig], connector: &dyn ApiConnector) -> Self {
        let mut connections = Vec::with_capacity(servers.len());

        for server in servers {
            let descriptor = match ServerDescriptor::from_config(server) {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    tracing::error!("{}", e);
                    continue;
                }
            };

            if connections
                .iter()
                .any(|c: &Arc<ServerConnection>| c.server.name == descriptor.name)
            {
                tracing::error!("Server {}: duplicate server name, skipping", descriptor.name);
                continue;
            }

            let api = match connector.connect(&descriptor) {
                Ok(api) => api,
                Err(e) => {
                    tracing::error!("Server {}: failed to create API client: {:#}", descriptor.name, e);
                    continue;
                }
            };

            match &descriptor.credential {
                Credential::Token { .. } => {
                    tracing::debug!("Server {}: using API token authentication", descriptor.name)
                }
                Credential::Password { .. } => {
                    tracing::debug!("Server {}: using username/password authentication", descriptor.name)
                }
            }

            connections.push(Arc::new(ServerConnection::new(descriptor, api)));
        }

        Self { connections }
    }

    pub fn connections(&self) -> &[Arc<ServerConnection>] {
        &self.connections
    }

    pub fn lookup(&self, server_name: &str) -> Option<Arc<ServerConnection>> {
        self.connections
            .iter()
            .find(|c| c.server.name == server_name)
            .cloned()
    }

    /// Refresh every server's node list and log a summary. Returns the
    /// number of servers that answered.
    pub async fn refresh_all(&self) -> usize {
        let results = futures::future::join_all(
            self.connections.iter().map(|c| c.refresh_nodes()),
        )
        .await;

        let connected = results.iter().filter(|ok| **ok).count();
        tracing::info!(
            "Connection summary: {} servers connected, {} servers failed",
            connected,
            results.len() - connected
        );
        if connected == 0 && !self.connections.is_empty() {
            tracing::error!("No servers are accessible, check configuration and network connectivity");
        }
        connected
    }
}
