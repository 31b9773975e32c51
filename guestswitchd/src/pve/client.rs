use std::time::Duration;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, COOKIE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer};
use tokio::sync::Mutex;
use anyhow::{Context, Result};
use shared::types::{GuestKind, GuestStatus, GuestSummary, NodeSummary};
use crate::pve::{ApiError, PveApi};
use crate::registry::{Credential, ServerDescriptor};

const REQUEST_TIMEOUT_SECS: u64 = 15;
const CSRF_HEADER: &str = "CSRFPreventionToken";

/// Transport settings for a single connection. Each client owns its own,
/// so one self-signed server never relaxes verification for the others.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportConfig {
    pub accept_invalid_certs: bool,
}

/// Every API response is wrapped in `{ "data": ... }`
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct TicketResponse {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf: String,
}

#[derive(Clone)]
struct Ticket {
    cookie: String,
    csrf: String,
}

/// Container listings report `vmid` as a string, VM listings as a number.
#[derive(Deserialize)]
struct RawGuest {
    #[serde(deserialize_with = "vmid_from_any")]
    vmid: u32,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnyVmid {
    Number(u32),
    Text(String),
}

fn vmid_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match AnyVmid::deserialize(deserializer)? {
        AnyVmid::Number(n) => Ok(n),
        AnyVmid::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// HTTP client for the hypervisor management API.
pub struct PveHttpClient {
    base_url: String,
    http: Client,
    credential: Credential,
    ticket: Mutex<Option<Ticket>>,
}

impl PveHttpClient {
    pub fn new(server: &ServerDescriptor) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(server.transport.accept_invalid_certs)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .with_context(|| format!("Failed to build HTTP client for server {}", server.name))?;

        Ok(Self {
            base_url: base_url(&server.host, server.port),
            http,
            credential: server.credential.clone(),
            ticket: Mutex::new(None),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T, ApiError> {
        let mut response = self.send(method.clone(), path).await?;

        // Tickets expire; re-authenticate once
        if response.status() == StatusCode::UNAUTHORIZED
            && matches!(self.credential, Credential::Password { .. })
        {
            tracing::debug!("Ticket rejected for {}, re-authenticating", path);
            *self.ticket.lock().await = None;
            response = self.send(method, path).await?;
        }

        if !response.status().is_success() {
            return Err(ApiError::Status {
                status: response.status().as_u16(),
                path: path.to_string(),
            });
        }

        let envelope: Envelope<T> = response.json().await.map_err(|e| ApiError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(envelope.data)
    }

    async fn send(&self, method: Method, path: &str) -> Result<Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method.clone(), &url);

        match &self.credential {
            Credential::Token { token_id, secret } => {
                request = request.header(AUTHORIZATION, format!("PVEAPIToken={}={}", token_id, secret));
            }
            Credential::Password { .. } => {
                let ticket = self.ticket().await?;
                request = request.header(COOKIE, format!("PVEAuthCookie={}", ticket.cookie));
                if method != Method::GET {
                    request = request.header(CSRF_HEADER, ticket.csrf);
                }
            }
        }

        Ok(request.send().await?)
    }

    async fn ticket(&self) -> Result<Ticket, ApiError> {
        let mut cached = self.ticket.lock().await;
        if let Some(ticket) = cached.as_ref() {
            return Ok(ticket.clone());
        }

        let Credential::Password { username, password } = &self.credential else {
            return Err(ApiError::Auth("ticket requested for token credential".to_string()));
        };

        let response = self
            .http
            .post(format!("{}/access/ticket", self.base_url))
            .form(&[("username", username.as_str()), ("password", password.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Auth(format!(
                "ticket request for {} returned HTTP {}",
                username,
                response.status()
            )));
        }

        let envelope: Envelope<TicketResponse> = response.json().await.map_err(|e| {
            ApiError::Decode {
                path: "/access/ticket".to_string(),
                message: e.to_string(),
            }
        })?;

        let ticket = Ticket {
            cookie: envelope.data.ticket,
            csrf: envelope.data.csrf,
        };
        *cached = Some(ticket.clone());
        Ok(ticket)
    }

    async fn post_status(&self, node: &str, kind: GuestKind, vmid: u32, action: &str) -> Result<(), ApiError> {
        let path = format!("/nodes/{}/{}/{}/status/{}", node, kind.as_path(), vmid, action);
        let _task: IgnoredAny = self.call(Method::POST, &path).await?;
        Ok(())
    }
}

fn base_url(host: &str, port: u16) -> String {
    format!("https://{}:{}/api2/json", host, port)
}

#[async_trait]
impl PveApi for PveHttpClient {
    async fn list_nodes(&self) -> Result<Vec<NodeSummary>, ApiError> {
        self.call(Method::GET, "/nodes").await
    }

    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestSummary>, ApiError> {
        let path = match kind {
            GuestKind::Qemu => format!("/nodes/{}/qemu?full=1", node),
            GuestKind::Lxc => format!("/nodes/{}/lxc", node),
        };
        let raw: Vec<RawGuest> = self.call(Method::GET, &path).await?;
        Ok(raw
            .into_iter()
            .map(|g| GuestSummary {
                vmid: g.vmid,
                name: g.name,
                status: g.status,
            })
            .collect())
    }

    async fn guest_status(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<GuestStatus, ApiError> {
        let path = format!("/nodes/{}/{}/{}/status/current", node, kind.as_path(), vmid);
        self.call(Method::GET, &path).await
    }

    async fn start_guest(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<(), ApiError> {
        self.post_status(node, kind, vmid, "start").await
    }

    async fn stop_guest(&self, node: &str, kind: GuestKind, vmid: u32) -> Result<(), ApiError> {
        self.post_status(node, kind, vmid, "stop").await
    }
}
