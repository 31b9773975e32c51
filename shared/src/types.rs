use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two kinds of guest a hypervisor node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    /// Full virtual machine (QEMU)
    Qemu,
    /// Lightweight container (LXC)
    Lxc,
}

impl GuestKind {
    pub const ALL: [GuestKind; 2] = [GuestKind::Qemu, GuestKind::Lxc];

    /// Path segment used by the hypervisor API for this kind
    pub fn as_path(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }

    /// Human readable model name shown by the host
    pub fn model(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "QEMU VM",
            GuestKind::Lxc => "LXC Container",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

/// How an accessory is presented to the home-automation host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessoryType {
    #[default]
    Switch,
    Outlet,
    #[serde(alias = "light")]
    Lightbulb,
    Fan,
}

impl AccessoryType {
    /// Parse a configured value, falling back to `Switch` for anything unknown.
    pub fn from_config(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("outlet") => AccessoryType::Outlet,
            Some("lightbulb") | Some("light") => AccessoryType::Lightbulb,
            Some("fan") => AccessoryType::Fan,
            _ => AccessoryType::Switch,
        }
    }
}

/// A node as reported by the node listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    /// Node name, e.g. "pve1"
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A guest as reported by a per-node guest listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestSummary {
    pub vmid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Current runtime status of a single guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestStatus {
    /// e.g. "running", "stopped", "paused"
    pub status: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// A guest found during a discovery pass.
/// Produced fresh on every pass; never persisted directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDescriptor {
    /// Unique only within a server + node scope
    pub vmid: u32,
    pub name: String,
    pub node: String,
    pub server: String,
    pub kind: GuestKind,
}

/// Persisted per-accessory context. Written once at creation and restored
/// verbatim on every later run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessoryContext {
    pub vmid: u32,
    pub vm_name: String,
    pub node_name: String,
    pub kind: GuestKind,
    pub server_name: String,
    pub accessory_type: AccessoryType,
}

impl AccessoryContext {
    pub fn from_descriptor(guest: &GuestDescriptor, accessory_type: AccessoryType) -> Self {
        Self {
            vmid: guest.vmid,
            vm_name: guest.name.clone(),
            node_name: guest.node.clone(),
            kind: guest.kind,
            server_name: guest.server.clone(),
            accessory_type,
        }
    }
}

/// An accessory as the host runtime stores it across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessoryRecord {
    /// Stable identity token derived from (server, vmid, name)
    pub id: String,
    pub display_name: String,
    pub context: AccessoryContext,
    pub registered_at: DateTime<Utc>,
}

/// What the host currently shows for an accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    pub on: bool,
    /// False once a communication failure was reported, until the next
    /// successful power update
    pub responding: bool,
    pub updated_at: DateTime<Utc>,
}
