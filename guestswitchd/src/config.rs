use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use shared::protocol::{DEFAULT_PVE_PORT, MIN_POLLING_INTERVAL_SECS};
use shared::types::AccessoryType;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub debug: bool,
    /// Presentation type for newly created accessories
    #[serde(default)]
    pub accessory_type: Option<String>,
    /// Seconds between background status polls, absent or 0 disables polling
    #[serde(default)]
    pub polling_interval: Option<u64>,
    /// Seconds between discovery passes, absent or 0 runs discovery once
    #[serde(default)]
    pub discovery_interval: Option<u64>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub advertise: Option<AdvertiseConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// Skip certificate verification for this server only
    #[serde(default, alias = "ssl")]
    pub allow_self_signed: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_token: Option<ApiTokenConfig>,
}

/// Parsed leniently so one bad entry only costs its own server;
/// the shape is checked in `ServerDescriptor::from_config`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiTokenConfig {
    Table {
        #[serde(default)]
        token_id: Option<String>,
        #[serde(default)]
        secret: Option<String>,
    },
    /// Unsupported, rejected during validation
    Plain(String),
    Other(toml::Value),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvertiseConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub address: String,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default = "default_instance_name")]
    pub instance_name: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/guestswitch/accessories.db")
}

fn default_listen() -> String {
    "[::]:8581".to_string()
}

fn default_true() -> bool {
    true
}

fn default_instance_name() -> String {
    "guestswitch".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ServerConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PVE_PORT)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        Ok(config)
    }

    pub fn default_accessory_type(&self) -> AccessoryType {
        AccessoryType::from_config(self.accessory_type.as_deref())
    }

    /// Effective polling period, `None` when polling is disabled
    pub fn polling_interval_secs(&self) -> Option<u64> {
        self.polling_interval
            .filter(|secs| *secs >= MIN_POLLING_INTERVAL_SECS)
    }

    pub fn discovery_interval_secs(&self) -> Option<u64> {
        self.discovery_interval.filter(|secs| *secs > 0)
    }
}
