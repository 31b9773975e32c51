use std::collections::HashMap;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use anyhow::{Context, Result};
use shared::protocol::{BRIDGE_SERVICE_TYPE, TXT_API_PORT, TXT_VERSION};
use crate::config::AdvertiseConfig;

/// Instance names must be unique on the link, so the hostname is appended
fn instance_name(config: &AdvertiseConfig, hostname: &str) -> String {
    format!("{}-{}", config.instance_name, hostname)
}

/// TXT records that let clients find the HTTP API
fn bridge_txt(api_port: u16) -> HashMap<String, String> {
    HashMap::from([
        (TXT_API_PORT.to_string(), api_port.to_string()),
        (TXT_VERSION.to_string(), env!("CARGO_PKG_VERSION").to_string()),
    ])
}

fn bridge_service(config: &AdvertiseConfig, hostname: &str, api_port: u16) -> Result<ServiceInfo> {
    ServiceInfo::new(
        BRIDGE_SERVICE_TYPE,
        &instance_name(config, hostname),
        &format!("{}.local.", hostname),
        config.address.as_str(),
        api_port,
        bridge_txt(api_port),
    )
    .context("Failed to create ServiceInfo")
}

pub fn register_bridge(
    daemon: &ServiceDaemon,
    config: &AdvertiseConfig,
    api_port: u16,
) -> Result<ServiceInfo> {
    let hostname = hostname::get()
        .context("Failed to get system hostname")?
        .to_string_lossy()
        .to_string();

    let service_info = bridge_service(config, &hostname, api_port)?;

    daemon
        .register(service_info.clone())
        .context("Failed to register mDNS service")?;

    tracing::info!(
        "Advertising bridge as {} (API port {})",
        service_info.get_fullname(),
        api_port
    );

    Ok(service_info)
}

pub fn unregister_bridge(daemon: &ServiceDaemon, service_info: &ServiceInfo) -> Result<()> {
    daemon
        .unregister(service_info.get_fullname())
        .context("Failed to unregister mDNS service")?;

    tracing::info!("Stopped advertising {}", service_info.get_fullname());
    Ok(())
}
