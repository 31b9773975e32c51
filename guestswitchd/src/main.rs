mod accessory;
mod api;
mod config;
mod discovery;
mod host;
mod identity;
mod mdns;
mod platform;
mod polling;
mod pve;
mod registry;
mod store;
mod store_manager;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::host::BridgeHost;
use crate::platform::{Platform, PlatformOptions};
use crate::pve::HttpConnector;
use crate::registry::ServerRegistry;
use crate::store::db::AccessoryDb;
use crate::store_manager::StoreHandle;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/guestswitch/guestswitchd.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    // Initialize tracing; the debug flag only changes the default filter
    let default_filter = if config.debug { "guestswitchd=debug" } else { "guestswitchd=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter))
        )
        .init();

    tracing::info!("Starting guestswitchd");
    tracing::info!("Loaded config from {}", config_path);

    if config.servers.is_empty() {
        tracing::error!("No servers configured, configure at least one hypervisor server");
    }

    // Open accessory database and hand its contents to the platform
    let db = AccessoryDb::open(&config.store.db_path)?;
    tracing::info!("Opened database at {:?}", config.store.db_path);
    let host = Arc::new(BridgeHost::new(StoreHandle::spawn(db)));

    let registry = Arc::new(ServerRegistry::connect(&config.servers, &HttpConnector));
    tracing::debug!("Finished initializing platform");

    let platform = Arc::new(Platform::new(
        registry,
        host.clone(),
        PlatformOptions {
            accessory_type: config.default_accessory_type(),
            polling_interval: config.polling_interval_secs(),
        },
    ));

    for record in host.load_cached().await? {
        platform.configure_accessory(record);
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Initial discovery runs in the background so the API is up immediately
    let discovery_platform = platform.clone();
    let discovery_cancel = cancel.clone();
    let discovery_every = config.discovery_interval_secs().map(Duration::from_secs);
    let discovery_handle = tokio::spawn(async move {
        discovery_platform.start().await;
        if let Some(every) = discovery_every {
            discovery_platform.run_discovery(every, discovery_cancel).await;
        }
    });

    // Extract port from listen address
    let api_port = config.api.listen
        .split(':')
        .last()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(8581);

    // Optional self-advertisement
    let mut advertisement = None;
    if let Some(advertise) = config.advertise.as_ref().filter(|a| a.enabled) {
        let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
        if let Some(interface) = &advertise.interface {
            daemon
                .disable_interface(mdns_sd::IfKind::All)
                .context("Failed to disable default interfaces")?;
            daemon
                .enable_interface(interface.as_str())
                .with_context(|| format!("Failed to enable interface {}", interface))?;
        }
        let service_info = mdns::advertise::register_bridge(&daemon, advertise, api_port)?;
        advertisement = Some((daemon, service_info));
    }

    let app = api::routes::router(api::routes::AppState {
        platform: platform.clone(),
        host: host.clone(),
    });

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("API listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();
    discovery_handle.abort();
    let _ = tokio::join!(discovery_handle, server_handle);

    platform.shutdown();

    if let Some((daemon, service_info)) = advertisement {
        if let Err(e) = mdns::advertise::unregister_bridge(&daemon, &service_info) {
            tracing::error!("Failed to unregister mDNS service: {}", e);
        }
        if let Err(e) = daemon.shutdown() {
            tracing::error!("Failed to shutdown mDNS daemon: {}", e);
        }
    }

    // Shutdown store thread
    if let Err(e) = host.shutdown().await {
        tracing::error!("Failed to shutdown store: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
