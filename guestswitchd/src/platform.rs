use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use shared::types::{AccessoryRecord, AccessoryType, GuestDescriptor};
use crate::accessory::{GuestAccessory, SetupOutcome};
use crate::discovery;
use crate::host::AccessoryHost;
use crate::identity::{self, AccessoryId, Registration};
use crate::registry::ServerRegistry;

#[derive(Debug, Clone, Copy)]
pub struct PlatformOptions {
    /// Presentation type given to newly created accessories
    pub accessory_type: AccessoryType,
    pub polling_interval: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    Restored,
    /// A live accessory already exists for this identity
    AlreadyLive,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub created: usize,
    pub restored: usize,
    pub unchanged: usize,
}

/// Ties servers, discovery, identities and live accessories together.
pub struct Platform {
    registry: Arc<ServerRegistry>,
    host: Arc<dyn AccessoryHost>,
    options: PlatformOptions,
    /// Records known to the host: restored at startup plus every one created since
    cached: Mutex<Vec<AccessoryRecord>>,
    accessories: RwLock<HashMap<AccessoryId, Arc<GuestAccessory>>>,
}

impl Platform {
    pub fn new(
        registry: Arc<ServerRegistry>,
        host: Arc<dyn AccessoryHost>,
        options: PlatformOptions,
    ) -> Self {
        Self {
            registry,
            host,
            options,
            cached: Mutex::new(Vec::new()),
            accessories: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.registry
    }

    /// Called once per accessory the host restored from disk
    pub fn configure_accessory(&self, record: AccessoryRecord) {
        tracing::info!("Loading accessory from cache: {}", record.display_name);
        self.cached.lock().push(record);
    }

    /// Connect to every server, drop accessories of servers that are gone,
    /// then run the first discovery pass.
    pub async fn start(&self) -> DiscoverySummary {
        self.registry.refresh_all().await;
        self.retire_orphans().await;
        let summary = self.discover().await;
        tracing::debug!("Finished initial discovery");
        summary
    }

    /// Records whose server is no longer configured get an accessory whose
    /// setup deregisters it.
    async fn retire_orphans(&self) {
        let orphans: Vec<AccessoryRecord> = self
            .cached
            .lock()
            .iter()
            .filter(|r| self.registry.lookup(&r.context.server_name).is_none())
            .cloned()
            .collect();

        for record in orphans {
            let accessory = GuestAccessory::new(
                record,
                Arc::clone(&self.registry),
                Arc::clone(&self.host),
                None,
            );
            if accessory.setup().await == SetupOutcome::ServerMissing {
                self.forget(accessory.id());
            }
        }
    }

    /// One discovery pass over every server
    pub async fn discover(&self) -> DiscoverySummary {
        let guests = discovery::discover_all(self.registry.connections()).await;

        let mut summary = DiscoverySummary::default();
        for guest in &guests {
            match self.register_device(guest).await {
                RegisterOutcome::Created => summary.created += 1,
                RegisterOutcome::Restored => summary.restored += 1,
                RegisterOutcome::AlreadyLive => summary.unchanged += 1,
            }
        }

        tracing::info!(
            "Discovery pass: {} guests, {} new, {} restored, {} unchanged",
            guests.len(),
            summary.created,
            summary.restored,
            summary.unchanged
        );
        summary
    }

    /// Match a discovered guest to an accessory: reuse a live one, restore a
    /// cached record verbatim, or create and register a new one.
    pub async fn register_device(&self, guest: &GuestDescriptor) -> RegisterOutcome {
        let id = identity::resolve(guest);
        if self.accessories.read().contains_key(&id) {
            tracing::debug!("Accessory {} ({}) already live", guest.name, id);
            return RegisterOutcome::AlreadyLive;
        }

        let registration = {
            let cached = self.cached.lock();
            identity::reconcile(&id, guest, &cached, self.options.accessory_type)
        };

        match registration {
            Registration::Restore(record) => {
                tracing::info!("Restoring existing accessory from cache: {}", record.display_name);
                self.spawn_accessory(id, record);
                RegisterOutcome::Restored
            }
            Registration::Create(record) => {
                tracing::info!("Adding new accessory: {}", record.display_name);
                self.spawn_accessory(id, record.clone());
                self.host.register_new(&record).await;
                self.cached.lock().push(record);
                RegisterOutcome::Created
            }
        }
    }

    fn spawn_accessory(&self, id: AccessoryId, record: AccessoryRecord) {
        let accessory = GuestAccessory::launch(
            record,
            Arc::clone(&self.registry),
            Arc::clone(&self.host),
            self.options.polling_interval,
        );
        self.accessories.write().insert(id, accessory);
    }

    fn forget(&self, id: &AccessoryId) {
        if let Some(accessory) = self.accessories.write().remove(id) {
            accessory.destroy();
        }
        self.cached.lock().retain(|r| r.id != id.as_str());
    }

    pub fn get(&self, id: &AccessoryId) -> Option<Arc<GuestAccessory>> {
        self.accessories.read().get(id).cloned()
    }

    /// Live accessories ordered by display name
    pub fn accessories(&self) -> Vec<Arc<GuestAccessory>> {
        let mut all: Vec<_> = self.accessories.read().values().cloned().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()).then_with(|| a.id().cmp(b.id())));
        all
    }

    /// Explicitly re-run an accessory's node lookup
    pub async fn rebind(&self, id: &AccessoryId) -> Option<SetupOutcome> {
        let accessory = self.get(id)?;
        let outcome = accessory.setup().await;
        if outcome == SetupOutcome::ServerMissing {
            self.forget(id);
        }
        Some(outcome)
    }

    /// Periodically refresh node lists and look for new guests until cancelled
    pub async fn run_discovery(self: Arc<Self>, every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.registry.refresh_all().await;
                    self.discover().await;
                }
                _ = cancel.cancelled() => {
                    tracing::info!("Discovery loop shutting down");
                    break;
                }
            }
        }
    }

    /// Stop every accessory's background work
    pub fn shutdown(&self) {
        let accessories: Vec<_> = self.accessories.write().drain().map(|(_, a)| a).collect();
        for accessory in accessories {
            accessory.destroy();
        }
    }
}
