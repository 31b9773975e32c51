use std::collections::HashMap;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use shared::types::{AccessoryRecord, ObservedState};
use crate::identity::AccessoryId;
use crate::store_manager::StoreHandle;

/// What the accessory engine needs from the home-automation host.
///
/// Registry calls may touch persistent storage and are awaited. Power
/// pushes and failure reports are fire-and-forget notifications.
#[async_trait]
pub trait AccessoryHost: Send + Sync {
    async fn register_new(&self, record: &AccessoryRecord);

    async fn unregister(&self, id: &AccessoryId);

    fn update_observed_power(&self, id: &AccessoryId, on: bool);

    /// Mark the accessory as not responding
    fn report_communication_failure(&self, id: &AccessoryId);
}

/// Host runtime backed by the SQLite store; keeps the state last pushed
/// for every accessory so the HTTP API can render it.
pub struct BridgeHost {
    store: StoreHandle,
    observed: RwLock<HashMap<AccessoryId, ObservedState>>,
}

impl BridgeHost {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            observed: RwLock::new(HashMap::new()),
        }
    }

    /// Accessories persisted by earlier runs
    pub async fn load_cached(&self) -> anyhow::Result<Vec<AccessoryRecord>> {
        self.store.get_all().await
    }

    pub fn observed(&self, id: &AccessoryId) -> Option<ObservedState> {
        self.observed.read().get(id).copied()
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.store.shutdown().await
    }
}

#[async_trait]
impl AccessoryHost for BridgeHost {
    async fn register_new(&self, record: &AccessoryRecord) {
        match self.store.insert(record.clone()).await {
            Ok(true) => tracing::debug!("Registered accessory {} ({})", record.display_name, record.id),
            Ok(false) => tracing::warn!("Accessory {} ({}) was already registered", record.display_name, record.id),
            Err(e) => tracing::error!("Failed to persist accessory {}: {:#}", record.id, e),
        }
    }

    async fn unregister(&self, id: &AccessoryId) {
        self.observed.write().remove(id);
        if let Err(e) = self.store.remove(id.to_string()).await {
            tracing::error!("Failed to remove accessory {}: {:#}", id, e);
        }
    }

    fn update_observed_power(&self, id: &AccessoryId, on: bool) {
        self.observed.write().insert(
            id.clone(),
            ObservedState {
                on,
                responding: true,
                updated_at: Utc::now(),
            },
        );
    }

    fn report_communication_failure(&self, id: &AccessoryId) {
        let mut observed = self.observed.write();
        let entry = observed.entry(id.clone()).or_insert(ObservedState {
            on: false,
            responding: false,
            updated_at: Utc::now(),
        });
        entry.responding = false;
        entry.updated_at = Utc::now();
    }
}
