use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use shared::protocol::FRESHNESS_WINDOW_SECS;
use shared::types::{AccessoryContext, AccessoryRecord};
use crate::host::AccessoryHost;
use crate::identity::AccessoryId;
use crate::polling::PollingScheduler;
use crate::pve::PveApi;
use crate::registry::ServerRegistry;

const FRESHNESS_WINDOW: Duration = Duration::from_secs(FRESHNESS_WINDOW_SECS);

/// The signal the host shows as "not responding"
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessoryError {
    #[error("communication failure")]
    CommunicationFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    /// Constructed, owning node/guest not located yet
    Unbound,
    /// Located, upstream calls permitted
    Ready,
    /// A lookup or operation failed, upstream calls suspended
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    Ready,
    /// Node or guest not present right now; accessory is kept
    NotFound,
    NodeUnreachable,
    /// Owning server no longer configured; accessory was deregistered
    ServerMissing,
}

#[derive(Clone)]
struct NodeBinding {
    api: Arc<dyn PveApi>,
    node: String,
}

struct RuntimeState {
    readiness: Readiness,
    binding: Option<NodeBinding>,
    on: bool,
    last_update: Option<Instant>,
}

impl RuntimeState {
    fn is_fresh(&self) -> bool {
        self.last_update
            .map(|at| at.elapsed() < FRESHNESS_WINDOW)
            .unwrap_or(false)
    }

    fn ready_binding(&self) -> Option<NodeBinding> {
        match self.readiness {
            Readiness::Ready => self.binding.clone(),
            _ => None,
        }
    }
}

/// Map a guest status string to a power state. Anything other than the two
/// settled states leaves the cached value alone.
pub fn power_from_status(status: &str) -> Option<bool> {
    match status {
        "running" => Some(true),
        "stopped" => Some(false),
        _ => None,
    }
}

/// One guest exposed as an on/off accessory.
pub struct GuestAccessory {
    id: AccessoryId,
    record: AccessoryRecord,
    registry: Arc<ServerRegistry>,
    host: Arc<dyn AccessoryHost>,
    polling_interval: Option<u64>,
    state: Mutex<RuntimeState>,
    poller: Mutex<Option<PollingScheduler>>,
}

impl GuestAccessory {
    pub fn new(
        record: AccessoryRecord,
        registry: Arc<ServerRegistry>,
        host: Arc<dyn AccessoryHost>,
        polling_interval: Option<u64>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: AccessoryId::from(record.id.clone()),
            record,
            registry,
            host,
            polling_interval,
            state: Mutex::new(RuntimeState {
                readiness: Readiness::Unbound,
                binding: None,
                on: false,
                last_update: None,
            }),
            poller: Mutex::new(None),
        })
    }

    /// Construct, start locating the guest in the background, and begin
    /// polling if enabled. Returns without waiting for the lookup.
    pub fn launch(
        record: AccessoryRecord,
        registry: Arc<ServerRegistry>,
        host: Arc<dyn AccessoryHost>,
        polling_interval: Option<u64>,
    ) -> Arc<Self> {
        let accessory = Self::new(record, registry, host, polling_interval);
        tracing::info!(
            "{} - {} on node {} ({} as {:?})",
            accessory.name(),
            accessory.context().kind.model(),
            accessory.context().node_name,
            accessory.id,
            accessory.context().accessory_type
        );

        let setup = Arc::clone(&accessory);
        tokio::spawn(async move {
            setup.setup().await;
        });
        accessory.start_polling();
        accessory
    }

    pub fn id(&self) -> &AccessoryId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.record.display_name
    }

    pub fn context(&self) -> &AccessoryContext {
        &self.record.context
    }

    pub fn readiness(&self) -> Readiness {
        self.state.lock().readiness
    }

    /// Last cached power state, without any freshness logic
    pub fn cached_power(&self) -> bool {
        self.state.lock().on
    }

    fn mark_unreachable(&self) {
        let mut state = self.state.lock();
        state.readiness = Readiness::Unreachable;
    }

    /// Locate the owning node and confirm it lists this guest. The first
    /// matching node in the connection's node order wins.
    pub async fn setup(&self) -> SetupOutcome {
        let context = self.context();

        let Some(connection) = self.registry.lookup(&context.server_name) else {
            tracing::error!(
                "{} - server connection not found for server {}",
                self.name(),
                context.server_name
            );
            self.destroy();
            self.host.unregister(&self.id).await;
            return SetupOutcome::ServerMissing;
        };

        for node in connection.nodes().iter().filter(|n| n.node == context.node_name) {
            tracing::debug!("{} - looking for {} {} on node {}", self.name(), context.kind, context.vmid, node.node);

            match connection.api.list_guests(&node.node, context.kind).await {
                Ok(guests) => {
                    if guests.iter().any(|g| g.vmid == context.vmid) {
                        tracing::debug!("{} - found {} {} on node {}", self.name(), context.kind, context.vmid, node.node);
                        let mut state = self.state.lock();
                        state.binding = Some(NodeBinding {
                            api: Arc::clone(&connection.api),
                            node: node.node.clone(),
                        });
                        state.readiness = Readiness::Ready;
                        return SetupOutcome::Ready;
                    }
                }
                Err(e) => {
                    tracing::warn!("{} - node {} is unreachable: {}", self.name(), context.node_name, e);
                    self.mark_unreachable();
                    return SetupOutcome::NodeUnreachable;
                }
            }
        }

        tracing::warn!(
            "{} - {} {} not found on node {}, keeping accessory for when the node comes back online",
            self.name(),
            context.kind,
            context.vmid,
            context.node_name
        );
        self.mark_unreachable();
        SetupOutcome::NotFound
    }

    /// Synchronous read used by the host. Never waits on the network: a
    /// stale value triggers a background refresh whose failure is reported
    /// through the host's failure channel.
    pub fn get_power(self: &Arc<Self>) -> bool {
        let (on, fresh) = {
            let state = self.state.lock();
            (state.on, state.is_fresh())
        };
        if fresh {
            return on;
        }

        tracing::debug!("{} - get_power, refreshing in background", self.name());
        let accessory = Arc::clone(self);
        tokio::spawn(async move {
            if accessory.fetch_state(false).await.is_err() {
                accessory.host.report_communication_failure(&accessory.id);
            }
        });
        on
    }

    /// Refresh the power state from the guest, honouring the freshness
    /// window unless `bypass_cache` is set.
    pub async fn fetch_state(&self, bypass_cache: bool) -> Result<bool, AccessoryError> {
        let binding = {
            let state = self.state.lock();
            let Some(binding) = state.ready_binding() else {
                return Err(AccessoryError::CommunicationFailure);
            };
            if !bypass_cache && state.is_fresh() {
                return Ok(state.on);
            }
            binding
        };

        let context = self.context();
        match binding.api.guest_status(&binding.node, context.kind, context.vmid).await {
            Ok(status) => {
                let on = {
                    let mut state = self.state.lock();
                    match power_from_status(&status.status) {
                        Some(on) => state.on = on,
                        None => tracing::debug!("{} - ignoring status {}", self.name(), status.status),
                    }
                    state.last_update = Some(Instant::now());
                    state.on
                };
                tracing::debug!("{} - fetch_state: status is {}, state is {}", self.name(), status.status, on);
                self.host.update_observed_power(&self.id, on);
                Ok(on)
            }
            Err(e) => {
                tracing::warn!(
                    "{} - failed to fetch state from node {}: {}",
                    self.name(),
                    context.node_name,
                    e
                );
                self.mark_unreachable();
                Err(AccessoryError::CommunicationFailure)
            }
        }
    }

    /// Start or stop the guest. The freshness timestamp is reset before
    /// anything else, whatever the outcome. Failures are logged, not retried.
    pub async fn set_power(&self, on: bool) {
        tracing::debug!("{} - set_power: {}", self.name(), on);

        let binding = {
            let mut state = self.state.lock();
            state.last_update = Some(Instant::now());
            state.ready_binding()
        };
        let Some(binding) = binding else {
            tracing::warn!(
                "{} - cannot switch state: node {} is not ready",
                self.name(),
                self.context().node_name
            );
            return;
        };

        let context = self.context();
        let result = if on {
            binding.api.start_guest(&binding.node, context.kind, context.vmid).await
        } else {
            binding.api.stop_guest(&binding.node, context.kind, context.vmid).await
        };

        match result {
            Ok(()) => {
                self.state.lock().on = on;
                self.host.update_observed_power(&self.id, on);
                tracing::debug!("{} - switched, state is now {}", self.name(), on);
            }
            Err(e) => {
                tracing::error!(
                    "{} - failed to {} {}: {}",
                    self.name(),
                    if on { "start" } else { "stop" },
                    context.kind.model(),
                    e
                );
                self.mark_unreachable();
            }
        }
    }

    /// One polling tick. Silent when not ready; never returns an error.
    pub async fn poll(&self) {
        if self.readiness() != Readiness::Ready {
            return;
        }

        let previous = self.cached_power();
        match self.fetch_state(true).await {
            Ok(on) if on != previous => {
                tracing::debug!("{} - state changed to {} (polling)", self.name(), on);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("{} - poll failed: {}", self.name(), e);
            }
        }
    }

    fn start_polling(self: &Arc<Self>) {
        let mut poller = self.poller.lock();
        if let Some(previous) = poller.take() {
            previous.stop();
        }

        *poller = PollingScheduler::start(self.polling_interval, Arc::downgrade(self));
        match (&*poller, self.polling_interval) {
            (Some(_), Some(secs)) => tracing::debug!("{} - polling every {} seconds", self.name(), secs),
            _ => tracing::debug!("{} - polling disabled", self.name()),
        }
    }

    /// Tear down background work. Safe to call any number of times;
    /// returns true only on the call that actually stopped polling.
    pub fn destroy(&self) -> bool {
        let stopped = match self.poller.lock().take() {
            Some(poller) => {
                poller.stop();
                true
            }
            None => false,
        };
        tracing::debug!("{} - accessory destroyed, polling stopped", self.name());
        stopped
    }
}
