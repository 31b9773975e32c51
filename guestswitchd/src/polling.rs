use std::sync::Weak;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use shared::protocol::MIN_POLLING_INTERVAL_SECS;
use crate::accessory::GuestAccessory;

/// Repeating background reconciliation for one accessory.
///
/// The task only holds a weak reference, so it never keeps a dropped
/// accessory alive. Stopping is idempotent.
pub struct PollingScheduler {
    cancel: CancellationToken,
}

impl PollingScheduler {
    /// Start polling every `interval_secs`. Returns `None` when the
    /// interval is absent or below the floor, which disables polling.
    pub fn start(interval_secs: Option<u64>, accessory: Weak<GuestAccessory>) -> Option<Self> {
        let secs = interval_secs.filter(|secs| *secs >= MIN_POLLING_INTERVAL_SECS)?;
        let period = Duration::from_secs(secs);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(accessory) = accessory.upgrade() else {
                            break;
                        };
                        accessory.poll().await;
                    }
                    _ = task_cancel.cancelled() => {
                        break;
                    }
                }
            }
        });

        Some(Self { cancel })
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
