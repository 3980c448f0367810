//! Background eviction of expired counter entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::clock::Clock;
use super::store::CounterStore;

/// How often the sweeper runs unless configured otherwise.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Periodic task that evicts expired entries from the counter store.
///
/// Sweeping only bounds memory held by one-off keys; admission stays
/// correct without it because `observe` treats an expired entry as stale
/// and replaces it.
pub struct Sweeper {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl Sweeper {
    /// Create a sweeper over the shared store with the default interval.
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Use a different sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the recurring sweep task.
    ///
    /// The returned handle stops the task cooperatively; dropping the
    /// handle stops it as well.
    pub fn spawn(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.store.sweep(self.clock.now()).await;
                        if removed > 0 {
                            debug!(removed, "Swept expired counters");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Sweeper stopping");
                        break;
                    }
                }
            }
        });

        SweeperHandle { shutdown_tx, task }
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
