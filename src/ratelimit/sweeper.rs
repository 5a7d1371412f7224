//! Periodic eviction of idle window records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::store::WindowStore;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// Default idle time past a record's window before it may be evicted.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Sweep timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub interval: Duration,
    pub grace: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Handle to a running sweep task.
///
/// Dropping the handle aborts the task; [`shutdown`](Self::shutdown) stops it
/// cleanly and waits for it to finish.
pub struct Sweeper {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweep loop on the current Tokio runtime.
    ///
    /// The first sweep runs one full interval after spawning.
    ///
    /// # Panics
    ///
    /// Panics if `settings.interval` is zero or if called outside a runtime.
    pub fn spawn(store: Arc<WindowStore>, settings: SweepSettings) -> Self {
        assert!(!settings.interval.is_zero(), "sweep interval must be non-zero");

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        info!(
            interval_secs = settings.interval.as_secs_f64(),
            grace_secs = settings.grace.as_secs_f64(),
            "Starting window eviction sweeper"
        );

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + settings.interval;
            let mut ticker = tokio::time::interval_at(start, settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = store.sweep(settings.grace);
                        debug!(evicted, tracked = store.size(), "Sweep completed");
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            info!("Window eviction sweeper stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Whether the sweep task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the sweep loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Sweeper task ended abnormally");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
