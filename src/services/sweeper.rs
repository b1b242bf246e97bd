//! Periodic staleness sweep as an owned background task.

use super::location::DriverLocationTracker;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug)]
pub struct StaleDriverSweeper {
    tracker: Arc<DriverLocationTracker>,
    period: Duration,
}

/// Running sweeper; dropping it without [`SweeperHandle::stop`] leaves the
/// task running until the runtime shuts down.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StaleDriverSweeper {
    pub fn new(tracker: Arc<DriverLocationTracker>, period: Duration) -> Self {
        Self { tracker, period }
    }

    /// Spawn the sweep loop. The first sweep runs one period after start.
    pub fn start(self) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = self.period.max(Duration::from_millis(1));
        let tracker = self.tracker;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_secs = period.as_secs_f64(), "Stale driver sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match tracker.sweep_stale_drivers().await {
                            Ok(report) => info!(
                                examined = report.examined,
                                offlined = report.offlined,
                                failed = report.failed,
                                "Stale driver sweep finished"
                            ),
                            Err(e) => error!(error = %e, "Stale driver sweep failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Stale driver sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }
}

impl SweeperHandle {
    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Stale driver sweeper task ended abnormally");
        }
    }
}
