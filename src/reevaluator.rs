//! Fixed-interval re-evaluation timer.
//!
//! Re-runs a filter pass against the cached snapshot so that staleness takes
//! effect even when no new snapshot arrives. The first tick fires one full
//! interval after `start`.

use std::time::Duration;

use log::debug;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Periodic timer owning one background task.
pub struct PeriodicReevaluator {
    interval: Duration,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl PeriodicReevaluator {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Call `tick` every interval until stopped. Restarting replaces the previous timer.
    pub fn start<F>(&self, tick: F)
    where
        F: Fn() + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => tick(),
                }
            }
        });

        let previous = self.running.lock().replace((cancel, handle));
        if let Some((previous, _)) = previous {
            previous.cancel();
        }
        debug!("[Reevaluator] Started with {:?} interval", period);
    }

    /// Stop the timer. Safe to call when stopped.
    pub fn stop(&self) {
        let running = self.running.lock().take();
        if let Some((cancel, _)) = running {
            cancel.cancel();
            debug!("[Reevaluator] Stopped");
        }
    }
}

impl Drop for PeriodicReevaluator {
    fn drop(&mut self) {
        self.stop();
    }
}
