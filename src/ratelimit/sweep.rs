//! Background eviction of expired windows.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::limiter::FixedWindowLimiter;

/// Default period between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running sweep task.
///
/// The task holds only a weak reference to its limiter and exits once the
/// limiter is dropped, the handle is stopped, or the handle itself is dropped.
pub(crate) struct Sweeper {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a sweep task on the current tokio runtime.
    ///
    /// The first sweep runs one full `period` after spawning.
    pub(crate) fn spawn(limiter: Weak<FixedWindowLimiter>, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let (shutdown, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let Some(limiter) = limiter.upgrade() else {
                            break;
                        };
                        let removed = limiter.sweep();
                        if removed > 0 {
                            debug!(
                                removed = removed,
                                remaining = limiter.entry_count(),
                                "Swept expired rate limit windows"
                            );
                        }
                    }
                }
            }

            debug!("Window sweeper stopped");
        });

        debug!(period_ms = period.as_millis() as u64, "Window sweeper started");
        Self { shutdown, task }
    }

    /// Signal the task to stop and wait for it to finish.
    pub(crate) async fn stop(self) {
        // The task may already have exited on its own.
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Window sweeper task failed");
            }
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
