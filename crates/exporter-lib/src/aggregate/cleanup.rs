//! Timer-driven bucket reclamation
//!
//! Runs one cleanup pass per window until shutdown. A pass in progress is
//! never interrupted; shutdown only suppresses the next tick.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// An aggregator that can drop idle buckets
pub trait WindowCleanup: Send + Sync {
    fn name(&self) -> &str;

    /// Drop expired buckets, returning how many were removed
    fn cleanup(&self) -> usize;
}

/// Periodic cleanup task for one aggregator
pub struct CleanupLoop {
    target: Arc<dyn WindowCleanup>,
    period: Duration,
}

impl CleanupLoop {
    /// A zero period is raised to one second.
    pub fn new(target: Arc<dyn WindowCleanup>, period: Duration) -> Self {
        let period = if period.is_zero() {
            Duration::from_secs(1)
        } else {
            period
        };
        Self { target, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            aggregator = %self.target.name(),
            window_secs = self.period.as_secs(),
            "Starting aggregator cleanup loop"
        );

        // first pass one full window after start
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.target.cleanup();
                    debug!(
                        aggregator = %self.target.name(),
                        removed,
                        "Cleanup pass complete"
                    );
                }
                _ = shutdown.recv() => {
                    info!(
                        aggregator = %self.target.name(),
                        "Shutting down aggregator cleanup loop"
                    );
                    break;
                }
            }
        }
    }
}
