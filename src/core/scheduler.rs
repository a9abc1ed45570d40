//! # Delayed command scheduler.
//!
//! Once per tick, pops every due [`DelayedCommand`] and hands it to the supervisor,
//! which takes boot locks and launches the already-resolved nodes.
//!
//! ```text
//! interval(tick) ──► DelayedQueue::pop_due(now) ──► due queue ──► Supervisor
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::services::{DelayedCommand, DelayedQueue};

pub(crate) struct DelayedScheduler {
    queue: Arc<DelayedQueue>,
    due: mpsc::UnboundedSender<DelayedCommand>,
    tick: Duration,
}

impl DelayedScheduler {
    pub(crate) fn new(
        queue: Arc<DelayedQueue>,
        due: mpsc::UnboundedSender<DelayedCommand>,
        tick: Duration,
    ) -> Self {
        Self { queue, due, tick }
    }

    /// Moves every due command to the supervisor. Returns how many were moved.
    pub(crate) fn fire_due(&self, now: Instant) -> usize {
        let mut fired = 0;
        while let Some(cmd) = self.queue.pop_due(now) {
            debug!(service = %cmd.name, "delayed command fired");
            if self.due.send(cmd).is_err() {
                break;
            }
            fired += 1;
        }
        fired
    }

    pub(crate) async fn run(self, token: CancellationToken) {
        let mut ticker = time::interval(self.tick.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                now = ticker.tick() => {
                    self.fire_due(now);
                }
            }
        }
    }
}
