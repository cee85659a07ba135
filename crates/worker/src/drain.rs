//! Drain barrier between stages.

use std::time::Duration;

use job_queue::{ConsumerGroup, JobQueue};
use pipeline_core::Result;
use telemetry::metrics;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Polls a queue and its group until nothing is queued or in flight.
#[derive(Debug, Clone)]
pub struct DrainWaiter {
    poll_interval: Duration,
    max_wait: Duration,
    cancel: CancellationToken,
}

impl Default for DrainWaiter {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(1800))
    }
}

impl DrainWaiter {
    pub fn new(poll_interval: Duration, max_wait: Duration) -> Self {
        Self {
            poll_interval,
            max_wait,
            cancel: CancellationToken::new(),
        }
    }

    /// Gives up early (returning `false`) once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `true` once `length == 0 && pending == 0`; `false` after `max_wait`.
    pub async fn wait_for_drain(&self, queue: &JobQueue, group: &ConsumerGroup) -> Result<bool> {
        let started = Instant::now();
        let deadline = started.checked_add(self.max_wait);

        loop {
            let length = queue.length().await?;
            let pending = group.pending_count().await?;

            if length == 0 && pending == 0 {
                info!(
                    queue = %queue.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Stage drained"
                );
                return Ok(true);
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                metrics().drain_timeouts.inc();
                warn!(
                    queue = %queue.name(),
                    group = %group.name(),
                    length,
                    pending,
                    max_wait_secs = self.max_wait.as_secs(),
                    "Drain wait timed out, proceeding"
                );
                return Ok(false);
            }

            debug!(queue = %queue.name(), length, pending, "Waiting for drain");

            let nap = match deadline {
                Some(deadline) => self.poll_interval.min(deadline - now),
                None => self.poll_interval,
            };
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!(queue = %queue.name(), length, pending, "Drain wait cancelled");
                    return Ok(false);
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }
}
