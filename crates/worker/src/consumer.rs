//! Stage worker: one consumer identity draining one stage.
//!
//! 1. Read a batch from the stage's consumer group
//! 2. Run each job through the retry coordinator (ack or dead-letter)
//! 3. When a read comes back empty, exit if the stage is drained
//! 4. Repeat

use std::time::Duration;

use job_queue::{ConsumerGroup, Delivery, JobQueue};
use pipeline_core::{Error, JobRecord, Result, Stage};
use serde::{Deserialize, Serialize};
use telemetry::metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::SharedHandler;
use crate::retry::RetryCoordinator;

/// Stage worker configuration.
#[derive(Debug, Clone)]
pub struct StageWorkerConfig {
    /// Entries fetched per read
    pub batch_size: usize,
    /// Blocking read timeout
    pub block_timeout: Duration,
    /// Pause after an empty read while other workers still hold jobs
    pub idle_poll: Duration,
}

impl Default for StageWorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            block_timeout: Duration::from_millis(1000),
            idle_poll: Duration::from_millis(500),
        }
    }
}

/// What one worker did before it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub consumer_id: String,
    pub processed: u64,
    pub succeeded: u64,
    pub dead_lettered: u64,
}

/// Drains one stage through a consumer group.
pub struct StageWorker {
    stage: Stage,
    queue: JobQueue,
    group: ConsumerGroup,
    coordinator: RetryCoordinator,
    handler: SharedHandler,
    config: StageWorkerConfig,
    cancel: CancellationToken,
}

impl StageWorker {
    pub fn new(
        stage: Stage,
        queue: JobQueue,
        group: ConsumerGroup,
        coordinator: RetryCoordinator,
        handler: SharedHandler,
        config: StageWorkerConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            stage,
            queue,
            group,
            coordinator,
            handler,
            config,
            cancel,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Runs until the stage is drained or cancellation is requested.
    ///
    /// Cancellation is honoured between jobs; entries already read but not
    /// started stay pending for a later reclaim.
    pub async fn run(&self, consumer_id: &str) -> Result<WorkerSummary> {
        info!(
            stage = %self.stage,
            queue = %self.queue.name(),
            group = %self.group.name(),
            consumer = %consumer_id,
            "Worker starting"
        );

        let result = {
            let _active = metrics().active_workers.track();
            self.drain(consumer_id).await
        };

        match &result {
            Ok(summary) => info!(
                consumer = %consumer_id,
                processed = summary.processed,
                succeeded = summary.succeeded,
                dead_lettered = summary.dead_lettered,
                "Worker finished"
            ),
            Err(e) => warn!(consumer = %consumer_id, code = e.code(), "Worker aborted: {}", e),
        }
        result
    }

    async fn drain(&self, consumer_id: &str) -> Result<WorkerSummary> {
        let mut summary = WorkerSummary {
            consumer_id: consumer_id.to_string(),
            ..Default::default()
        };

        loop {
            if self.cancel.is_cancelled() {
                info!(consumer = %consumer_id, "Cancellation requested, stopping");
                return Ok(summary);
            }

            let batch = self
                .group
                .read(consumer_id, self.config.batch_size, self.config.block_timeout)
                .await?;

            if batch.is_empty() {
                if self.is_drained().await? {
                    return Ok(summary);
                }

                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.config.idle_poll) => {}
                }
                continue;
            }

            debug!(consumer = %consumer_id, count = batch.len(), "Read batch");

            for delivery in batch {
                if self.cancel.is_cancelled() {
                    warn!(
                        consumer = %consumer_id,
                        job_id = %delivery.id,
                        "Cancellation requested, leaving job pending"
                    );
                    return Ok(summary);
                }

                summary.processed += 1;
                if self.process(&delivery).await? {
                    summary.succeeded += 1;
                } else {
                    summary.dead_lettered += 1;
                }
            }
        }
    }

    async fn process(&self, delivery: &Delivery) -> Result<bool> {
        let record = match self.decode(delivery) {
            Ok(record) => record,
            Err(e) => {
                // Retrying cannot fix a malformed entry.
                self.queue
                    .dead_letter()
                    .push_raw(&delivery.fields, &delivery.id, &e.to_string())
                    .await?;
                self.group.ack(&delivery.id).await?;
                return Ok(false);
            }
        };

        self.coordinator
            .process(&delivery.id, &record, self.handler.as_ref())
            .await
    }

    fn decode(&self, delivery: &Delivery) -> Result<JobRecord> {
        let record = delivery.record()?;
        if record.stage != self.stage {
            return Err(Error::invalid_record(format!(
                "job for {} delivered to {} worker",
                record.stage, self.stage
            )));
        }
        Ok(record)
    }

    async fn is_drained(&self) -> Result<bool> {
        Ok(self.queue.length().await? == 0 && self.group.pending_count().await? == 0)
    }
}
