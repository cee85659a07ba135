//! Stage job queue.

use pipeline_core::{JobId, JobRecord, Result};
use telemetry::metrics;
use tracing::{debug, info};

use crate::dead_letter::DeadLetterQueue;
use crate::store::SharedStore;

/// Ordered, bounded queue of jobs for one stage.
#[derive(Clone)]
pub struct JobQueue {
    store: SharedStore,
    name: String,
    max_len: usize,
}

impl JobQueue {
    pub fn new(store: SharedStore, name: impl Into<String>, max_len: usize) -> Self {
        Self {
            store,
            name: name.into(),
            max_len,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Appends a job and returns the id the store assigned to it.
    pub async fn enqueue(&self, record: &JobRecord) -> Result<JobId> {
        let fields = record.to_fields()?;
        match self.store.enqueue(&self.name, &fields, Some(self.max_len)).await {
            Ok(id) => {
                metrics().jobs_enqueued.inc();
                debug!(queue = %self.name, job_id = %id, window_id = %record.window_id, "Enqueued job");
                Ok(id)
            }
            Err(e) => {
                metrics().enqueue_errors.inc();
                Err(e)
            }
        }
    }

    /// Enqueues every record in order, stopping at the first failure.
    pub async fn enqueue_all(&self, records: &[JobRecord]) -> Result<Vec<JobId>> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ids.push(self.enqueue(record).await?);
        }

        let length = self.length().await?;
        info!(queue = %self.name, "[enqueue] jobs={} length={}", ids.len(), length);
        Ok(ids)
    }

    /// Outstanding entries (delivered-and-acked entries are removed).
    pub async fn length(&self) -> Result<u64> {
        self.store.length(&self.name).await
    }

    /// Deletes the queue and its consumer groups.
    pub async fn clear(&self) -> Result<()> {
        self.store.delete(&self.name).await?;
        info!(queue = %self.name, "Cleared queue");
        Ok(())
    }

    /// Dead-letter queue paired with this queue.
    pub fn dead_letter(&self) -> DeadLetterQueue {
        DeadLetterQueue::for_queue(self.store.clone(), &self.name)
    }
}
