//! Dead-letter queues.

use pipeline_core::{DeadLetterRecord, Fields, JobId, Result};
use telemetry::metrics;
use tracing::warn;

use crate::config::dead_letter_name;
use crate::store::SharedStore;

/// Quarantine for jobs that exhausted their retries. Unbounded and never
/// drained by the pipeline.
#[derive(Clone)]
pub struct DeadLetterQueue {
    store: SharedStore,
    name: String,
}

impl DeadLetterQueue {
    pub fn for_queue(store: SharedStore, queue: &str) -> Self {
        Self {
            store,
            name: dead_letter_name(queue),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn push(&self, record: &DeadLetterRecord) -> Result<JobId> {
        let id = self.store.enqueue(&self.name, &record.to_fields()?, None).await?;
        metrics().jobs_dead_lettered.inc();
        warn!(
            dlq = %self.name,
            original_job_id = %record.original_job_id,
            window_id = %record.original.window_id,
            error = %record.error_message,
            "Job moved to dead-letter queue"
        );
        Ok(id)
    }

    /// Quarantines an entry whose fields could not be decoded.
    pub async fn push_raw(&self, fields: &Fields, original_job_id: &JobId, error: &str) -> Result<JobId> {
        let fields = DeadLetterRecord::raw_fields(fields, original_job_id, error);
        let id = self.store.enqueue(&self.name, &fields, None).await?;
        metrics().jobs_dead_lettered.inc();
        warn!(
            dlq = %self.name,
            original_job_id = %original_job_id,
            error = %error,
            "Undecodable job moved to dead-letter queue"
        );
        Ok(id)
    }

    pub async fn length(&self) -> Result<u64> {
        self.store.length(&self.name).await
    }
}
