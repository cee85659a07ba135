//! Consumer groups: shared cursors with per-entry pending tracking.

use std::time::Duration;

use pipeline_core::{Fields, JobId, JobRecord, Result};
use tracing::info;

use crate::store::{PendingEntry, SharedStore};

/// An entry handed to one consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: JobId,
    pub fields: Fields,
}

impl Delivery {
    pub fn record(&self) -> Result<JobRecord> {
        JobRecord::from_fields(&self.fields)
    }
}

/// A named consumer group over one queue.
#[derive(Clone)]
pub struct ConsumerGroup {
    store: SharedStore,
    queue: String,
    name: String,
}

impl ConsumerGroup {
    pub fn new(store: SharedStore, queue: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            store,
            queue: queue.into(),
            name: name.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates the group (and the queue) if missing.
    pub async fn ensure(&self) -> Result<()> {
        self.store.ensure_group(&self.queue, &self.name).await
    }

    pub async fn exists(&self) -> Result<bool> {
        self.store.group_exists(&self.queue, &self.name).await
    }

    /// Reads up to `count` new entries for `consumer`. Empty on timeout.
    pub async fn read(&self, consumer: &str, count: usize, block: Duration) -> Result<Vec<Delivery>> {
        let entries = self
            .store
            .read_group(&self.queue, &self.name, consumer, count, block)
            .await?;

        Ok(entries
            .into_iter()
            .map(|e| Delivery {
                id: e.id,
                fields: e.fields,
            })
            .collect())
    }

    /// Idempotent; returns whether the entry was pending.
    pub async fn ack(&self, id: &JobId) -> Result<bool> {
        self.store.ack(&self.queue, &self.name, id).await
    }

    pub async fn pending_count(&self) -> Result<u64> {
        self.store.pending_count(&self.queue, &self.name).await
    }

    pub async fn pending(&self, limit: usize) -> Result<Vec<PendingEntry>> {
        self.store.pending(&self.queue, &self.name, limit).await
    }

    /// Moves entries idle for at least `min_idle` to `consumer`.
    pub async fn reclaim(&self, consumer: &str, min_idle: Duration) -> Result<Vec<JobId>> {
        let claimed = self
            .store
            .reclaim(&self.queue, &self.name, consumer, min_idle)
            .await?;

        if !claimed.is_empty() {
            info!(
                queue = %self.queue,
                group = %self.name,
                consumer = %consumer,
                count = claimed.len(),
                "Reclaimed idle pending jobs"
            );
        }
        Ok(claimed)
    }
}
