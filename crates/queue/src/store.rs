//! Backing store abstraction.
//!
//! Any durable, replayable log with consumer groups satisfies this contract.
//! Every mutation goes through the store's own atomic primitives; callers
//! never add locking on top.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipeline_core::{Fields, JobId, Result};

use crate::config::{QueueBackend, QueueConfig};
use crate::memory::MemoryStore;
use crate::redis_streams::RedisStreamsStore;

/// An entry delivered from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: JobId,
    pub fields: Fields,
}

/// A delivered but unacknowledged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: JobId,
    pub consumer: String,
    /// Time since the entry was last delivered.
    pub idle: Duration,
    pub delivery_count: u64,
}

/// Queue operations over a consumer-group capable log.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Appends an entry and returns its id. `max_len` caps retained entries
    /// (approximately, depending on the store).
    async fn enqueue(&self, queue: &str, fields: &Fields, max_len: Option<usize>) -> Result<JobId>;

    /// Number of retained entries.
    async fn length(&self, queue: &str) -> Result<u64>;

    /// Deletes a queue with all its groups.
    async fn delete(&self, queue: &str) -> Result<()>;

    /// Creates a group reading from the start of the queue. "Already exists" is not an error.
    async fn ensure_group(&self, queue: &str, group: &str) -> Result<()>;

    async fn group_exists(&self, queue: &str, group: &str) -> Result<bool>;

    /// Delivers up to `count` entries never delivered to this group, blocking
    /// up to `block` for new arrivals. Delivered entries become pending.
    async fn read_group(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>>;

    /// Acknowledges an entry and removes it from the queue. Returns whether
    /// it was pending.
    async fn ack(&self, queue: &str, group: &str, id: &JobId) -> Result<bool>;

    /// Size of the group's pending set (0 if the group does not exist).
    async fn pending_count(&self, queue: &str, group: &str) -> Result<u64>;

    /// Pending entries in id order.
    async fn pending(&self, queue: &str, group: &str, limit: usize) -> Result<Vec<PendingEntry>>;

    /// Reassigns pending entries idle for at least `min_idle` to `consumer`.
    async fn reclaim(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<JobId>>;

    async fn ping(&self) -> Result<()>;
}

/// Process-wide handle injected into every component.
pub type SharedStore = Arc<dyn QueueStore>;

/// Opens the store selected by the configuration.
pub async fn open_store(config: &QueueConfig) -> Result<SharedStore> {
    match config.backend {
        QueueBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        QueueBackend::Redis => Ok(Arc::new(RedisStreamsStore::connect(&config.redis_url).await?)),
    }
}
