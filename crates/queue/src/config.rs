//! Queue configuration.

use std::time::Duration;

use pipeline_core::Stage;
use serde::{Deserialize, Serialize};

/// Which backing store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// In-process store; state is lost on restart.
    Memory,
    /// Redis Streams.
    Redis,
}

/// Queue and consumer group names for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageQueueConfig {
    pub queue: String,
    pub group: String,
}

impl StageQueueConfig {
    pub fn new(queue: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            group: group.into(),
        }
    }

    /// Dead-letter queue name for this stage.
    pub fn dead_letter_queue(&self) -> String {
        dead_letter_name(&self.queue)
    }
}

/// Queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_backend")]
    pub backend: QueueBackend,
    /// Redis connection URL (redis backend only)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_phase1")]
    pub phase1: StageQueueConfig,
    #[serde(default = "default_phase2")]
    pub phase2: StageQueueConfig,
    /// Approximate retained length per queue
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    /// Entries fetched per read
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Blocking read timeout in milliseconds
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
}

fn default_backend() -> QueueBackend {
    QueueBackend::Memory
}

fn default_redis_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_phase1() -> StageQueueConfig {
    StageQueueConfig::new("pipeline:phase1", "phase1_workers")
}

fn default_phase2() -> StageQueueConfig {
    StageQueueConfig::new("pipeline:phase2", "phase2_workers")
}

fn default_max_len() -> usize {
    5000
}

fn default_batch_size() -> usize {
    10
}

fn default_block_timeout_ms() -> u64 {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            phase1: default_phase1(),
            phase2: default_phase2(),
            max_len: default_max_len(),
            batch_size: default_batch_size(),
            block_timeout_ms: default_block_timeout_ms(),
        }
    }
}

impl QueueConfig {
    /// Names for the given stage.
    pub fn stage(&self, stage: Stage) -> &StageQueueConfig {
        match stage {
            Stage::Phase1 => &self.phase1,
            Stage::Phase2 => &self.phase2,
        }
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }
}

/// Dead-letter queue name for a stage queue.
pub fn dead_letter_name(queue: &str) -> String {
    format!("{queue}:dlq")
}
