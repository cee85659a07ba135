//! Read-only pipeline status.

use chrono::{DateTime, Utc};
use job_queue::{ConsumerGroup, JobQueue, QueueConfig, SharedStore};
use pipeline_core::{Result, Stage};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Idle,
    Queued,
    Processing,
    Completed,
    Error,
}

impl StageStatus {
    /// Derives a stage status from queue introspection.
    pub fn classify(group_exists: bool, length: u64, pending: u64) -> Self {
        if !group_exists && length == 0 {
            Self::Idle
        } else if length == 0 && pending == 0 {
            Self::Completed
        } else if pending > 0 {
            Self::Processing
        } else {
            Self::Queued
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Idle,
    Phase1,
    Phase2,
    Completed,
    Error,
}

impl PipelineStatus {
    pub fn derive(phase1: StageStatus, phase2: StageStatus) -> Self {
        if phase1 == StageStatus::Error || phase2 == StageStatus::Error {
            Self::Error
        } else if phase1 == StageStatus::Completed && phase2 == StageStatus::Completed {
            Self::Completed
        } else if phase1.is_active() {
            Self::Phase1
        } else if phase2.is_active() {
            Self::Phase2
        } else {
            Self::Idle
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub stage: Stage,
    pub queue: String,
    pub length: u64,
    pub pending: u64,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    pub status: PipelineStatus,
    pub phase1: StageSnapshot,
    pub phase2: StageSnapshot,
    pub checked_at: DateTime<Utc>,
}

/// Queries queue state for the status surface. Never mutates anything.
#[derive(Clone)]
pub struct StatusMonitor {
    store: SharedStore,
    queues: QueueConfig,
}

impl StatusMonitor {
    pub fn new(store: SharedStore, queues: QueueConfig) -> Self {
        Self { store, queues }
    }

    pub async fn stage_status(&self, stage: Stage) -> StageSnapshot {
        let names = self.queues.stage(stage);
        let queue = JobQueue::new(self.store.clone(), &names.queue, self.queues.max_len);
        let group = ConsumerGroup::new(self.store.clone(), &names.queue, &names.group);

        match Self::introspect(&queue, &group).await {
            Ok((exists, length, pending)) => StageSnapshot {
                stage,
                queue: names.queue.clone(),
                length,
                pending,
                status: StageStatus::classify(exists, length, pending),
                error: None,
            },
            Err(e) => {
                warn!(stage = %stage, code = e.code(), "Status query failed: {}", e);
                StageSnapshot {
                    stage,
                    queue: names.queue.clone(),
                    length: 0,
                    pending: 0,
                    status: StageStatus::Error,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn pipeline_status(&self) -> PipelineSnapshot {
        let phase1 = self.stage_status(Stage::Phase1).await;
        let phase2 = self.stage_status(Stage::Phase2).await;

        PipelineSnapshot {
            status: PipelineStatus::derive(phase1.status, phase2.status),
            phase1,
            phase2,
            checked_at: Utc::now(),
        }
    }

    async fn introspect(queue: &JobQueue, group: &ConsumerGroup) -> Result<(bool, u64, u64)> {
        let exists = group.exists().await?;
        let length = queue.length().await?;
        let pending = group.pending_count().await?;
        Ok((exists, length, pending))
    }
}
