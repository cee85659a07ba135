//! Mock collaborators and a fault-injecting store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use job_queue::{MemoryStore, PendingEntry, QueueStore, StreamEntry};
use parking_lot::Mutex;
use pipeline_core::{Error, Fields, JobId, JobRecord, Payload, Result, Stage, Window};
use worker::{JobHandler, MergeStep, WorkSource};

/// Handler that always succeeds and records every invocation.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    calls: Arc<Mutex<Vec<(JobId, JobRecord)>>>,
    delay: Duration,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps `delay` inside every invocation.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.calls.lock().iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn records(&self) -> Vec<JobRecord> {
        self.calls.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn handle(&self, job_id: &JobId, record: &JobRecord) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.lock().push((job_id.clone(), record.clone()));
        Ok(())
    }
}

/// Handler that fails the first `failures` invocations of every job.
/// `None` fails forever.
#[derive(Clone)]
pub struct FailingHandler {
    failures: Option<u32>,
    attempts: Arc<Mutex<HashMap<JobId, u32>>>,
    retry_counts: Arc<Mutex<Vec<u32>>>,
}

impl FailingHandler {
    pub fn always() -> Self {
        Self {
            failures: None,
            attempts: Arc::default(),
            retry_counts: Arc::default(),
        }
    }

    pub fn times(failures: u32) -> Self {
        Self {
            failures: Some(failures),
            ..Self::always()
        }
    }

    /// Total invocations across all jobs.
    pub fn invocations(&self) -> u32 {
        self.attempts.lock().values().sum()
    }

    /// `retry_count` as seen by each invocation, in call order.
    pub fn seen_retry_counts(&self) -> Vec<u32> {
        self.retry_counts.lock().clone()
    }
}

#[async_trait]
impl JobHandler for FailingHandler {
    async fn handle(&self, job_id: &JobId, record: &JobRecord) -> anyhow::Result<()> {
        self.retry_counts.lock().push(record.retry_count);
        let attempt = {
            let mut attempts = self.attempts.lock();
            let entry = attempts.entry(job_id.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        match self.failures {
            Some(n) if attempt > n => Ok(()),
            _ => anyhow::bail!("simulated failure #{attempt} for {job_id}"),
        }
    }
}

/// Work source with fixed payloads per stage.
#[derive(Clone, Default)]
pub struct StaticSource {
    pub phase1: Vec<Payload>,
    pub phase2: Vec<Payload>,
    pub fail: bool,
}

#[async_trait]
impl WorkSource for StaticSource {
    async fn work_units(&self, stage: Stage) -> anyhow::Result<Vec<Payload>> {
        if self.fail {
            anyhow::bail!("source unavailable");
        }
        Ok(match stage {
            Stage::Phase1 => self.phase1.clone(),
            Stage::Phase2 => self.phase2.clone(),
        })
    }
}

/// Merge step that records the windows it was invoked for.
#[derive(Clone, Default)]
pub struct RecordingMerge {
    pub windows: Arc<Mutex<Vec<String>>>,
    /// Sleeps inside `merge`, to hold a run open.
    pub delay: Duration,
}

impl RecordingMerge {
    pub fn windows(&self) -> Vec<String> {
        self.windows.lock().clone()
    }
}

#[async_trait]
impl MergeStep for RecordingMerge {
    async fn merge(&self, window: &Window) -> anyhow::Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.windows.lock().push(window.id.clone());
        Ok(())
    }
}

/// Memory store that can be switched into an "unreachable" state.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(Error::connectivity("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn enqueue(&self, queue: &str, fields: &Fields, max_len: Option<usize>) -> Result<JobId> {
        self.check()?;
        self.inner.enqueue(queue, fields, max_len).await
    }

    async fn length(&self, queue: &str) -> Result<u64> {
        self.check()?;
        self.inner.length(queue).await
    }

    async fn delete(&self, queue: &str) -> Result<()> {
        self.check()?;
        self.inner.delete(queue).await
    }

    async fn ensure_group(&self, queue: &str, group: &str) -> Result<()> {
        self.check()?;
        self.inner.ensure_group(queue, group).await
    }

    async fn group_exists(&self, queue: &str, group: &str) -> Result<bool> {
        self.check()?;
        self.inner.group_exists(queue, group).await
    }

    async fn read_group(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>> {
        self.check()?;
        self.inner.read_group(queue, group, consumer, count, block).await
    }

    async fn ack(&self, queue: &str, group: &str, id: &JobId) -> Result<bool> {
        self.check()?;
        self.inner.ack(queue, group, id).await
    }

    async fn pending_count(&self, queue: &str, group: &str) -> Result<u64> {
        self.check()?;
        self.inner.pending_count(queue, group).await
    }

    async fn pending(&self, queue: &str, group: &str, limit: usize) -> Result<Vec<PendingEntry>> {
        self.check()?;
        self.inner.pending(queue, group, limit).await
    }

    async fn reclaim(
        &self,
        queue: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Vec<JobId>> {
        self.check()?;
        self.inner.reclaim(queue, group, consumer, min_idle).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}
