//! Collaborator contracts: per-job handler, work source, merge step.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use pipeline_core::{JobId, JobRecord, Payload, Stage, Window};

/// Business logic for one job.
///
/// Jobs are delivered at least once, so implementations must be idempotent:
/// processing the same job id twice has to produce the same external effect.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job_id: &JobId, record: &JobRecord) -> anyhow::Result<()>;
}

pub type SharedHandler = Arc<dyn JobHandler>;

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn handle(&self, job_id: &JobId, record: &JobRecord) -> anyhow::Result<()> {
        (**self).handle(job_id, record).await
    }
}

#[async_trait]
impl<'a, H: JobHandler + ?Sized> JobHandler for &'a H {
    async fn handle(&self, job_id: &JobId, record: &JobRecord) -> anyhow::Result<()> {
        (**self).handle(job_id, record).await
    }
}

/// Handler built from an async closure.
pub struct FnHandler<F>(F);

/// Wraps `f` as a [`JobHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(JobId, JobRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(JobId, JobRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, job_id: &JobId, record: &JobRecord) -> anyhow::Result<()> {
        (self.0)(job_id.clone(), record.clone()).await
    }
}

/// Supplies the units of work for each stage of a run.
#[async_trait]
pub trait WorkSource: Send + Sync {
    async fn work_units(&self, stage: Stage) -> anyhow::Result<Vec<Payload>>;
}

/// Combines phase-1 partial outputs before phase 2 starts.
#[async_trait]
pub trait MergeStep: Send + Sync {
    async fn merge(&self, window: &Window) -> anyhow::Result<()>;
}
