//! Two-phase pipeline run: phase 1 → drain → merge → phase 2 → drain.

use std::sync::Arc;
use std::time::Instant;

use job_queue::{ConsumerGroup, JobQueue, QueueConfig, SharedStore};
use pipeline_core::{Error, JobRecord, Payload, Result, Stage, Window, WindowClock};
use serde::Serialize;
use telemetry::metrics;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::consumer::StageWorker;
use crate::handler::{MergeStep, SharedHandler, WorkSource};
use crate::pool::{PoolReport, WorkerPoolLauncher};
use crate::retry::RetryCoordinator;

/// External collaborators of a run.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn WorkSource>,
    pub phase1: SharedHandler,
    pub phase2: SharedHandler,
    pub merge: Arc<dyn MergeStep>,
}

impl Collaborators {
    fn handler(&self, stage: Stage) -> SharedHandler {
        match stage {
            Stage::Phase1 => self.phase1.clone(),
            Stage::Phase2 => self.phase2.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub queue: String,
    pub enqueued: usize,
    pub pool: PoolReport,
    /// False when the drain barrier timed out or was cancelled.
    pub drained: bool,
}

impl StageReport {
    pub fn succeeded(&self) -> bool {
        self.drained && self.pool.all_succeeded()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub window_id: String,
    pub phase1: StageReport,
    pub phase2: StageReport,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.phase1.succeeded() && self.phase2.succeeded()
    }
}

/// Drives one end-to-end pipeline run.
pub struct PipelineOrchestrator {
    store: SharedStore,
    queues: QueueConfig,
    config: PipelineConfig,
    clock: WindowClock,
    collaborators: Collaborators,
}

impl PipelineOrchestrator {
    pub fn new(
        store: SharedStore,
        queues: QueueConfig,
        config: PipelineConfig,
        collaborators: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let clock = config.window_clock()?;

        Ok(Self {
            store,
            queues,
            config,
            clock,
            collaborators,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn queues(&self) -> &QueueConfig {
        &self.queues
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn queue(&self, stage: Stage) -> JobQueue {
        let names = self.queues.stage(stage);
        JobQueue::new(self.store.clone(), &names.queue, self.queues.max_len)
    }

    pub fn group(&self, stage: Stage) -> ConsumerGroup {
        let names = self.queues.stage(stage);
        ConsumerGroup::new(self.store.clone(), &names.queue, &names.group)
    }

    /// Deletes both stage queues (and their groups).
    pub async fn clear_queues(&self) -> Result<()> {
        for stage in Stage::ALL {
            self.queue(stage).clear().await?;
        }
        Ok(())
    }

    /// Runs both phases once. Any error aborts this run only.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let window = self.clock.current_window(None);
        let span = info_span!("pipeline_run", run_id = %run_id, window_id = %window.id);

        metrics().runs_started.inc();
        let active = metrics().run_active.track();
        let started = Instant::now();

        let result = self
            .execute(run_id, &window, cancel)
            .instrument(span.clone())
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        metrics().run_latency_ms.observe(elapsed_ms);
        drop(active);

        span.in_scope(|| match result {
            Ok((phase1, phase2)) => {
                let report = RunReport {
                    run_id,
                    window_id: window.id,
                    phase1,
                    phase2,
                    elapsed_ms,
                };
                let totals = metrics().snapshot();
                info!(
                    succeeded = report.succeeded(),
                    elapsed_ms,
                    total_succeeded = totals.jobs_succeeded,
                    total_retried = totals.jobs_retried,
                    total_dead_lettered = totals.jobs_dead_lettered,
                    "Pipeline run finished"
                );
                Ok(report)
            }
            Err(e) => {
                metrics().runs_failed.inc();
                error!(code = e.code(), elapsed_ms, "Pipeline run aborted: {}", e);
                Err(e)
            }
        })
    }

    async fn execute(
        &self,
        run_id: Uuid,
        window: &Window,
        cancel: &CancellationToken,
    ) -> Result<(StageReport, StageReport)> {
        info!(run_id = %run_id, "Pipeline run starting");

        let phase1_units = self.work_units(Stage::Phase1).await?;
        let phase2_units = self.work_units(Stage::Phase2).await?;

        let phase1 = self.run_stage(Stage::Phase1, window, phase1_units, cancel).await?;

        if cancel.is_cancelled() {
            return Err(Error::internal("run cancelled after phase1"));
        }

        // Runs even if phase 1 did not fully drain.
        info!(drained = phase1.drained, "Running merge step");
        self.collaborators
            .merge
            .merge(window)
            .await
            .map_err(|e| Error::internal(format!("merge step failed: {e:#}")))?;

        let phase2 = self.run_stage(Stage::Phase2, window, phase2_units, cancel).await?;

        Ok((phase1, phase2))
    }

    async fn work_units(&self, stage: Stage) -> Result<Vec<Payload>> {
        self.collaborators
            .source
            .work_units(stage)
            .await
            .map_err(|e| Error::internal(format!("work source failed for {stage}: {e:#}")))
    }

    async fn run_stage(
        &self,
        stage: Stage,
        window: &Window,
        units: Vec<Payload>,
        cancel: &CancellationToken,
    ) -> Result<StageReport> {
        let queue = self.queue(stage);
        let group = self.group(stage);
        group.ensure().await?;

        let records: Vec<JobRecord> = units
            .into_iter()
            .map(|payload| JobRecord::new(stage, &window.id, payload))
            .collect();
        let enqueued = queue.enqueue_all(&records).await?.len();

        let coordinator =
            RetryCoordinator::new(group.clone(), queue.dead_letter(), self.config.backoff());
        let worker = Arc::new(StageWorker::new(
            stage,
            queue.clone(),
            group.clone(),
            coordinator,
            self.collaborators.handler(stage),
            self.config
                .stage_worker(self.queues.batch_size, self.queues.block_timeout()),
            cancel.clone(),
        ));

        let pool = WorkerPoolLauncher::new(format!("{stage}-worker"));
        let report = pool
            .run_batch(
                move |consumer_id| {
                    let worker = worker.clone();
                    async move { worker.run(&consumer_id).await }
                },
                self.config.workers(stage),
                self.config.pool_timeout(),
            )
            .await;

        let drained = self
            .config
            .drain_waiter()
            .with_cancel(cancel.clone())
            .wait_for_drain(&queue, &group)
            .await?;

        Ok(StageReport {
            stage,
            queue: queue.name().to_string(),
            enqueued,
            pool: report,
            drained,
        })
    }
}
