//! Cron-driven pipeline scheduler.
//!
//! At most one run is active at a time; a trigger that fires while a run is
//! in progress is dropped, not queued.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use pipeline_core::{Error, Result};
use telemetry::{health, metrics};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::orchestrator::{PipelineOrchestrator, RunReport};

/// Parses a cron expression. Five fields (`min hour dom mon dow`) get a
/// leading `0` seconds field.
pub fn parse_schedule(spec: &str) -> Result<Schedule> {
    let spec = spec.trim();
    let expr = if spec.split_whitespace().count() == 5 {
        format!("0 {spec}")
    } else {
        spec.to_string()
    };

    Schedule::from_str(&expr).map_err(|e| Error::config(format!("invalid cron spec '{spec}': {e}")))
}

/// Resets the running flag even if the run panics.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PipelineScheduler {
    orchestrator: Arc<PipelineOrchestrator>,
    schedule: Schedule,
    offset: FixedOffset,
    run_on_start: bool,
    running: AtomicBool,
}

impl PipelineScheduler {
    pub fn new(orchestrator: Arc<PipelineOrchestrator>) -> Result<Self> {
        let config = orchestrator.config();
        let schedule = parse_schedule(&config.cron_spec)?;
        let offset = config.window_clock()?.offset();
        let run_on_start = config.run_on_start;

        Ok(Self {
            orchestrator,
            schedule,
            offset,
            run_on_start,
            running: AtomicBool::new(false),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Next fire time strictly after `after`, in the configured offset.
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<FixedOffset>> {
        self.schedule.after(&after.with_timezone(&self.offset)).next()
    }

    /// Runs the pipeline now unless a run is already active.
    ///
    /// Returns `None` when the trigger was dropped because of overlap.
    pub async fn trigger(&self, cancel: &CancellationToken) -> Option<Result<RunReport>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            metrics().runs_skipped.inc();
            warn!("Pipeline run already in progress, skipping trigger");
            return None;
        }
        let _guard = RunGuard(&self.running);

        Some(self.orchestrator.run_once(cancel).await)
    }

    /// Fires runs on schedule until `cancel` is triggered. Each run is spawned
    /// so that ticks during a long run can be observed and dropped.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        health().scheduler.set_healthy();
        info!(offset = %self.offset, "Pipeline scheduler started");

        if self.run_on_start {
            self.spawn_run(&cancel);
        }

        loop {
            let Some(next) = self.next_fire(Utc::now()) else {
                warn!("Cron schedule has no upcoming fire times");
                break;
            };
            let wait = (next.with_timezone(&Utc) - Utc::now())
                .to_std()
                .unwrap_or_default();
            info!(next = %next, "Next pipeline run scheduled");

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            self.spawn_run(&cancel);
        }

        health().scheduler.set_unhealthy("scheduler stopped");
        info!("Pipeline scheduler stopped");
    }

    fn spawn_run(self: &Arc<Self>, cancel: &CancellationToken) {
        let scheduler = self.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match scheduler.trigger(&cancel).await {
                Some(Ok(report)) if !report.succeeded() => warn!(
                    run_id = %report.run_id,
                    phase1_drained = report.phase1.drained,
                    phase2_drained = report.phase2.drained,
                    "Pipeline run finished with failures"
                ),
                Some(Err(e)) => error!(code = e.code(), "Pipeline run failed: {}", e),
                _ => {}
            }
        });
    }
}
