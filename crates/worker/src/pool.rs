//! Worker pool: K concurrent consumers under one wall-clock deadline.

use std::future::Future;
use std::time::Duration;

use pipeline_core::Result;
use serde::Serialize;
use telemetry::metrics;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::consumer::WorkerSummary;

/// How one worker ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "lowercase")]
pub enum WorkerOutcome {
    Success(WorkerSummary),
    /// Still running at the pool deadline; its claimed jobs stay pending.
    Timeout,
    /// Returned an error; carries the error code.
    Failed(String),
    /// Panicked; carries the panic message.
    Exception(String),
}

impl WorkerOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerReport {
    pub consumer_id: String,
    pub outcome: WorkerOutcome,
}

/// Per-worker outcomes of one pool run.
#[derive(Debug, Clone, Serialize)]
pub struct PoolReport {
    pub pool: String,
    pub workers: Vec<WorkerReport>,
    pub elapsed_ms: u64,
}

impl PoolReport {
    pub fn total(&self) -> usize {
        self.workers.len()
    }

    pub fn completed(&self) -> usize {
        self.workers.iter().filter(|w| w.outcome.is_success()).count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.completed() == self.total()
    }

    /// Jobs processed by workers that finished.
    pub fn processed(&self) -> u64 {
        self.workers
            .iter()
            .filter_map(|w| match &w.outcome {
                WorkerOutcome::Success(summary) => Some(summary.processed),
                _ => None,
            })
            .sum()
    }
}

/// Launches worker tasks with consumer ids `{name}-{ordinal}`.
#[derive(Debug, Clone)]
pub struct WorkerPoolLauncher {
    name: String,
}

impl WorkerPoolLauncher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs `worker_count` instances of `entry_point` concurrently and waits
    /// for all of them or the shared deadline, whichever comes first.
    ///
    /// Workers are isolated: one failing, panicking or timing out does not
    /// affect the others. Nothing propagates beyond the returned report.
    pub async fn run_batch<F, Fut>(
        &self,
        entry_point: F,
        worker_count: usize,
        timeout: Duration,
    ) -> PoolReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<WorkerSummary>> + Send + 'static,
    {
        let started = Instant::now();
        // Past the representable range means no deadline at all.
        let deadline = started.checked_add(timeout);

        let handles: Vec<_> = (1..=worker_count)
            .map(|ordinal| {
                let consumer_id = format!("{}-{}", self.name, ordinal);
                let handle = tokio::spawn(entry_point(consumer_id.clone()));
                (consumer_id, handle)
            })
            .collect();

        info!(pool = %self.name, workers = worker_count, timeout_secs = timeout.as_secs(), "Worker pool started");

        let mut workers = Vec::with_capacity(handles.len());
        for (consumer_id, mut handle) in handles {
            let joined = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, &mut handle).await,
                None => Ok((&mut handle).await),
            };
            let outcome = match joined {
                Ok(Ok(Ok(summary))) => {
                    metrics().workers_succeeded.inc();
                    WorkerOutcome::Success(summary)
                }
                Ok(Ok(Err(e))) => {
                    metrics().workers_failed.inc();
                    error!(consumer = %consumer_id, code = e.code(), "Worker failed: {}", e);
                    WorkerOutcome::Failed(e.code().to_string())
                }
                Ok(Err(join_err)) => {
                    metrics().workers_failed.inc();
                    let message = panic_message(join_err);
                    error!(consumer = %consumer_id, "Worker crashed: {}", message);
                    WorkerOutcome::Exception(message)
                }
                Err(_) => {
                    handle.abort();
                    metrics().workers_timed_out.inc();
                    warn!(consumer = %consumer_id, "Worker timed out, its jobs stay pending");
                    WorkerOutcome::Timeout
                }
            };
            workers.push(WorkerReport {
                consumer_id,
                outcome,
            });
        }

        let report = PoolReport {
            pool: self.name.clone(),
            workers,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            pool = %self.name,
            elapsed_ms = report.elapsed_ms,
            "[pool] completed={}/{}",
            report.completed(),
            report.total()
        );
        report
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
