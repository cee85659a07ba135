//! Retry with exponential backoff and dead-letter quarantine.
//!
//! Retries happen in place: the worker keeps the delivery and sleeps through
//! the backoff, it never re-reads the job from the queue.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use job_queue::{ConsumerGroup, DeadLetterQueue};
use pipeline_core::{DeadLetterRecord, JobId, JobRecord, Result};
use telemetry::metrics;
use tracing::{debug, error, warn};

use crate::handler::JobHandler;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Retries after the first attempt; a job runs at most `max_retries + 1` times.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

impl BackoffPolicy {
    /// `min(base_delay * 2^attempt, max_delay)` for a 0-indexed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Computed in u128 nanos so the exponent never truncates before the cap.
        let cap = self.max_delay.as_nanos();
        let nanos = 1u128
            .checked_shl(attempt)
            .and_then(|factor| self.base_delay.as_nanos().checked_mul(factor))
            .map_or(cap, |delay| delay.min(cap));
        // `nanos <= cap`, and `cap` came from a Duration, so the seconds fit.
        Duration::new((nanos / NANOS_PER_SEC) as u64, (nanos % NANOS_PER_SEC) as u32)
    }
}

/// A handler that retries `inner` according to `policy`.
pub struct WithRetry<H> {
    inner: H,
    policy: BackoffPolicy,
}

/// Wraps a handler so failures are retried in place with backoff. The
/// wrapped handler fails only once the retry budget is spent, with the
/// last error.
pub fn with_retry<H: JobHandler>(handler: H, policy: BackoffPolicy) -> WithRetry<H> {
    WithRetry {
        inner: handler,
        policy,
    }
}

impl<H> WithRetry<H> {
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }
}

#[async_trait]
impl<H: JobHandler> JobHandler for WithRetry<H> {
    async fn handle(&self, job_id: &JobId, record: &JobRecord) -> anyhow::Result<()> {
        let mut attempt = 0;

        loop {
            let mut current = record.clone();
            current.retry_count = attempt;

            let started = Instant::now();
            let result = self.inner.handle(job_id, &current).await;
            metrics()
                .handler_latency_ms
                .observe(started.elapsed().as_millis() as u64);

            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            metrics().handler_failures.inc();
            if attempt >= self.policy.max_retries {
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                job_id = %job_id,
                window_id = %record.window_id,
                attempt = attempt + 1,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %format!("{err:#}"),
                "Handler failed, retrying"
            );
            metrics().jobs_retried.inc();
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Runs a job to a terminal state: acked after success, or dead-lettered
/// and acked after the retry budget is spent.
#[derive(Clone)]
pub struct RetryCoordinator {
    group: ConsumerGroup,
    dead_letter: DeadLetterQueue,
    policy: BackoffPolicy,
}

impl RetryCoordinator {
    pub fn new(group: ConsumerGroup, dead_letter: DeadLetterQueue, policy: BackoffPolicy) -> Self {
        Self {
            group,
            dead_letter,
            policy,
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Returns `true` if the handler succeeded, `false` if the job was
    /// dead-lettered. Only store errors (ack, DLQ write) are returned as `Err`.
    pub async fn process<H: JobHandler + ?Sized>(
        &self,
        job_id: &JobId,
        record: &JobRecord,
        handler: &H,
    ) -> Result<bool> {
        let retrying = with_retry(handler, self.policy);

        match retrying.handle(job_id, record).await {
            Ok(()) => {
                self.group.ack(job_id).await?;
                metrics().jobs_succeeded.inc();
                debug!(job_id = %job_id, "Job succeeded");
                Ok(true)
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(
                    job_id = %job_id,
                    window_id = %record.window_id,
                    stage = %record.stage,
                    attempts = self.policy.max_retries + 1,
                    error = %message,
                    "Retries exhausted"
                );

                let dead = DeadLetterRecord::new(record.clone(), job_id.clone(), message);
                self.dead_letter.push(&dead).await?;
                self.group.ack(job_id).await?;
                Ok(false)
            }
        }
    }
}
