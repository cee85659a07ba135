//! In-process pipeline counters.
//!
//! A snapshot is logged after each run and served at `GET /metrics`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Up/down gauge. Never goes below zero.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Increments now and decrements when the guard drops, including when
    /// the owning future is aborted mid-await.
    pub fn track(&self) -> GaugeGuard<'_> {
        self.inc();
        GaugeGuard(self)
    }
}

/// Holds one unit of a [`Gauge`] until dropped.
#[must_use = "the gauge is decremented as soon as the guard is dropped"]
#[derive(Debug)]
pub struct GaugeGuard<'a>(&'a Gauge);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Upper bounds (ms) for handler calls: sub-second API calls up to a few minutes.
pub const HANDLER_BUCKETS_MS: &[u64] = &[10, 50, 100, 500, 1_000, 5_000, 30_000, 120_000];

/// Upper bounds (ms) for whole runs: up to the two-hour window.
pub const RUN_BUCKETS_MS: &[u64] = &[1_000, 10_000, 60_000, 300_000, 900_000, 1_800_000, 7_200_000];

/// Millisecond histogram with fixed upper bounds plus an overflow bucket.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [u64],
    /// One per bound, then overflow.
    buckets: Vec<AtomicU64>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn with_bounds(bounds: &'static [u64]) -> Self {
        Self {
            bounds,
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        let idx = self.bounds.partition_point(|&bound| bound < ms);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.sum() as f64 / n as f64,
        }
    }

    /// `(upper_bound, count)` pairs; the overflow bucket has bound `None`.
    pub fn buckets(&self) -> Vec<(Option<u64>, u64)> {
        self.bounds
            .iter()
            .map(|&b| Some(b))
            .chain(std::iter::once(None))
            .zip(&self.buckets)
            .map(|(bound, count)| (bound, count.load(Ordering::Relaxed)))
            .collect()
    }
}

/// Collected metrics for the stage pipeline.
#[derive(Debug)]
pub struct Metrics {
    // Producer metrics
    pub jobs_enqueued: Counter,
    pub enqueue_errors: Counter,

    // Retry coordinator metrics
    pub jobs_succeeded: Counter,
    pub jobs_retried: Counter,
    pub jobs_dead_lettered: Counter,
    pub handler_failures: Counter,

    // Worker pool metrics
    pub workers_succeeded: Counter,
    pub workers_timed_out: Counter,
    pub workers_failed: Counter,

    // Pipeline metrics
    pub runs_started: Counter,
    pub runs_failed: Counter,
    pub runs_skipped: Counter,
    pub drain_timeouts: Counter,

    // Latency histograms
    pub handler_latency_ms: Histogram,
    pub run_latency_ms: Histogram,

    // Gauges
    pub active_workers: Gauge,
    pub run_active: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_enqueued: Counter::default(),
            enqueue_errors: Counter::default(),
            jobs_succeeded: Counter::default(),
            jobs_retried: Counter::default(),
            jobs_dead_lettered: Counter::default(),
            handler_failures: Counter::default(),
            workers_succeeded: Counter::default(),
            workers_timed_out: Counter::default(),
            workers_failed: Counter::default(),
            runs_started: Counter::default(),
            runs_failed: Counter::default(),
            runs_skipped: Counter::default(),
            drain_timeouts: Counter::default(),
            handler_latency_ms: Histogram::with_bounds(HANDLER_BUCKETS_MS),
            run_latency_ms: Histogram::with_bounds(RUN_BUCKETS_MS),
            active_workers: Gauge::default(),
            run_active: Gauge::default(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub jobs_enqueued: u64,
    pub enqueue_errors: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
    pub handler_failures: u64,
    pub workers_succeeded: u64,
    pub workers_timed_out: u64,
    pub workers_failed: u64,
    pub runs_started: u64,
    pub runs_failed: u64,
    pub runs_skipped: u64,
    pub drain_timeouts: u64,
    pub handler_latency_mean_ms: f64,
    pub run_latency_mean_ms: f64,
    pub active_workers: u64,
    pub run_active: bool,
}

impl Metrics {
    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            jobs_enqueued: self.jobs_enqueued.get(),
            enqueue_errors: self.enqueue_errors.get(),
            jobs_succeeded: self.jobs_succeeded.get(),
            jobs_retried: self.jobs_retried.get(),
            jobs_dead_lettered: self.jobs_dead_lettered.get(),
            handler_failures: self.handler_failures.get(),
            workers_succeeded: self.workers_succeeded.get(),
            workers_timed_out: self.workers_timed_out.get(),
            workers_failed: self.workers_failed.get(),
            runs_started: self.runs_started.get(),
            runs_failed: self.runs_failed.get(),
            runs_skipped: self.runs_skipped.get(),
            drain_timeouts: self.drain_timeouts.get(),
            handler_latency_mean_ms: self.handler_latency_ms.mean(),
            run_latency_mean_ms: self.run_latency_ms.mean(),
            active_workers: self.active_workers.get(),
            run_active: self.run_active.get() > 0,
        }
    }
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
