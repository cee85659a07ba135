//! Pipeline runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use pipeline_core::{Error, Result, Stage, WindowClock};
use serde::{Deserialize, Serialize};

use crate::consumer::StageWorkerConfig;
use crate::drain::DrainWaiter;
use crate::retry::BackoffPolicy;

/// Worker pools, retry policy, drain barrier, schedule, and window settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_workers")]
    pub phase1_workers: usize,
    #[serde(default = "default_workers")]
    pub phase2_workers: usize,
    /// Wall-clock limit for a whole worker pool
    #[serde(default = "default_long_wait_secs")]
    pub pool_timeout_secs: u64,
    #[serde(default = "default_drain_poll_secs")]
    pub drain_poll_secs: u64,
    #[serde(default = "default_long_wait_secs")]
    pub drain_max_wait_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_delay_ms: u64,
    /// Sleep between reads when a worker finds nothing but the stage is not drained
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
    /// Cron expression; 5 fields, or 6 with leading seconds
    #[serde(default = "default_cron_spec")]
    pub cron_spec: String,
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    #[serde(default)]
    pub run_on_start: bool,
    /// Delete both stage queues before the scheduler starts
    #[serde(default)]
    pub clear_queues_on_start: bool,
}

/// Upper bound for pool and drain waits: one week.
pub const MAX_WAIT_SECS: u64 = 7 * 24 * 3600;

fn default_workers() -> usize {
    3
}

fn default_long_wait_secs() -> u64 {
    1800
}

fn default_drain_poll_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    1000
}

fn default_retry_max_ms() -> u64 {
    60_000
}

fn default_idle_poll_ms() -> u64 {
    500
}

fn default_cron_spec() -> String {
    "0 */2 * * *".to_string()
}

fn default_utc_offset_hours() -> i32 {
    pipeline_core::DEFAULT_UTC_OFFSET_HOURS
}

fn default_window_hours() -> u32 {
    pipeline_core::DEFAULT_WINDOW_HOURS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            phase1_workers: default_workers(),
            phase2_workers: default_workers(),
            pool_timeout_secs: default_long_wait_secs(),
            drain_poll_secs: default_drain_poll_secs(),
            drain_max_wait_secs: default_long_wait_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_ms(),
            retry_max_delay_ms: default_retry_max_ms(),
            idle_poll_ms: default_idle_poll_ms(),
            cron_spec: default_cron_spec(),
            utc_offset_hours: default_utc_offset_hours(),
            window_hours: default_window_hours(),
            run_on_start: false,
            clear_queues_on_start: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.phase1_workers == 0 || self.phase2_workers == 0 {
            return Err(Error::config("worker counts must be at least 1"));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(Error::config("retry base delay exceeds max delay"));
        }
        if self.pool_timeout_secs > MAX_WAIT_SECS {
            return Err(Error::config(format!(
                "pool_timeout_secs must be at most {MAX_WAIT_SECS}"
            )));
        }
        if self.drain_max_wait_secs > MAX_WAIT_SECS {
            return Err(Error::config(format!(
                "drain_max_wait_secs must be at most {MAX_WAIT_SECS}"
            )));
        }
        self.window_clock()?;
        Ok(())
    }

    pub fn workers(&self, stage: Stage) -> usize {
        match stage {
            Stage::Phase1 => self.phase1_workers,
            Stage::Phase2 => self.phase2_workers,
        }
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_secs)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn drain_waiter(&self) -> DrainWaiter {
        DrainWaiter::new(
            Duration::from_secs(self.drain_poll_secs),
            Duration::from_secs(self.drain_max_wait_secs),
        )
    }

    pub fn window_clock(&self) -> Result<WindowClock> {
        WindowClock::new(self.utc_offset_hours, self.window_hours)
    }

    /// Per-worker read settings; batch size and block timeout come from the queue config.
    pub fn stage_worker(&self, batch_size: usize, block_timeout: Duration) -> StageWorkerConfig {
        StageWorkerConfig {
            batch_size,
            block_timeout,
            idle_poll: Duration::from_millis(self.idle_poll_ms),
        }
    }
}

/// Settings for the built-in file artifact collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Payload key carrying the phase-1 unit
    #[serde(default = "default_phase1_key")]
    pub phase1_key: String,
    #[serde(default)]
    pub phase1_units: Vec<String>,
    #[serde(default = "default_phase2_key")]
    pub phase2_key: String,
    #[serde(default)]
    pub phase2_units: Vec<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_phase1_key() -> String {
    "org_id".to_string()
}

fn default_phase2_key() -> String {
    "user_id".to_string()
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            phase1_key: default_phase1_key(),
            phase1_units: Vec::new(),
            phase2_key: default_phase2_key(),
            phase2_units: Vec::new(),
        }
    }
}

impl WorkConfig {
    pub fn key(&self, stage: Stage) -> &str {
        match stage {
            Stage::Phase1 => &self.phase1_key,
            Stage::Phase2 => &self.phase2_key,
        }
    }
}
