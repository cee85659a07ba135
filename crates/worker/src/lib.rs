//! Workers for the stage pipeline.
//!
//! - Retry (in-place exponential backoff, dead-letter on exhaustion)
//! - Stage worker (consumer-group reader, one job at a time)
//! - Worker pool (K consumers under one deadline)
//! - Drain barrier and two-phase orchestration
//! - Cron scheduler with overlap suppression
//! - Status monitor (read-only)

pub mod artifact;
pub mod config;
pub mod consumer;
pub mod drain;
pub mod handler;
pub mod monitor;
pub mod orchestrator;
pub mod pool;
pub mod retry;
pub mod scheduler;

pub use config::*;
pub use consumer::*;
pub use drain::DrainWaiter;
pub use handler::*;
pub use monitor::*;
pub use orchestrator::*;
pub use pool::*;
pub use retry::*;
pub use scheduler::*;
