//! Internal telemetry for the stage pipeline.
//!
//! Structured logging setup, in-process counters, and a component health
//! registry. No external metrics system is involved.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
