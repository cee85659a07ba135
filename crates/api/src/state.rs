//! Application state shared across handlers.

use job_queue::{QueueConfig, SharedStore};
use worker::StatusMonitor;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Read-only view of the stage queues
    pub monitor: StatusMonitor,
}

impl AppState {
    pub fn new(store: SharedStore, queues: QueueConfig) -> Self {
        Self {
            monitor: StatusMonitor::new(store, queues),
        }
    }
}
