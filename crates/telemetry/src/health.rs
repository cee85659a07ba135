//! Component health for the pipeline process.
//!
//! Two components matter: the backing queue store (nothing runs without it)
//! and the cron scheduler loop (runs stop being triggered without it).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Overall process health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Store reachable, scheduler not running: manual runs and status still work.
    Degraded,
    /// Store unreachable.
    Unhealthy,
}

impl HealthStatus {
    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

#[derive(Debug, Default)]
struct Detail {
    message: Option<String>,
    changed_at: Option<DateTime<Utc>>,
}

/// Health flag for one component, with the reason and time of the last change.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    healthy: AtomicBool,
    detail: RwLock<Detail>,
}

impl ComponentHealth {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            healthy: AtomicBool::new(false),
            detail: RwLock::new(Detail {
                message: None,
                changed_at: None,
            }),
        }
    }

    pub fn set_healthy(&self) {
        self.set(true, None);
    }

    pub fn set_unhealthy(&self, msg: impl Into<String>) {
        self.set(false, Some(msg.into()));
    }

    fn set(&self, healthy: bool, message: Option<String>) {
        let mut detail = self.detail.write();
        let was = self.healthy.swap(healthy, Ordering::AcqRel);
        if was != healthy || detail.changed_at.is_none() {
            detail.changed_at = Some(Utc::now());
        }
        detail.message = message;
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn message(&self) -> Option<String> {
        self.detail.read().message.clone()
    }

    fn snapshot(&self) -> ComponentHealthReport {
        let detail = self.detail.read();
        ComponentHealthReport {
            name: self.name.to_string(),
            healthy: self.is_healthy(),
            message: detail.message.clone(),
            since: detail.changed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealthReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthReport {
    pub name: String,
    pub healthy: bool,
    pub message: Option<String>,
    /// Last healthy/unhealthy transition; `None` if never reported.
    pub since: Option<DateTime<Utc>>,
}

pub struct HealthRegistry {
    /// Backing log store (queues, consumer groups, DLQs).
    pub queue_store: ComponentHealth,
    /// Cron scheduler loop.
    pub scheduler: ComponentHealth,
}

impl HealthRegistry {
    pub const fn new() -> Self {
        Self {
            queue_store: ComponentHealth::new("queue_store"),
            scheduler: ComponentHealth::new("scheduler"),
        }
    }

    pub fn report(&self) -> HealthReport {
        let status = match (self.queue_store.is_healthy(), self.scheduler.is_healthy()) {
            (false, _) => HealthStatus::Unhealthy,
            (true, false) => HealthStatus::Degraded,
            (true, true) => HealthStatus::Healthy,
        };

        HealthReport {
            status,
            components: vec![self.queue_store.snapshot(), self.scheduler.snapshot()],
        }
    }

    /// Ready once the backing store has answered a ping.
    pub fn is_ready(&self) -> bool {
        self.queue_store.is_healthy()
    }

    pub fn is_alive(&self) -> bool {
        true
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub static HEALTH: std::sync::LazyLock<HealthRegistry> =
    std::sync::LazyLock::new(HealthRegistry::new);

/// Process-wide health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}
