//! Component health registry.
//!
//! Feeds readiness only. The liveness answer served to the platform never
//! consults it, so a store outage cannot fail a liveness check.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Health status for the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Component health state.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    healthy: AtomicBool,
    /// Optional components do not count against readiness when never enabled
    enabled: AtomicBool,
    message: parking_lot::RwLock<Option<String>>,
}

impl ComponentHealth {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            healthy: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            message: parking_lot::RwLock::new(None),
        }
    }

    pub fn set_healthy(&self) {
        self.enabled.store(true, Ordering::Relaxed);
        self.healthy.store(true, Ordering::Relaxed);
        *self.message.write() = None;
    }

    pub fn set_unhealthy(&self, msg: impl Into<String>) {
        self.enabled.store(true, Ordering::Relaxed);
        self.healthy.store(false, Ordering::Relaxed);
        *self.message.write() = Some(msg.into());
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn message(&self) -> Option<String> {
        self.message.read().clone()
    }

    fn report(&self) -> ComponentHealthReport {
        ComponentHealthReport {
            name: self.name.to_string(),
            healthy: self.is_healthy(),
            message: self.message(),
        }
    }
}

/// Aggregated health status.
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
}

/// Health registry for the pipeline's external collaborators.
pub struct HealthRegistry {
    pub store: ComponentHealth,
    pub cold_storage: ComponentHealth,
    pub event_source: ComponentHealth,
    pub dead_letter: ComponentHealth,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            store: ComponentHealth::new("findings_store"),
            cold_storage: ComponentHealth::new("cold_storage"),
            event_source: ComponentHealth::new("event_source"),
            dead_letter: ComponentHealth::new("dead_letter"),
        }
    }

    fn components(&self) -> [&ComponentHealth; 4] {
        [
            &self.store,
            &self.cold_storage,
            &self.event_source,
            &self.dead_letter,
        ]
    }

    /// Generate a health report over enabled components.
    pub fn report(&self) -> HealthReport {
        let components: Vec<ComponentHealthReport> = self
            .components()
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| c.report())
            .collect();

        let status = if !self.store.is_healthy() {
            HealthStatus::Unhealthy
        } else if components.iter().all(|c| c.healthy) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthReport { status, components }
    }

    /// Check if the service can accept traffic.
    pub fn is_ready(&self) -> bool {
        self.store.is_healthy()
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global health registry.
pub static HEALTH: std::sync::LazyLock<HealthRegistry> =
    std::sync::LazyLock::new(HealthRegistry::new);

/// Get the global health registry.
pub fn health() -> &'static HealthRegistry {
    &HEALTH
}
