//! Health check aggregation.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Health status for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    pub fn is_serving(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

#[derive(Debug)]
struct HealthState {
    healthy: bool,
    message: Option<String>,
}

/// Component health state.
///
/// Components start healthy; the limiter flips them on observed failures.
/// The flag and its message change together under one lock.
#[derive(Debug)]
pub struct ComponentHealth {
    name: &'static str,
    state: RwLock<HealthState>,
}

impl ComponentHealth {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(HealthState {
                healthy: true,
                message: None,
            }),
        }
    }

    pub fn set_healthy(&self) {
        // Skip the write lock on the hot path.
        if self.state.read().healthy {
            return;
        }
        let mut state = self.state.write();
        state.healthy = true;
        state.message = None;
    }

    pub fn set_unhealthy(&self, msg: impl Into<String>) {
        let msg = msg.into();
        let mut state = self.state.write();
        state.healthy = false;
        state.message = Some(msg);
    }

    pub fn is_healthy(&self) -> bool {
        self.state.read().healthy
    }

    pub fn message(&self) -> Option<String> {
        self.state.read().message.clone()
    }

    fn report(&self) -> ComponentHealthReport {
        let state = self.state.read();
        ComponentHealthReport {
            name: self.name.to_string(),
            healthy: state.healthy,
            message: state.message.clone(),
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

/// Global health registry.
pub struct HealthRegistry {
    /// Quota check round trips; unhealthy while the limiter fails open.
    pub quota_backend: ComponentHealth,
    /// Usage commits.
    pub quota_commit: ComponentHealth,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            quota_backend: ComponentHealth::new("quota_backend"),
            quota_commit: ComponentHealth::new("quota_commit"),
        }
    }

    /// Generate a health report.
    pub fn report(&self) -> HealthReport {
        let components = vec![self.quota_backend.report(), self.quota_commit.report()];

        let all_healthy = components.iter().all(|c| c.healthy);
        let any_healthy = components.iter().any(|c| c.healthy);

        let status = if all_healthy {
            HealthStatus::Healthy
        } else if any_healthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport { status, components }
    }

    /// Whether cardinality limits are currently being enforced.
    pub fn is_enforcing(&self) -> bool {
        self.quota_backend.is_healthy()
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
