//! Health and readiness tracking for the HTTP checks
//!
//! Each collector is a component. Watch failures degrade it; readiness
//! additionally requires the exporter to have finished its initial sync.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Compute overall status from component statuses
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component health plus the exporter-wide ready flag
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    /// Component -> degraded source (e.g. one watch) -> message
    degraded_sources: Arc<RwLock<HashMap<String, BTreeMap<String, String>>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            degraded_sources: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    /// Mark a component healthy, leaving unknown names unregistered
    pub async fn set_healthy(&self, name: &str) {
        let mut components = self.components.write().await;
        if let Some(health) = components.get_mut(name) {
            if health.status != ComponentStatus::Healthy {
                *health = ComponentHealth::healthy();
            }
        }
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Degrade a component on behalf of one of its sources. The component
    /// stays degraded until every degraded source has recovered. An
    /// unhealthy component is left unhealthy.
    pub async fn set_source_degraded(
        &self,
        name: &str,
        source: &str,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let mut sources = self.degraded_sources.write().await;
        sources
            .entry(name.to_string())
            .or_default()
            .insert(source.to_string(), message.clone());

        let mut components = self.components.write().await;
        let unhealthy = components
            .get(name)
            .is_some_and(|h| h.status == ComponentStatus::Unhealthy);
        if !unhealthy {
            components.insert(name.to_string(), ComponentHealth::degraded(message));
        }
    }

    /// Clear one source's degradation. The component turns healthy only
    /// when no other source is still degraded.
    pub async fn set_source_healthy(&self, name: &str, source: &str) {
        let mut sources = self.degraded_sources.write().await;
        let remaining = match sources.get_mut(name) {
            Some(degraded) => {
                if degraded.remove(source).is_none() {
                    return;
                }
                degraded.values().next().cloned()
            }
            None => return,
        };

        let mut components = self.components.write().await;
        match remaining {
            Some(message) => {
                if let Some(health) = components.get_mut(name) {
                    if health.status == ComponentStatus::Degraded {
                        *health = ComponentHealth::degraded(message);
                    }
                }
            }
            None => {
                sources.remove(name);
                if let Some(health) = components.get_mut(name) {
                    if health.status == ComponentStatus::Degraded {
                        *health = ComponentHealth::healthy();
                    }
                }
            }
        }
    }

    /// Set once every collector has synced; cleared on shutdown
    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        if !ready {
            ReadinessResponse {
                ready: false,
                reason: Some("Collector caches not yet synced".to_string()),
            }
        } else if health.status == ComponentStatus::Unhealthy {
            let failing: Vec<&str> = health
                .components
                .iter()
                .filter(|(_, h)| h.status == ComponentStatus::Unhealthy)
                .map(|(name, _)| name.as_str())
                .collect();
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy collectors: {}", failing.join(", "))),
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        }
    }
}
