use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::utils::CircuitState;

// ============================================================================
// Health Check Abstractions
// ============================================================================
//
// Background workers report one `ComponentHealth` each; the health monitor
// folds them into a system status for `/health` and the health gauge.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    /// 0 = healthy, 1 = degraded, 2 = unhealthy.
    pub fn gauge_value(&self) -> i64 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded(_) => 1,
            HealthStatus::Unhealthy(_) => 2,
        }
    }
}

impl From<CircuitState> for HealthStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("circuit breaker half-open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("circuit breaker open".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    #[serde(flatten)]
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub details: Option<String>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Implemented by actors that push their own status to the health monitor.
pub trait HealthCheckable {
    fn check_health(&self) -> ComponentHealth;

    fn component_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breaker_state_maps_to_health() {
        assert!(HealthStatus::from(CircuitState::Closed).is_healthy());
        assert_eq!(HealthStatus::from(CircuitState::HalfOpen).gauge_value(), 1);
        assert!(HealthStatus::from(CircuitState::Open).is_unhealthy());
    }

    #[test]
    fn test_component_health_serializes_flat() {
        let health = ComponentHealth::new("outbox_relay", HealthStatus::Degraded("3 failed".into()))
            .with_details("last pass");
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["name"], "outbox_relay");
        assert_eq!(json["status"], "DEGRADED");
        assert_eq!(json["reason"], "3 failed");
        assert_eq!(json["details"], "last pass");
    }
}
