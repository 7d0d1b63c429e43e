use actix::prelude::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::actors::core::{ComponentHealth, HealthStatus};
use crate::metrics::Metrics;

// ============================================================================
// Health Monitor Actor - Monitors system health
// ============================================================================
//
// Responsibilities:
// - Track health status pushed by each background component
// - Mark components stale when they stop reporting
// - Aggregate system-wide health for `/health` and the health gauge
//
// ============================================================================

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

// ============================================================================
// Messages
// ============================================================================

#[derive(Message)]
#[rtype(result = "()")]
pub struct UpdateHealth {
    pub component: String,
    pub status: HealthStatus,
    pub details: Option<String>,
}

#[derive(Message)]
#[rtype(result = "SystemHealth")]
pub struct GetSystemHealth;

#[derive(Debug, Clone, Serialize, MessageResponse)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

// ============================================================================
// Health Monitor Actor
// ============================================================================

pub struct HealthMonitorActor {
    components: HashMap<String, ComponentHealth>,
    metrics: Arc<Metrics>,
    /// Reports older than this count as a degraded component.
    stale_after: chrono::Duration,
}

impl HealthMonitorActor {
    pub fn new(metrics: Arc<Metrics>, stale_after: chrono::Duration) -> Self {
        Self {
            components: HashMap::new(),
            metrics,
            stale_after,
        }
    }

    fn compute_overall_status(&self, now: DateTime<Utc>) -> HealthStatus {
        let mut degraded = Vec::new();
        let mut unhealthy = Vec::new();

        for (name, health) in &self.components {
            match &health.status {
                HealthStatus::Unhealthy(msg) => unhealthy.push(format!("{}: {}", name, msg)),
                HealthStatus::Degraded(msg) => degraded.push(format!("{}: {}", name, msg)),
                HealthStatus::Healthy if now - health.last_check > self.stale_after => {
                    degraded.push(format!("{}: no report since {}", name, health.last_check))
                }
                HealthStatus::Healthy => {}
            }
        }

        if !unhealthy.is_empty() {
            unhealthy.sort();
            HealthStatus::Unhealthy(unhealthy.join(", "))
        } else if !degraded.is_empty() {
            degraded.sort();
            HealthStatus::Degraded(degraded.join(", "))
        } else {
            HealthStatus::Healthy
        }
    }

    fn sweep(&mut self) {
        let status = self.compute_overall_status(Utc::now());
        self.metrics.actor_health_status.set(status.gauge_value());
    }
}

impl Actor for HealthMonitorActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("HealthMonitorActor started");
        ctx.run_interval(SWEEP_INTERVAL, |act, _ctx| act.sweep());
    }
}

// ============================================================================
// Message Handlers
// ============================================================================

impl Handler<UpdateHealth> for HealthMonitorActor {
    type Result = ();

    fn handle(&mut self, msg: UpdateHealth, _ctx: &mut Self::Context) {
        let previous = self.components.get(&msg.component).map(|h| h.status.clone());
        if previous.as_ref() != Some(&msg.status) {
            tracing::info!(
                component = %msg.component,
                status = ?msg.status,
                "Component health changed"
            );
        }

        let mut health = ComponentHealth::new(msg.component.clone(), msg.status);
        health.details = msg.details;
        self.components.insert(msg.component, health);
        self.sweep();
    }
}

impl Handler<GetSystemHealth> for HealthMonitorActor {
    type Result = SystemHealth;

    fn handle(&mut self, _msg: GetSystemHealth, _ctx: &mut Self::Context) -> Self::Result {
        let now = Utc::now();
        SystemHealth {
            overall_status: self.compute_overall_status(now),
            components: self.components.clone(),
            check_time: now,
        }
    }
}
