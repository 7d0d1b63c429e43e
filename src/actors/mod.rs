// ============================================================================
// Actors Module
// ============================================================================
//
// Actor-based infrastructure for asynchronous, concurrent operations.
//
// Structure:
// - core/           - Health abstractions (HealthStatus, HealthCheckable)
// - infrastructure/ - Concrete infrastructure actors (Outbox relay, DLQ, Health, Coordinator)
//
// Note: Order operations run through the fulfillment engine, NOT actors.
//       Actors are reserved for infrastructure concerns only.
//
// ============================================================================

mod core;
mod infrastructure;

pub use core::{ComponentHealth, HealthStatus};
pub use infrastructure::{
    AddToDlq, CoordinatorActor, DlqActor, DlqStats, GetDlq, GetDlqMessages, GetDlqStats, GetHealthMonitor,
    GetSystemHealth, HealthMonitorActor, RelaySettings, Shutdown, SystemHealth, UpdateHealth,
};
