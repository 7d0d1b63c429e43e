// ============================================================================
// Infrastructure Actors
// ============================================================================
//
// Background workers around the request path:
// - Outbox relay for post-commit effects
// - Dead letter queue
// - Health monitoring
// - Coordination and supervision
//
// ============================================================================

mod outbox_relay;
mod dlq;
mod health_monitor;
mod coordinator;

pub use outbox_relay::{OutboxRelay, RelaySettings};
pub use dlq::{AddToDlq, DlqActor, DlqStats, GetDlqMessages, GetDlqStats};
pub use health_monitor::{GetSystemHealth, HealthMonitorActor, SystemHealth, UpdateHealth};
pub use coordinator::{CoordinatorActor, GetDlq, GetHealthMonitor, Shutdown};
