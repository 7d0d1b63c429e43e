// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================

pub mod event_store;
pub mod memory;
pub mod scylla_store;

pub use event_store::{load_aggregate, ConcurrencyConflict, EventStore, OutboxStore};
pub use memory::InMemoryEventStore;
pub use scylla_store::ScyllaEventStore;
