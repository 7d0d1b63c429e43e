// ============================================================================
// Meal Fulfillment - order orchestration for a scheduled meal-delivery service
// ============================================================================
//
// Layers:
// - domain/          - aggregates, records and their business rules
// - event_sourcing/  - event store + transactional outbox
// - store/           - versioned record stores (ScyllaDB, in-memory)
// - fulfillment/     - the engine: placement, lifecycle, dispatch, refunds
// - actors/          - outbox relay, DLQ, health monitoring
// - api/             - actix-web JSON API
//
// ============================================================================

pub mod actors;
pub mod api;
pub mod config;
pub mod domain;
pub mod event_sourcing;
pub mod fulfillment;
pub mod metrics;
pub mod store;
pub mod utils;
