// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Pure business rules. Orders are event-sourced aggregates; subscriptions,
// drivers and deliveries are versioned records whose transitions return the
// next state for a conditional write. Nothing here performs I/O.
//
// ============================================================================

pub mod meal;
pub mod principal;
pub mod timing;
pub mod catalog;
pub mod order;
pub mod subscription;
pub mod delivery;
pub mod driver;
