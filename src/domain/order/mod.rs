// ============================================================================
// Order Domain - Business Logic for Order Aggregate
// ============================================================================
//
// - Value objects (LineItem, OrderStatus, Lifecycle, RefundRecord)
// - Events (OrderPlaced, OrderAccepted, ...)
// - Commands (OrderCommand / OrderAction)
// - Errors (OrderError enum)
// - Aggregate (OrderAggregate with the transition guards)
// - Command Handler (OrderCommandHandler)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
