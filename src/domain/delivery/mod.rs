// ============================================================================
// Delivery Domain - delivery records and their milestones
// ============================================================================

pub mod model;
pub mod errors;

pub use model::*;
pub use errors::*;
