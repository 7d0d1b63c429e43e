// ============================================================================
// Driver Domain - availability and round-robin rotation
// ============================================================================

pub mod model;
pub mod errors;

pub use model::*;
pub use errors::*;
