// ============================================================================
// Subscription Domain - voucher balances and redemptions
// ============================================================================

pub mod model;
pub mod errors;

pub use model::*;
pub use errors::*;
