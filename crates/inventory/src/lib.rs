//! Inventory domain module.
//!
//! Answers "is quantity Q of product P available right now?" from a snapshot of
//! quantity-on-hand, and plans the stock movements of the opt-in
//! decrement-on-finalize policy. Deterministic domain logic only (no IO).

pub mod availability;
pub mod policy;

pub use availability::{
    StockAdjustment, StockRequest, StockSnapshot, check_availability, merge_requests,
    plan_commit, plan_restore,
};
pub use policy::StockPolicy;
