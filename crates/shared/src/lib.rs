//! Paylane shared types
//!
//! Cross-crate building blocks: the payment/entitlement status enums used by
//! both the billing core and the API layer, plus database pool construction.

pub mod db;
pub mod types;

pub use db::create_pool;
pub use types::{PaymentStatus, PlanPeriod, UserStatus};
