//! Billing error taxonomy
//!
//! Every public billing operation catches these at its boundary and converts
//! them into a generic user-facing [`Outcome`](crate::outcome::Outcome);
//! internal detail never reaches the buyer.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Any failure communicating with, or interpreting a response from, the
    /// payment processor.
    #[error("gateway error: {0}")]
    Gateway(String),

    /// An inbound notification failed authenticity verification.
    #[error("notification verification failed: {0}")]
    Verification(String),

    /// An invoice or subscription reference could not be resolved.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed plan, period, or request input.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(e: reqwest::Error) -> Self {
        BillingError::Gateway(e.to_string())
    }
}
