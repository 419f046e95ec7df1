//! User-facing operation outcomes
//!
//! The public billing operations never surface raw errors; each returns an
//! [`Outcome`] carrying a short message, a severity tag the frontend can map
//! to its notice styling, and an optional redirect target.

use serde::Serialize;

/// Generic message for any gateway-side failure. Deliberately vague: the
/// buyer cannot act on internal detail and must restart the flow.
pub const GENERIC_PAYMENT_ERROR: &str = "Error processing payment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Danger,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub severity: Severity,
    pub message: String,
    /// Where to send the buyer next, when the operation produced a target
    /// (the hosted-checkout URL on checkout start).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Success,
            message: message.into(),
            redirect: None,
        }
    }

    pub fn danger(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Danger,
            message: message.into(),
            redirect: None,
        }
    }

    /// Generic payment failure, used whenever a gateway or internal error is
    /// absorbed at an operation boundary.
    pub fn payment_error() -> Self {
        Self::danger(GENERIC_PAYMENT_ERROR)
    }

    pub fn with_redirect(mut self, url: impl Into<String>) -> Self {
        self.redirect = Some(url.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.severity == Severity::Success
    }
}
