//! Payment gateway capability
//!
//! The billing core talks to the payment processor exclusively through the
//! [`PaymentGateway`] trait: one synchronous round-trip per call, no retries
//! (a failed call surfaces as a gateway error and the buyer restarts the
//! flow). The production implementation is [`crate::client::NvpGateway`];
//! tests substitute a mock.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::checkout::Cart;
use crate::error::BillingResult;
use paylane_shared::PlanPeriod;

/// Acknowledgement status echoed by the processor for a checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    Success,
    SuccessWithWarning,
    Other(String),
}

impl AckStatus {
    /// Both success variants count as an acknowledged checkout.
    pub fn is_success(&self) -> bool {
        matches!(self, AckStatus::Success | AckStatus::SuccessWithWarning)
    }

    /// Parse the processor's ACK field, case-insensitively.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.trim().to_ascii_uppercase();
        match upper.as_str() {
            "SUCCESS" => AckStatus::Success,
            "SUCCESSWITHWARNING" => AckStatus::SuccessWithWarning,
            _ => AckStatus::Other(upper),
        }
    }
}

/// Status of a recurring billing profile as reported by the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileStatus {
    Active,
    Pending,
    Other(String),
}

impl ProfileStatus {
    /// Active and pending profiles both mean the subscription was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, ProfileStatus::Active | ProfileStatus::Pending)
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "ActiveProfile" => ProfileStatus::Active,
            "PendingProfile" => ProfileStatus::Pending,
            other => ProfileStatus::Other(other.to_string()),
        }
    }
}

/// Result of asking the gateway to authenticate a notification payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationResult {
    Verified,
    /// Anything other than a positive verification, carrying the raw label
    /// for the audit record.
    Invalid(String),
}

impl VerificationResult {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationResult::Verified)
    }

    /// Label recorded into the notification audit row.
    pub fn as_str(&self) -> &str {
        match self {
            VerificationResult::Verified => "VERIFIED",
            VerificationResult::Invalid(label) => label,
        }
    }
}

/// Redirect target returned by checkout initiation.
#[derive(Debug, Clone)]
pub struct CheckoutRedirect {
    pub redirect_url: String,
    pub token: String,
}

/// Checkout session details fetched with the buyer's return token.
#[derive(Debug, Clone)]
pub struct CheckoutDetails {
    pub ack: AckStatus,
    /// The invoice reference we embedded at initiation, echoed back in the
    /// form `<prefix>_<id>`.
    pub invoice_ref: String,
    pub token: String,
}

/// Recurring profile creation result.
#[derive(Debug, Clone)]
pub struct RecurringProfile {
    pub status: ProfileStatus,
    pub profile_id: String,
}

/// One-time payment execution result.
#[derive(Debug, Clone)]
pub struct PaymentExecution {
    /// The processor's per-line payment status label, taken verbatim.
    pub status_label: String,
}

/// Recurring profile cancellation acknowledgement.
#[derive(Debug, Clone)]
pub struct CancelAck {
    pub success: bool,
    pub profile_id: String,
}

/// The processor capability consumed by the billing core.
///
/// Each call is one blocking round-trip to the processor; timeouts and
/// transport errors surface as `BillingError::Gateway`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted-checkout session for the cart; returns the URL the
    /// buyer is redirected to.
    async fn initiate_checkout(
        &self,
        cart: &Cart,
        recurring: bool,
    ) -> BillingResult<CheckoutRedirect>;

    /// Fetch session details after the buyer returns with a token.
    async fn checkout_details(&self, token: &str) -> BillingResult<CheckoutDetails>;

    /// Convert an acknowledged session into a recurring billing profile.
    async fn create_recurring_profile(
        &self,
        token: &str,
        amount_cents: i64,
        description: &str,
        period: PlanPeriod,
    ) -> BillingResult<RecurringProfile>;

    /// Capture a one-time payment for an acknowledged session.
    async fn execute_payment(
        &self,
        cart: &Cart,
        token: &str,
        payer_id: &str,
    ) -> BillingResult<PaymentExecution>;

    /// Ask the processor whether a notification payload is authentic.
    async fn verify_notification(&self, raw_payload: &str) -> BillingResult<VerificationResult>;

    /// Cancel a recurring billing profile.
    async fn cancel_recurring_profile(&self, profile_id: &str) -> BillingResult<CancelAck>;
}
