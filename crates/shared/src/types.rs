//! Status and period enums shared across crates.
//!
//! Persisted as text; the conversion helpers here are the single place the
//! wire/database labels are spelled out.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an invoice.
///
/// `Pending` at creation, finalized by the confirmation handler, and moved
/// through `Completed`/`Failed`/`Canceled` by notification reconciliation.
/// `Invalid` is the catch-all for gateway statuses we do not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    /// Recurring profile accepted by the processor (active or pending profile).
    Processed,
    Failed,
    Canceled,
    Invalid,
}

impl PaymentStatus {
    /// A paid status grants entitlement.
    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Processed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "Pending",
            PaymentStatus::Completed => "Completed",
            PaymentStatus::Processed => "Processed",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Canceled => "Canceled",
            PaymentStatus::Invalid => "Invalid",
        }
    }

    /// Map a gateway-reported status label onto the invoice lifecycle.
    ///
    /// The processor reports per-line payment statuses as free-form labels;
    /// anything we do not recognize becomes `Invalid` rather than failing the
    /// whole confirmation.
    pub fn from_gateway_label(label: &str) -> Self {
        match label.trim() {
            s if s.eq_ignore_ascii_case("Pending") => PaymentStatus::Pending,
            s if s.eq_ignore_ascii_case("Completed") => PaymentStatus::Completed,
            s if s.eq_ignore_ascii_case("Processed") => PaymentStatus::Processed,
            s if s.eq_ignore_ascii_case("Failed") => PaymentStatus::Failed,
            s if s.eq_ignore_ascii_case("Canceled") => PaymentStatus::Canceled,
            _ => PaymentStatus::Invalid,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PaymentStatus::Pending),
            "Completed" => Ok(PaymentStatus::Completed),
            "Processed" => Ok(PaymentStatus::Processed),
            "Failed" => Ok(PaymentStatus::Failed),
            "Canceled" => Ok(PaymentStatus::Canceled),
            "Invalid" => Ok(PaymentStatus::Invalid),
            _ => Err(UnknownLabel(s.to_string())),
        }
    }
}

/// User entitlement status, derived from the most recent confirmed payment
/// event for the user's active subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Active,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Active => "active",
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UserStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UserStatus::Pending),
            "active" => Ok(UserStatus::Active),
            _ => Err(UnknownLabel(s.to_string())),
        }
    }
}

/// Billing period of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanPeriod {
    Monthly,
    Yearly,
}

impl PlanPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanPeriod::Monthly => "monthly",
            PlanPeriod::Yearly => "yearly",
        }
    }

    /// Capitalized form used in line-item and subscription descriptions.
    pub fn display_name(&self) -> &'static str {
        match self {
            PlanPeriod::Monthly => "Monthly",
            PlanPeriod::Yearly => "Yearly",
        }
    }
}

impl std::fmt::Display for PlanPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlanPeriod {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monthly" => Ok(PlanPeriod::Monthly),
            "yearly" => Ok(PlanPeriod::Yearly),
            _ => Err(UnknownLabel(s.to_string())),
        }
    }
}

/// A label that does not match any known variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown label: {0}")]
pub struct UnknownLabel(pub String);
