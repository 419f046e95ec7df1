// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Paylane billing core
//!
//! Mediates between the application and an external payment processor's
//! redirect-based checkout and asynchronous notification protocol.
//!
//! ## Flow
//!
//! - **Checkout**: build the cart, create a Pending invoice, redirect the
//!   buyer to the hosted checkout.
//! - **Confirmation**: finalize the invoice when the buyer returns, grant
//!   entitlement on a paid status.
//! - **Notifications**: audit, verify, and reconcile the processor's
//!   out-of-band status updates (recurring payments, failures, cancels).
//!   Idempotent under at-least-once delivery and tolerant of reordering.
//! - **Cancellation**: user-initiated recurring-profile cancellation.

pub mod checkout;
pub mod client;
pub mod confirm;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod notifications;
pub mod outcome;
pub mod subscriptions;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{Cart, CartItem, CheckoutConfig, CheckoutService};

// Client
pub use client::{GatewayConfig, NvpGateway};

// Confirmation
pub use confirm::ConfirmationService;

// Error
pub use error::{BillingError, BillingResult};

// Gateway
pub use gateway::{
    AckStatus, CancelAck, CheckoutDetails, CheckoutRedirect, PaymentExecution, PaymentGateway,
    ProfileStatus, RecurringProfile, VerificationResult,
};

// Ledger
pub use ledger::{
    EntitlementGrant, Invoice, LedgerStore, NewInvoice, PaymentEvent, PaymentEventOutcome,
    PgLedgerStore, Plan, Transaction, UserEntitlement,
};

// Notifications
pub use notifications::{NotificationFields, NotificationHandler};

// Outcome
pub use outcome::{Outcome, Severity};

// Subscriptions
pub use subscriptions::SubscriptionService;

use sqlx::PgPool;
use std::sync::Arc;

/// Main billing service combining the four public operations.
pub struct BillingService {
    pub checkout: CheckoutService,
    pub confirmation: ConfirmationService,
    pub notifications: NotificationHandler,
    pub subscriptions: SubscriptionService,
}

impl BillingService {
    /// Wire the production gateway and ledger from environment variables.
    pub fn from_env(pool: PgPool, checkout_config: CheckoutConfig) -> BillingResult<Self> {
        let gateway = Arc::new(NvpGateway::new(GatewayConfig::from_env()?)?);
        let ledger = Arc::new(PgLedgerStore::new(pool));
        Ok(Self::new(gateway, ledger, checkout_config))
    }

    /// Wire with explicit collaborators; each operation shares the same
    /// gateway capability and ledger.
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<dyn LedgerStore>,
        checkout_config: CheckoutConfig,
    ) -> Self {
        Self {
            checkout: CheckoutService::new(
                gateway.clone(),
                ledger.clone(),
                checkout_config.clone(),
            ),
            confirmation: ConfirmationService::new(
                gateway.clone(),
                ledger.clone(),
                checkout_config,
            ),
            notifications: NotificationHandler::new(gateway.clone(), ledger.clone()),
            subscriptions: SubscriptionService::new(gateway, ledger),
        }
    }
}
