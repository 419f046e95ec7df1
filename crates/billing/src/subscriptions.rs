//! Subscription cancellation
//!
//! User-initiated cancellation of a recurring billing profile. Unlike the
//! notification path, this is synchronous and user-facing, so gateway
//! refusals surface as an explicit danger outcome instead of a silent no-op.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::BillingResult;
use crate::gateway::PaymentGateway;
use crate::ledger::LedgerStore;
use crate::outcome::Outcome;

pub struct SubscriptionService {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn LedgerStore>,
}

impl SubscriptionService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { gateway, ledger }
    }

    /// Cancel the acting user's recurring subscription.
    ///
    /// On gateway acknowledgement, every invoice sharing the recurring
    /// reference is flipped to `Canceled` and the user's entitlement is
    /// suspended.
    pub async fn cancel_subscription(&self, user_id: Uuid) -> Outcome {
        match self.cancel_inner(user_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Subscription cancellation failed");
                Outcome::payment_error()
            }
        }
    }

    async fn cancel_inner(&self, user_id: Uuid) -> BillingResult<Outcome> {
        let Some(invoice) = self.ledger.latest_invoice_for_user(user_id).await? else {
            tracing::warn!(user_id = %user_id, "Cancellation requested with no invoices");
            return Ok(Outcome::danger("No subscription to cancel"));
        };
        let Some(recurring_id) = invoice.recurring_id.clone() else {
            tracing::warn!(
                user_id = %user_id,
                invoice_id = invoice.id,
                "Cancellation requested but latest invoice is not recurring"
            );
            return Ok(Outcome::danger("No subscription to cancel"));
        };

        let ack = self.gateway.cancel_recurring_profile(&recurring_id).await?;
        if !ack.success {
            tracing::warn!(
                user_id = %user_id,
                recurring_id = %recurring_id,
                "Gateway refused subscription cancellation"
            );
            return Ok(Outcome::payment_error());
        }

        let canceled = self
            .ledger
            .cancel_invoices_by_recurring_id(&ack.profile_id)
            .await?;
        self.ledger.suspend_entitlement(user_id).await?;

        tracing::info!(
            user_id = %user_id,
            recurring_id = %ack.profile_id,
            invoices_canceled = canceled,
            "Subscription canceled"
        );
        Ok(Outcome::success("Your subscription has been canceled"))
    }
}
