//! Checkout confirmation
//!
//! Consumes the buyer's return from the hosted checkout: validates the
//! gateway acknowledgement, finalizes the invoice, and grants entitlement on
//! a paid status. All gateway and internal errors are absorbed into a
//! generic danger outcome at this boundary.

use std::sync::Arc;

use paylane_shared::PaymentStatus;
use time::{Duration, OffsetDateTime};

use crate::checkout::{Cart, CheckoutConfig};
use crate::error::{BillingError, BillingResult};
use crate::gateway::PaymentGateway;
use crate::ledger::{EntitlementGrant, LedgerStore};
use crate::outcome::Outcome;

/// Trial extension granted with the first paid confirmation.
const TRIAL_DAYS: i64 = 7;

/// Payment method label bound to the user on entitlement grant.
const PAYMENT_METHOD: &str = "express_checkout";

pub struct ConfirmationService {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn LedgerStore>,
    config: CheckoutConfig,
}

impl ConfirmationService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        ledger: Arc<dyn LedgerStore>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            gateway,
            ledger,
            config,
        }
    }

    /// Finalize a checkout the buyer just returned from.
    pub async fn complete_checkout(
        &self,
        plan_slug: &str,
        token: &str,
        payer_id: &str,
        recurring: bool,
    ) -> Outcome {
        match self
            .complete_inner(plan_slug, token, payer_id, recurring)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    plan_slug = %plan_slug,
                    error = %e,
                    "Checkout confirmation failed"
                );
                Outcome::payment_error()
            }
        }
    }

    async fn complete_inner(
        &self,
        plan_slug: &str,
        token: &str,
        payer_id: &str,
        recurring: bool,
    ) -> BillingResult<Outcome> {
        let Some(plan) = self.ledger.plan_by_slug(plan_slug).await? else {
            tracing::warn!(plan_slug = %plan_slug, "Confirmation for unknown plan");
            return Ok(Outcome::payment_error());
        };

        let details = self.gateway.checkout_details(token).await?;
        if !details.ack.is_success() {
            // Not acknowledged: the invoice stays Pending and nothing is
            // granted; the buyer has to restart the flow.
            tracing::warn!(
                plan_slug = %plan_slug,
                ack = ?details.ack,
                "Checkout not acknowledged by gateway"
            );
            return Ok(Outcome::payment_error());
        }

        let invoice_id = CheckoutConfig::parse_invoice_ref(&details.invoice_ref)
            .ok_or_else(|| {
                BillingError::Validation(format!(
                    "malformed invoice reference {:?}",
                    details.invoice_ref
                ))
            })?;

        let invoice = self
            .ledger
            .invoice(invoice_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("invoice {invoice_id}")))?;

        let cart = Cart::for_plan(&plan, recurring, invoice_id, &self.config);

        let (status, recurring_id) = if recurring {
            let description = cart
                .subscription_description
                .as_deref()
                .unwrap_or(&cart.description);
            let profile = self
                .gateway
                .create_recurring_profile(&details.token, cart.total_cents, description, plan.period)
                .await?;
            let status = if profile.status.is_accepted() {
                PaymentStatus::Processed
            } else {
                PaymentStatus::Invalid
            };
            (status, Some(profile.profile_id))
        } else {
            let execution = self.gateway.execute_payment(&cart, token, payer_id).await?;
            // The gateway's per-line label is taken verbatim; unknown labels
            // map to Invalid.
            (PaymentStatus::from_gateway_label(&execution.status_label), None)
        };

        self.ledger
            .finalize_invoice(invoice_id, status, recurring_id.clone())
            .await?;

        tracing::info!(
            invoice_id = invoice_id,
            user_id = %invoice.user_id,
            status = %status,
            recurring_id = ?recurring_id,
            "Invoice finalized after buyer return"
        );

        if status.is_paid() {
            self.ledger
                .grant_entitlement(EntitlementGrant {
                    user_id: invoice.user_id,
                    plan_id: plan.id,
                    payment_method: PAYMENT_METHOD.to_string(),
                    trial_ends_at_if_unset: OffsetDateTime::now_utc() + Duration::days(TRIAL_DAYS),
                })
                .await?;
            Ok(Outcome::success("Your plan was subscribed successfully!"))
        } else {
            Ok(Outcome::payment_error())
        }
    }
}
