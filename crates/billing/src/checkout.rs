//! Checkout orchestration
//!
//! Builds the cart for a plan purchase, creates the Pending invoice, and
//! requests the hosted-checkout redirect from the gateway. On gateway failure
//! the invoice is marked `Failed` so no orphaned Pending rows accumulate.

use std::sync::Arc;

use paylane_shared::{PaymentStatus, PlanPeriod};
use uuid::Uuid;

use crate::error::BillingResult;
use crate::gateway::PaymentGateway;
use crate::ledger::{LedgerStore, NewInvoice, Plan};
use crate::outcome::Outcome;

/// Checkout-level configuration: where the buyer comes back to and how
/// invoice references are prefixed on the wire.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Public base URL of this application, no trailing slash.
    pub base_url: String,
    /// Prefix for gateway-visible invoice references (`<prefix>_<id>`).
    pub invoice_prefix: String,
}

impl CheckoutConfig {
    /// Invoice reference embedded in the cart and echoed back by the gateway.
    pub fn invoice_ref(&self, invoice_id: i64) -> String {
        format!("{}_{}", self.invoice_prefix, invoice_id)
    }

    /// Parse the id component out of a gateway-echoed invoice reference.
    pub fn parse_invoice_ref(invoice_ref: &str) -> Option<i64> {
        let (_, id) = invoice_ref.split_once('_')?;
        id.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct CartItem {
    pub name: String,
    pub price_cents: i64,
    pub qty: i64,
}

/// Line-item summary handed to the gateway at checkout initiation.
#[derive(Debug, Clone)]
pub struct Cart {
    pub items: Vec<CartItem>,
    pub invoice_ref: String,
    pub description: String,
    /// Recurring checkouts carry the subscription description used when the
    /// profile is created after the buyer returns.
    pub subscription_description: Option<String>,
    pub return_url: String,
    pub cancel_url: String,
    pub total_cents: i64,
}

impl Cart {
    /// Build the cart for one plan purchase: a single line item, quantity 1.
    pub fn for_plan(
        plan: &Plan,
        recurring: bool,
        invoice_id: i64,
        config: &CheckoutConfig,
    ) -> Self {
        let invoice_ref = config.invoice_ref(invoice_id);
        let (item_name, subscription_description, return_url) = if recurring {
            let description = format!(
                "{} Subscription {} #{}",
                plan.period.display_name(),
                config.invoice_prefix,
                invoice_id
            );
            let return_url = format!(
                "{}/billing/checkout/{}/return?mode=recurring",
                config.base_url, plan.slug
            );
            (description.clone(), Some(description), return_url)
        } else {
            let return_url = format!("{}/billing/checkout/{}/return", config.base_url, plan.slug);
            (plan.name.clone(), None, return_url)
        };

        let items = vec![CartItem {
            name: item_name,
            price_cents: plan.cost_cents,
            qty: 1,
        }];
        let total_cents = items.iter().map(|i| i.price_cents * i.qty).sum();

        Cart {
            items,
            invoice_ref,
            description: format!("Order #{} invoice", invoice_id),
            subscription_description,
            return_url,
            cancel_url: format!("{}/", config.base_url),
            total_cents,
        }
    }
}

/// Starts hosted checkouts.
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn LedgerStore>,
    config: CheckoutConfig,
}

impl CheckoutService {
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

    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// Start a hosted checkout for `plan_slug` on behalf of `user_id`.
    ///
    /// Returns a redirect outcome pointing at the gateway, or a generic
    /// danger outcome. Internal errors never escape.
    pub async fn start_checkout(&self, plan_slug: &str, recurring: bool, user_id: Uuid) -> Outcome {
        match self.start_inner(plan_slug, recurring, user_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    plan_slug = %plan_slug,
                    user_id = %user_id,
                    error = %e,
                    "Checkout start failed"
                );
                Outcome::payment_error()
            }
        }
    }

    async fn start_inner(
        &self,
        plan_slug: &str,
        recurring: bool,
        user_id: Uuid,
    ) -> BillingResult<Outcome> {
        let Some(plan) = self.ledger.plan_by_slug(plan_slug).await? else {
            tracing::warn!(plan_slug = %plan_slug, "Checkout for unknown plan");
            return Ok(Outcome::payment_error());
        };

        // The id is drawn from the ledger's sequence before insert because the
        // cart's invoice reference and line-item name embed it.
        let invoice_id = self.ledger.next_invoice_id().await?;
        let cart = Cart::for_plan(&plan, recurring, invoice_id, &self.config);

        self.ledger
            .create_invoice(NewInvoice {
                id: invoice_id,
                user_id,
                plan_id: plan.id,
                title: cart.description.clone(),
                price_cents: cart.total_cents,
            })
            .await?;

        match self.gateway.initiate_checkout(&cart, recurring).await {
            Ok(redirect) => {
                tracing::info!(
                    invoice_id = invoice_id,
                    user_id = %user_id,
                    plan_slug = %plan_slug,
                    recurring = recurring,
                    "Checkout session opened"
                );
                Ok(Outcome::success("Redirecting to checkout").with_redirect(redirect.redirect_url))
            }
            Err(e) => {
                tracing::warn!(
                    invoice_id = invoice_id,
                    error = %e,
                    "Gateway rejected checkout initiation, marking invoice failed"
                );
                self.ledger
                    .update_invoice_status(invoice_id, PaymentStatus::Failed)
                    .await?;
                Ok(Outcome::payment_error())
            }
        }
    }
}
