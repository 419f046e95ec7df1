//! Asynchronous notification handling
//!
//! The processor posts out-of-band status updates (IPN) with at-least-once
//! delivery. Handling is audit-first: the raw payload is persisted before
//! verification, and the verification result is recorded whether or not it
//! passes. Only verified notifications reach reconciliation, and every
//! reconciliation branch is idempotent under replay:
//!
//! - each branch is applied by the ledger as one atomic operation (row lock
//!   on the invoice, transaction claim, invoice move, and entitlement flip
//!   in a single commit), so conflicting concurrent deliveries serialize,
//! - the transaction insert is the dedup claim (one row per external
//!   transaction id), and it commits together with the state it claims for,
//! - a reconciled profile cancel is terminal for its recurring reference.
//!
//! The caller always acknowledges the sender with an empty 200 regardless of
//! outcome; the sender is a remote system that cannot act on a response.

use std::sync::Arc;

use paylane_shared::PaymentStatus;

use crate::error::BillingResult;
use crate::gateway::PaymentGateway;
use crate::ledger::{LedgerStore, PaymentEvent, PaymentEventOutcome};

/// Fields the reconciler reads out of a form-encoded notification payload.
#[derive(Debug, Default, Clone)]
pub struct NotificationFields {
    pub txn_type: Option<String>,
    pub payment_status: Option<String>,
    pub recurring_id: Option<String>,
    pub amount: Option<String>,
    pub txn_id: Option<String>,
}

impl NotificationFields {
    pub fn parse(raw_payload: &str) -> Self {
        let mut fields = NotificationFields::default();
        for (key, value) in url::form_urlencoded::parse(raw_payload.as_bytes()) {
            match key.as_ref() {
                "txn_type" => fields.txn_type = Some(value.into_owned()),
                "payment_status" => fields.payment_status = Some(value.into_owned()),
                "recurring_payment_id" => fields.recurring_id = Some(value.into_owned()),
                "amount" => fields.amount = Some(value.into_owned()),
                "txn_id" => fields.txn_id = Some(value.into_owned()),
                _ => {}
            }
        }
        fields
    }
}

/// Parse a processor-reported decimal amount ("9.99") into integer cents,
/// without going through floating point.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    // Signed amounts never appear on this wire; rejecting them outright
    // avoids misapplying the sign to the cents component.
    if raw.starts_with(['+', '-']) {
        return None;
    }
    let (whole, frac) = match raw.split_once('.') {
        Some((w, f)) => (w, f),
        None => (raw, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let cents = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        2 => frac.parse::<i64>().ok()?,
        // Amounts never carry sub-cent precision on this wire.
        _ => return None,
    };
    Some(whole * 100 + cents)
}

pub struct NotificationHandler {
    gateway: Arc<dyn PaymentGateway>,
    ledger: Arc<dyn LedgerStore>,
}

impl NotificationHandler {
    pub fn new(gateway: Arc<dyn PaymentGateway>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { gateway, ledger }
    }

    /// Consume one raw notification payload. Never fails outward: every
    /// error is logged and absorbed, and the transport layer acknowledges
    /// the sender regardless.
    pub async fn handle_notification(&self, raw_payload: &str) {
        // Audit write comes first, unconditionally. If it fails we stop:
        // mutating state without the audit trail would break the ordering
        // contract.
        let ipn_id = match self.ledger.record_ipn(raw_payload).await {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist notification audit record");
                return;
            }
        };

        let verification = match self.gateway.verify_notification(raw_payload).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(ipn_id = ipn_id, error = %e, "Notification verification errored");
                if let Err(e) = self.ledger.set_ipn_status(ipn_id, "ERROR").await {
                    tracing::error!(ipn_id = ipn_id, error = %e, "Failed to record verification error");
                }
                return;
            }
        };

        if let Err(e) = self
            .ledger
            .set_ipn_status(ipn_id, verification.as_str())
            .await
        {
            tracing::error!(ipn_id = ipn_id, error = %e, "Failed to record verification result");
            return;
        }

        if !verification.is_verified() {
            tracing::warn!(
                ipn_id = ipn_id,
                result = %verification.as_str(),
                "Notification failed verification, dropping"
            );
            return;
        }

        let fields = NotificationFields::parse(raw_payload);
        if let Err(e) = self.reconcile(ipn_id, &fields).await {
            // NotFound and friends are absorbed here: the sender is a remote
            // system, the audit row already tells the story.
            tracing::error!(ipn_id = ipn_id, error = %e, "Notification reconciliation failed");
        }
    }

    async fn reconcile(&self, ipn_id: i64, fields: &NotificationFields) -> BillingResult<()> {
        match (fields.txn_type.as_deref(), fields.payment_status.as_deref()) {
            (Some("recurring_payment"), Some("Completed")) => {
                self.reconcile_payment(ipn_id, fields, PaymentStatus::Completed)
                    .await
            }
            (Some("recurring_payment_failed"), _) => {
                self.reconcile_payment(ipn_id, fields, PaymentStatus::Failed)
                    .await
            }
            (Some("recurring_payment_profile_cancel"), _) => {
                self.reconcile_cancel(ipn_id, fields).await
            }
            (txn_type, payment_status) => {
                tracing::debug!(
                    ipn_id = ipn_id,
                    txn_type = ?txn_type,
                    payment_status = ?payment_status,
                    "Notification type not reconciled"
                );
                Ok(())
            }
        }
    }

    /// Shared path for recurring payment success and failure events. The
    /// ledger applies the claim, invoice move, and entitlement flip as one
    /// atomic reconciliation; this layer validates the fields and logs how
    /// the event landed.
    async fn reconcile_payment(
        &self,
        ipn_id: i64,
        fields: &NotificationFields,
        status: PaymentStatus,
    ) -> BillingResult<()> {
        let Some(recurring_id) = fields.recurring_id.as_deref() else {
            tracing::warn!(ipn_id = ipn_id, "Notification missing recurring reference");
            return Ok(());
        };
        let (Some(txn_id), Some(amount)) = (fields.txn_id.as_deref(), fields.amount.as_deref())
        else {
            tracing::warn!(ipn_id = ipn_id, "Payment notification missing txn_id or amount");
            return Ok(());
        };
        let Some(price_cents) = parse_amount_cents(amount) else {
            tracing::warn!(ipn_id = ipn_id, amount = %amount, "Unparseable notification amount");
            return Ok(());
        };

        let outcome = self
            .ledger
            .apply_payment_event(PaymentEvent {
                recurring_id: recurring_id.to_string(),
                external_transaction_id: txn_id.to_string(),
                price_cents,
                payment_status: status,
            })
            .await?;

        match outcome {
            PaymentEventOutcome::Applied {
                invoice_id,
                user_id,
            } => {
                tracing::info!(
                    ipn_id = ipn_id,
                    invoice_id = invoice_id,
                    user_id = %user_id,
                    status = %status,
                    txn_id = %txn_id,
                    "Recurring payment notification reconciled"
                );
            }
            PaymentEventOutcome::Duplicate => {
                tracing::info!(
                    ipn_id = ipn_id,
                    txn_id = %txn_id,
                    "Duplicate notification delivery, already reconciled"
                );
            }
            PaymentEventOutcome::SubscriptionCanceled => {
                // Cancel is terminal for the subscription: late or re-ordered
                // payment events must not resurrect it.
                tracing::info!(
                    ipn_id = ipn_id,
                    recurring_id = %recurring_id,
                    "Payment notification for canceled subscription, dropping"
                );
            }
            PaymentEventOutcome::NoInvoice => {
                tracing::info!(
                    ipn_id = ipn_id,
                    recurring_id = %recurring_id,
                    "No invoice for recurring reference, dropping notification"
                );
            }
        }
        Ok(())
    }

    async fn reconcile_cancel(
        &self,
        ipn_id: i64,
        fields: &NotificationFields,
    ) -> BillingResult<()> {
        let Some(recurring_id) = fields.recurring_id.as_deref() else {
            tracing::warn!(ipn_id = ipn_id, "Notification missing recurring reference");
            return Ok(());
        };

        // No transaction row for a profile cancel; replays converge on the
        // same terminal state.
        match self.ledger.apply_profile_cancel(recurring_id).await? {
            Some((invoice_id, user_id)) => {
                tracing::info!(
                    ipn_id = ipn_id,
                    invoice_id = invoice_id,
                    user_id = %user_id,
                    "Recurring profile cancellation reconciled"
                );
            }
            None => {
                tracing::info!(
                    ipn_id = ipn_id,
                    recurring_id = %recurring_id,
                    "No invoice for recurring reference, dropping notification"
                );
            }
        }
        Ok(())
    }
}
