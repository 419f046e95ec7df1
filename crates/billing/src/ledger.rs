//! Ledger store
//!
//! Persistence seam for invoices, transactions, notification audit records,
//! and user entitlement. The checkout, confirmation, and notification paths
//! all write through this trait. Correctness under concurrent notification
//! delivery rests on the two `apply_*` operations: each runs as one database
//! transaction holding a lock on the invoice row for its recurring
//! reference, so conflicting deliveries serialize rather than interleave.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use paylane_shared::{PaymentStatus, PlanPeriod, UserStatus};

/// A purchasable plan. Plan rows are seeded data; the billing core only
/// reads them.
#[derive(Debug, Clone)]
pub struct Plan {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub cost_cents: i64,
    pub period: PlanPeriod,
}

/// One purchase / subscription charge attempt with a lifecycle status.
/// Never deleted.
#[derive(Debug, Clone)]
pub struct Invoice {
    pub id: i64,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub title: String,
    pub price_cents: i64,
    pub payment_status: PaymentStatus,
    /// External recurring-profile reference; the join key across the
    /// subscription's lifecycle.
    pub recurring_id: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewInvoice {
    /// Drawn from [`LedgerStore::next_invoice_id`] before insert, because the
    /// gateway-visible invoice reference embeds it.
    pub id: i64,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub title: String,
    pub price_cents: i64,
}

/// Append-only record of one processor-reported payment event.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: i64,
    pub invoice_id: i64,
    pub user_id: Uuid,
    pub price_cents: i64,
    pub payment_status: PaymentStatus,
    pub recurring_id: Option<String>,
    pub external_transaction_id: String,
}

/// One processor-reported recurring payment event, reconciled against the
/// ledger as a single atomic operation.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub recurring_id: String,
    pub external_transaction_id: String,
    pub price_cents: i64,
    pub payment_status: PaymentStatus,
}

/// How a payment event landed against the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventOutcome {
    /// Transaction appended, invoice moved, entitlement flipped.
    Applied { invoice_id: i64, user_id: Uuid },
    /// The external transaction id was already claimed; nothing changed.
    Duplicate,
    /// The subscription is canceled, which is terminal; nothing changed.
    SubscriptionCanceled,
    /// No invoice carries the event's recurring reference.
    NoInvoice,
}

/// User entitlement, derived from the most recent confirmed payment event.
#[derive(Debug, Clone)]
pub struct UserEntitlement {
    pub user_id: Uuid,
    pub status: UserStatus,
    pub plan_id: Option<Uuid>,
    pub payment_method: Option<String>,
    pub trial_ends_at: Option<OffsetDateTime>,
}

/// Full entitlement grant applied on a paid confirmation.
#[derive(Debug, Clone)]
pub struct EntitlementGrant {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub payment_method: String,
    /// Trial clock start, applied only when the user has no trial end date
    /// yet. Repeat confirmations must not reset an existing one.
    pub trial_ends_at_if_unset: OffsetDateTime,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn plan_by_slug(&self, slug: &str) -> BillingResult<Option<Plan>>;

    /// Draw the next invoice id atomically from the persistence layer.
    async fn next_invoice_id(&self) -> BillingResult<i64>;

    async fn create_invoice(&self, invoice: NewInvoice) -> BillingResult<()>;

    async fn invoice(&self, invoice_id: i64) -> BillingResult<Option<Invoice>>;

    async fn latest_invoice_for_user(&self, user_id: Uuid) -> BillingResult<Option<Invoice>>;

    /// Set an invoice's status. `Canceled` is terminal: the update is a no-op
    /// on an already-canceled row, so concurrently delivered notifications
    /// cannot resurrect a canceled subscription.
    async fn update_invoice_status(
        &self,
        invoice_id: i64,
        status: PaymentStatus,
    ) -> BillingResult<()>;

    /// Confirmation-time finalization: status plus, for recurring checkouts,
    /// the external profile reference. Same canceled-row guard as
    /// [`update_invoice_status`](Self::update_invoice_status).
    async fn finalize_invoice(
        &self,
        invoice_id: i64,
        status: PaymentStatus,
        recurring_id: Option<String>,
    ) -> BillingResult<()>;

    /// Flip every invoice sharing `recurring_id` to `Canceled`; returns the
    /// number of rows touched.
    async fn cancel_invoices_by_recurring_id(&self, recurring_id: &str) -> BillingResult<u64>;

    /// Reconcile one recurring payment event atomically. The latest invoice
    /// for the event's recurring reference is locked for the duration, the
    /// unique external transaction id is claimed, and the invoice move plus
    /// entitlement flip commit together with the claim: concurrent deliveries
    /// for one recurring reference serialize on the invoice row, and a
    /// partial application can never be left behind for the dedup claim to
    /// swallow on redelivery.
    async fn apply_payment_event(&self, event: PaymentEvent)
        -> BillingResult<PaymentEventOutcome>;

    /// Reconcile a profile cancellation atomically: lock the latest invoice
    /// for the recurring reference, set it `Canceled`, suspend the user, one
    /// commit. Returns the touched invoice and user, or `None` when the
    /// reference is unknown. Idempotent under replay.
    async fn apply_profile_cancel(&self, recurring_id: &str)
        -> BillingResult<Option<(i64, Uuid)>>;

    /// Append the raw notification payload to the audit log, before any
    /// verification or mutation. Returns the audit row id.
    async fn record_ipn(&self, payload: &str) -> BillingResult<i64>;

    /// Record the verification result on an audit row.
    async fn set_ipn_status(&self, ipn_id: i64, status: &str) -> BillingResult<()>;

    async fn entitlement(&self, user_id: Uuid) -> BillingResult<Option<UserEntitlement>>;

    /// Paid confirmation: activate, bind plan and payment method, start the
    /// trial clock only if not already running.
    async fn grant_entitlement(&self, grant: EntitlementGrant) -> BillingResult<()>;

    /// Payment failure or cancellation: back to pending.
    async fn suspend_entitlement(&self, user_id: Uuid) -> BillingResult<()>;
}

/// sqlx/Postgres implementation.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type InvoiceRow = (
    i64,
    Uuid,
    Uuid,
    String,
    i64,
    String,
    Option<String>,
    OffsetDateTime,
);

fn invoice_from_row(row: InvoiceRow) -> BillingResult<Invoice> {
    let (id, user_id, plan_id, title, price_cents, status, recurring_id, created_at) = row;
    let payment_status = status
        .parse()
        .map_err(|_| BillingError::Database(format!("invoice {id} has unknown status {status}")))?;
    Ok(Invoice {
        id,
        user_id,
        plan_id,
        title,
        price_cents,
        payment_status,
        recurring_id,
        created_at,
    })
}

const INVOICE_COLUMNS: &str =
    "id, user_id, plan_id, title, price_cents, payment_status, recurring_id, created_at";

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn plan_by_slug(&self, slug: &str) -> BillingResult<Option<Plan>> {
        let row: Option<(Uuid, String, String, i64, String)> =
            sqlx::query_as("SELECT id, slug, name, cost_cents, period FROM plans WHERE slug = $1")
                .bind(slug)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(id, slug, name, cost_cents, period)| {
            let period = period.parse().map_err(|_| {
                BillingError::Validation(format!("plan {slug} has unknown period {period}"))
            })?;
            Ok(Plan {
                id,
                slug,
                name,
                cost_cents,
                period,
            })
        })
        .transpose()
    }

    async fn next_invoice_id(&self) -> BillingResult<i64> {
        let id: i64 = sqlx::query_scalar("SELECT nextval('invoice_id_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    async fn create_invoice(&self, invoice: NewInvoice) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, user_id, plan_id, title, price_cents, payment_status)
            VALUES ($1, $2, $3, $4, $5, 'Pending')
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.user_id)
        .bind(invoice.plan_id)
        .bind(&invoice.title)
        .bind(invoice.price_cents)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invoice(&self, invoice_id: i64) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1"
        ))
        .bind(invoice_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(invoice_from_row).transpose()
    }

    async fn latest_invoice_for_user(&self, user_id: Uuid) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(invoice_from_row).transpose()
    }

    async fn update_invoice_status(
        &self,
        invoice_id: i64,
        status: PaymentStatus,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE invoices SET payment_status = $2 WHERE id = $1 AND payment_status <> 'Canceled'",
        )
        .bind(invoice_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_invoice(
        &self,
        invoice_id: i64,
        status: PaymentStatus,
        recurring_id: Option<String>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET payment_status = $2, recurring_id = COALESCE($3, recurring_id)
            WHERE id = $1 AND payment_status <> 'Canceled'
            "#,
        )
        .bind(invoice_id)
        .bind(status.as_str())
        .bind(recurring_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_invoices_by_recurring_id(&self, recurring_id: &str) -> BillingResult<u64> {
        let result = sqlx::query(
            "UPDATE invoices SET payment_status = 'Canceled' WHERE recurring_id = $1",
        )
        .bind(recurring_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn apply_payment_event(
        &self,
        event: PaymentEvent,
    ) -> BillingResult<PaymentEventOutcome> {
        let mut tx = self.pool.begin().await?;

        // The row lock serializes concurrent deliveries for one recurring
        // reference; an early return drops the transaction and rolls back.
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE recurring_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1 FOR UPDATE"
        ))
        .bind(&event.recurring_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(invoice) = row.map(invoice_from_row).transpose()? else {
            return Ok(PaymentEventOutcome::NoInvoice);
        };
        if invoice.payment_status == PaymentStatus::Canceled {
            return Ok(PaymentEventOutcome::SubscriptionCanceled);
        }

        // ON CONFLICT DO NOTHING is the dedup claim: of two deliveries of the
        // same notification, exactly one inserts.
        let claimed = sqlx::query(
            r#"
            INSERT INTO transactions
                (invoice_id, user_id, price_cents, payment_status, recurring_id, external_transaction_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (external_transaction_id) DO NOTHING
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.user_id)
        .bind(event.price_cents)
        .bind(event.payment_status.as_str())
        .bind(&invoice.recurring_id)
        .bind(&event.external_transaction_id)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(PaymentEventOutcome::Duplicate);
        }

        sqlx::query("UPDATE invoices SET payment_status = $2 WHERE id = $1")
            .bind(invoice.id)
            .bind(event.payment_status.as_str())
            .execute(&mut *tx)
            .await?;

        let user_status = if event.payment_status == PaymentStatus::Completed {
            "active"
        } else {
            "pending"
        };
        sqlx::query("UPDATE users SET status = $2 WHERE id = $1")
            .bind(invoice.user_id)
            .bind(user_status)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(PaymentEventOutcome::Applied {
            invoice_id: invoice.id,
            user_id: invoice.user_id,
        })
    }

    async fn apply_profile_cancel(
        &self,
        recurring_id: &str,
    ) -> BillingResult<Option<(i64, Uuid)>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE recurring_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1 FOR UPDATE"
        ))
        .bind(recurring_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(invoice) = row.map(invoice_from_row).transpose()? else {
            return Ok(None);
        };

        sqlx::query("UPDATE invoices SET payment_status = 'Canceled' WHERE id = $1")
            .bind(invoice.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE users SET status = 'pending' WHERE id = $1")
            .bind(invoice.user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((invoice.id, invoice.user_id)))
    }

    async fn record_ipn(&self, payload: &str) -> BillingResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO ipn_records (payload, status) VALUES ($1, 'PENDING') RETURNING id",
        )
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn set_ipn_status(&self, ipn_id: i64, status: &str) -> BillingResult<()> {
        sqlx::query("UPDATE ipn_records SET status = $2 WHERE id = $1")
            .bind(ipn_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn entitlement(&self, user_id: Uuid) -> BillingResult<Option<UserEntitlement>> {
        let row: Option<(String, Option<Uuid>, Option<String>, Option<OffsetDateTime>)> =
            sqlx::query_as(
                "SELECT status, plan_id, payment_method, trial_ends_at FROM users WHERE id = $1",
            )
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(status, plan_id, payment_method, trial_ends_at)| {
            let status = status.parse().map_err(|_| {
                BillingError::Database(format!("user {user_id} has unknown status {status}"))
            })?;
            Ok(UserEntitlement {
                user_id,
                status,
                plan_id,
                payment_method,
                trial_ends_at,
            })
        })
        .transpose()
    }

    async fn grant_entitlement(&self, grant: EntitlementGrant) -> BillingResult<()> {
        // COALESCE keeps an already-running trial clock untouched on repeat
        // confirmations.
        sqlx::query(
            r#"
            UPDATE users
            SET status = 'active',
                plan_id = $2,
                payment_method = $3,
                trial_ends_at = COALESCE(trial_ends_at, $4)
            WHERE id = $1
            "#,
        )
        .bind(grant.user_id)
        .bind(grant.plan_id)
        .bind(&grant.payment_method)
        .bind(grant.trial_ends_at_if_unset)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn suspend_entitlement(&self, user_id: Uuid) -> BillingResult<()> {
        sqlx::query("UPDATE users SET status = 'pending' WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
