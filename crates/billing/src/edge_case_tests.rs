// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing Core
//!
//! Exercises the reconciliation state machine end to end over a mock gateway
//! and an in-memory ledger:
//! - Checkout orchestration (PAY-C01 to PAY-C03)
//! - Checkout confirmation (PAY-F01 to PAY-F07)
//! - Notification reconciliation (PAY-N01 to PAY-N09)
//! - Subscription cancellation (PAY-S01 to PAY-S03)

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::checkout::CheckoutConfig;
use crate::ledger::memory::MemoryLedger;
use crate::ledger::{Invoice, Plan};
use paylane_shared::{PaymentStatus, PlanPeriod};

fn test_config() -> CheckoutConfig {
    CheckoutConfig {
        base_url: "https://app.test".into(),
        invoice_prefix: "PLN".into(),
    }
}

fn monthly_plan() -> Plan {
    Plan {
        id: Uuid::new_v4(),
        slug: "pro".into(),
        name: "Pro".into(),
        cost_cents: 999,
        period: PlanPeriod::Monthly,
    }
}

/// Ledger seeded with one plan and one user.
fn seeded_ledger(plan: &Plan) -> (Arc<MemoryLedger>, Uuid) {
    let ledger = Arc::new(MemoryLedger::new());
    let user_id = Uuid::new_v4();
    ledger.add_plan(plan.clone());
    ledger.add_user(user_id);
    (ledger, user_id)
}

/// Seed an invoice that already went through a recurring confirmation.
fn seed_recurring_invoice(
    ledger: &MemoryLedger,
    user_id: Uuid,
    plan: &Plan,
    invoice_id: i64,
    recurring_id: &str,
    status: PaymentStatus,
) {
    ledger.seed_invoice(Invoice {
        id: invoice_id,
        user_id,
        plan_id: plan.id,
        title: format!("Order #{} invoice", invoice_id),
        price_cents: plan.cost_cents,
        payment_status: status,
        recurring_id: Some(recurring_id.to_string()),
        created_at: OffsetDateTime::now_utc(),
    });
}

fn payment_ipn(txn_type: &str, payment_status: &str, recurring_id: &str, txn_id: &str) -> String {
    format!(
        "txn_type={txn_type}&payment_status={payment_status}\
         &recurring_payment_id={recurring_id}&amount=9.99&txn_id={txn_id}"
    )
}

mod checkout_tests {
    use super::*;
    use crate::checkout::CheckoutService;
    use crate::error::BillingError;
    use crate::gateway::{CheckoutRedirect, MockPaymentGateway};

    // =========================================================================
    // PAY-C01: Monthly recurring start - Pending invoice at plan cost x 1,
    //          return URL carries mode=recurring, outcome redirects to gateway
    // =========================================================================
    #[tokio::test]
    async fn recurring_checkout_creates_pending_invoice_and_redirect() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initiate_checkout()
            .withf(|cart, recurring| {
                *recurring
                    && cart.total_cents == 999
                    && cart.return_url.contains("mode=recurring")
                    && cart.invoice_ref == "PLN_1"
            })
            .returning(|_, _| {
                Ok(CheckoutRedirect {
                    redirect_url: "https://gateway.test/checkout?token=EC-1".into(),
                    token: "EC-1".into(),
                })
            });

        let service = CheckoutService::new(Arc::new(gateway), ledger.clone(), test_config());
        let outcome = service.start_checkout("pro", true, user_id).await;

        assert!(outcome.is_success());
        assert_eq!(
            outcome.redirect.as_deref(),
            Some("https://gateway.test/checkout?token=EC-1")
        );

        let invoices = ledger.invoices();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].id, 1);
        assert_eq!(invoices[0].price_cents, 999);
        assert_eq!(invoices[0].payment_status, PaymentStatus::Pending);
        assert_eq!(invoices[0].user_id, user_id);
    }

    // =========================================================================
    // PAY-C02: Gateway refuses initiation - invoice marked Failed, not left
    //          orphaned Pending; buyer sees the generic danger outcome
    // =========================================================================
    #[tokio::test]
    async fn gateway_error_marks_invoice_failed() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_initiate_checkout()
            .returning(|_, _| Err(BillingError::Gateway("refused".into())));

        let service = CheckoutService::new(Arc::new(gateway), ledger.clone(), test_config());
        let outcome = service.start_checkout("pro", true, user_id).await;

        assert!(!outcome.is_success());
        assert!(outcome.redirect.is_none());

        let invoices = ledger.invoices();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].payment_status, PaymentStatus::Failed);
    }

    // =========================================================================
    // PAY-C03: Unknown plan slug - danger outcome, no invoice created
    // =========================================================================
    #[tokio::test]
    async fn unknown_plan_creates_nothing() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);

        let gateway = MockPaymentGateway::new();
        let service = CheckoutService::new(Arc::new(gateway), ledger.clone(), test_config());
        let outcome = service.start_checkout("enterprise", true, user_id).await;

        assert!(!outcome.is_success());
        assert!(ledger.invoices().is_empty());
    }
}

mod confirmation_tests {
    use super::*;
    use crate::checkout::CheckoutService;
    use crate::confirm::ConfirmationService;
    use crate::gateway::{
        AckStatus, CheckoutDetails, CheckoutRedirect, MockPaymentGateway, PaymentExecution,
        ProfileStatus, RecurringProfile,
    };
    use paylane_shared::UserStatus;

    fn details(ack: AckStatus, invoice_ref: &str) -> CheckoutDetails {
        CheckoutDetails {
            ack,
            invoice_ref: invoice_ref.to_string(),
            token: "EC-1".to_string(),
        }
    }

    /// Start a checkout so the Pending invoice exists the way production
    /// creates it.
    async fn start_pending_checkout(ledger: Arc<MemoryLedger>, user_id: Uuid) {
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_initiate_checkout().returning(|_, _| {
            Ok(CheckoutRedirect {
                redirect_url: "https://gateway.test/checkout?token=EC-1".into(),
                token: "EC-1".into(),
            })
        });
        let service = CheckoutService::new(Arc::new(gateway), ledger, test_config());
        let outcome = service.start_checkout("pro", true, user_id).await;
        assert!(outcome.is_success());
    }

    // =========================================================================
    // PAY-F01: 9.99 monthly recurring, ActiveProfile - invoice Processed with
    //          recurring_id, user active, trial clock started
    // =========================================================================
    #[tokio::test]
    async fn recurring_confirmation_processes_invoice_and_grants_entitlement() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        start_pending_checkout(ledger.clone(), user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_checkout_details()
            .returning(|_| Ok(details(AckStatus::Success, "PLN_1")));
        gateway
            .expect_create_recurring_profile()
            .withf(|_, amount, description, period| {
                *amount == 999
                    && description.contains("Monthly Subscription")
                    && *period == PlanPeriod::Monthly
            })
            .returning(|_, _, _, _| {
                Ok(RecurringProfile {
                    status: ProfileStatus::Active,
                    profile_id: "I-XYZ".into(),
                })
            });

        let service = ConfirmationService::new(Arc::new(gateway), ledger.clone(), test_config());
        let outcome = service.complete_checkout("pro", "EC-1", "PAYER1", true).await;

        assert!(outcome.is_success());
        let invoice = &ledger.invoices()[0];
        assert_eq!(invoice.payment_status, PaymentStatus::Processed);
        assert_eq!(invoice.recurring_id.as_deref(), Some("I-XYZ"));

        let user = ledger.user(user_id);
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.plan_id, Some(plan.id));
        assert_eq!(user.payment_method.as_deref(), Some("express_checkout"));
        let trial = user.trial_ends_at.expect("trial clock should start");
        let days = (trial - OffsetDateTime::now_utc()).whole_days();
        assert!((6..=7).contains(&days), "trial should end in ~7 days");
    }

    // =========================================================================
    // PAY-F02: Repeat confirmation - an existing trial end date is never reset
    // =========================================================================
    #[tokio::test]
    async fn repeat_confirmation_does_not_reset_trial() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        start_pending_checkout(ledger.clone(), user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_checkout_details()
            .returning(|_| Ok(details(AckStatus::Success, "PLN_1")));
        gateway.expect_create_recurring_profile().returning(|_, _, _, _| {
            Ok(RecurringProfile {
                status: ProfileStatus::Active,
                profile_id: "I-XYZ".into(),
            })
        });

        let service = ConfirmationService::new(Arc::new(gateway), ledger.clone(), test_config());
        service.complete_checkout("pro", "EC-1", "PAYER1", true).await;
        let first_trial = ledger.user(user_id).trial_ends_at;
        assert!(first_trial.is_some());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        service.complete_checkout("pro", "EC-1", "PAYER1", true).await;
        assert_eq!(ledger.user(user_id).trial_ends_at, first_trial);
    }

    // =========================================================================
    // PAY-F03: Non-success acknowledgement - invoice stays Pending, nothing
    //          granted
    // =========================================================================
    #[tokio::test]
    async fn failed_ack_leaves_invoice_untouched() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        start_pending_checkout(ledger.clone(), user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_checkout_details()
            .returning(|_| Ok(details(AckStatus::Other("FAILURE".into()), "PLN_1")));

        let service = ConfirmationService::new(Arc::new(gateway), ledger.clone(), test_config());
        let outcome = service.complete_checkout("pro", "EC-1", "PAYER1", true).await;

        assert!(!outcome.is_success());
        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Pending);
        let user = ledger.user(user_id);
        assert_eq!(user.status, UserStatus::Pending);
        assert!(user.trial_ends_at.is_none());
    }

    // =========================================================================
    // PAY-F04: SUCCESSWITHWARNING acknowledgement counts as acknowledged
    // =========================================================================
    #[tokio::test]
    async fn warning_ack_is_accepted() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        start_pending_checkout(ledger.clone(), user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_checkout_details()
            .returning(|_| Ok(details(AckStatus::parse("successwithwarning"), "PLN_1")));
        gateway.expect_create_recurring_profile().returning(|_, _, _, _| {
            Ok(RecurringProfile {
                status: ProfileStatus::Pending,
                profile_id: "I-PEND".into(),
            })
        });

        let service = ConfirmationService::new(Arc::new(gateway), ledger.clone(), test_config());
        let outcome = service.complete_checkout("pro", "EC-1", "PAYER1", true).await;

        assert!(outcome.is_success());
        // PendingProfile also counts as an accepted subscription
        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Processed);
    }

    // =========================================================================
    // PAY-F05: One-time path takes the gateway's payment status verbatim
    // =========================================================================
    #[tokio::test]
    async fn one_time_payment_uses_gateway_status() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        start_pending_checkout(ledger.clone(), user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_checkout_details()
            .returning(|_| Ok(details(AckStatus::Success, "PLN_1")));
        gateway.expect_execute_payment().returning(|_, _, _| {
            Ok(PaymentExecution {
                status_label: "Completed".into(),
            })
        });

        let service = ConfirmationService::new(Arc::new(gateway), ledger.clone(), test_config());
        let outcome = service
            .complete_checkout("pro", "EC-1", "PAYER1", false)
            .await;

        assert!(outcome.is_success());
        let invoice = &ledger.invoices()[0];
        assert_eq!(invoice.payment_status, PaymentStatus::Completed);
        assert!(invoice.recurring_id.is_none());
        assert_eq!(ledger.user(user_id).status, UserStatus::Active);
    }

    // =========================================================================
    // PAY-F06: One-time payment with a non-paid status grants nothing
    // =========================================================================
    #[tokio::test]
    async fn one_time_failed_payment_grants_nothing() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        start_pending_checkout(ledger.clone(), user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_checkout_details()
            .returning(|_| Ok(details(AckStatus::Success, "PLN_1")));
        gateway.expect_execute_payment().returning(|_, _, _| {
            Ok(PaymentExecution {
                status_label: "Failed".into(),
            })
        });

        let service = ConfirmationService::new(Arc::new(gateway), ledger.clone(), test_config());
        let outcome = service
            .complete_checkout("pro", "EC-1", "PAYER1", false)
            .await;

        assert!(!outcome.is_success());
        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Failed);
        assert_eq!(ledger.user(user_id).status, UserStatus::Pending);
    }

    // =========================================================================
    // PAY-F07: Malformed echoed invoice reference - danger outcome, nothing
    //          mutated
    // =========================================================================
    #[tokio::test]
    async fn malformed_invoice_ref_mutates_nothing() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        start_pending_checkout(ledger.clone(), user_id).await;

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_checkout_details()
            .returning(|_| Ok(details(AckStatus::Success, "garbage")));

        let service = ConfirmationService::new(Arc::new(gateway), ledger.clone(), test_config());
        let outcome = service.complete_checkout("pro", "EC-1", "PAYER1", true).await;

        assert!(!outcome.is_success());
        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Pending);
    }
}

mod notification_tests {
    use super::*;
    use crate::error::BillingError;
    use crate::gateway::{MockPaymentGateway, VerificationResult};
    use crate::notifications::NotificationHandler;
    use paylane_shared::UserStatus;

    fn verified_gateway() -> MockPaymentGateway {
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_verify_notification()
            .returning(|_| Ok(VerificationResult::Verified));
        gateway
    }

    // =========================================================================
    // PAY-N01: Verified recurring_payment Completed - invoice Completed,
    //          transaction appended, user active
    // =========================================================================
    #[tokio::test]
    async fn recurring_payment_completed_reconciles() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Processed);

        let handler = NotificationHandler::new(Arc::new(verified_gateway()), ledger.clone());
        handler
            .handle_notification(&payment_ipn("recurring_payment", "Completed", "I-XYZ", "TX1"))
            .await;

        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Completed);
        assert_eq!(ledger.user(user_id).status, UserStatus::Active);

        let transactions = ledger.transactions();
        assert_eq!(transactions.len(), 1);
        assert_eq!(transactions[0].payment_status, PaymentStatus::Completed);
        assert_eq!(transactions[0].price_cents, 999);
        assert_eq!(transactions[0].external_transaction_id, "TX1");
        assert_eq!(transactions[0].recurring_id.as_deref(), Some("I-XYZ"));

        let ipn = ledger.ipn_records();
        assert_eq!(ipn.len(), 1);
        assert_eq!(ipn[0].2, "VERIFIED");
    }

    // =========================================================================
    // PAY-N02: Replayed identical notification - no second transaction, state
    //          unchanged
    // =========================================================================
    #[tokio::test]
    async fn replayed_notification_appends_nothing() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Processed);

        let payload = payment_ipn("recurring_payment", "Completed", "I-XYZ", "TX1");
        let handler = NotificationHandler::new(Arc::new(verified_gateway()), ledger.clone());
        handler.handle_notification(&payload).await;
        handler.handle_notification(&payload).await;

        assert_eq!(ledger.transactions().len(), 1);
        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Completed);
        // Both deliveries are audited even though only one reconciles
        assert_eq!(ledger.ipn_records().len(), 2);
    }

    // =========================================================================
    // PAY-N03: recurring_payment_failed - invoice Failed, Failed transaction,
    //          user suspended (any payment_status value)
    // =========================================================================
    #[tokio::test]
    async fn recurring_payment_failed_suspends_user() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Completed);

        // Activate through a successful payment first, then fail the next one.
        let handler = NotificationHandler::new(Arc::new(verified_gateway()), ledger.clone());
        handler
            .handle_notification(&payment_ipn("recurring_payment", "Completed", "I-XYZ", "TX1"))
            .await;
        assert_eq!(ledger.user(user_id).status, UserStatus::Active);

        handler
            .handle_notification(&payment_ipn(
                "recurring_payment_failed",
                "Denied",
                "I-XYZ",
                "TX2",
            ))
            .await;

        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Failed);
        assert_eq!(ledger.user(user_id).status, UserStatus::Pending);
        let transactions = ledger.transactions();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[1].payment_status, PaymentStatus::Failed);
    }

    // =========================================================================
    // PAY-N04: recurring_payment_profile_cancel - invoice Canceled, user
    //          suspended, no transaction appended
    // =========================================================================
    #[tokio::test]
    async fn profile_cancel_reconciles_without_transaction() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Completed);

        let handler = NotificationHandler::new(Arc::new(verified_gateway()), ledger.clone());
        handler
            .handle_notification(&payment_ipn(
                "recurring_payment_profile_cancel",
                "",
                "I-XYZ",
                "TX9",
            ))
            .await;

        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Canceled);
        assert_eq!(ledger.user(user_id).status, UserStatus::Pending);
        assert!(ledger.transactions().is_empty());
    }

    // =========================================================================
    // PAY-N05: Cancel is terminal - a later recurring_payment for the same
    //          recurring_id must not re-activate the user
    // =========================================================================
    #[tokio::test]
    async fn payment_after_cancel_does_not_reactivate() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Completed);

        let handler = NotificationHandler::new(Arc::new(verified_gateway()), ledger.clone());
        handler
            .handle_notification(&payment_ipn(
                "recurring_payment_profile_cancel",
                "",
                "I-XYZ",
                "TX1",
            ))
            .await;
        handler
            .handle_notification(&payment_ipn("recurring_payment", "Completed", "I-XYZ", "TX2"))
            .await;

        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Canceled);
        assert_eq!(ledger.user(user_id).status, UserStatus::Pending);
        assert!(ledger.transactions().is_empty());
    }

    // =========================================================================
    // PAY-N06: Verification result other than VERIFIED - audit row carries the
    //          result, zero mutation
    // =========================================================================
    #[tokio::test]
    async fn unverified_notification_only_audits() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Processed);

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_verify_notification()
            .returning(|_| Ok(VerificationResult::Invalid("INVALID".into())));

        let handler = NotificationHandler::new(Arc::new(gateway), ledger.clone());
        handler
            .handle_notification(&payment_ipn("recurring_payment", "Completed", "I-XYZ", "TX1"))
            .await;

        let ipn = ledger.ipn_records();
        assert_eq!(ipn.len(), 1);
        assert_eq!(ipn[0].2, "INVALID");
        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Processed);
        assert_eq!(ledger.user(user_id).status, UserStatus::Pending);
        assert!(ledger.transactions().is_empty());
    }

    // =========================================================================
    // PAY-N07: Unknown recurring reference - silently dropped after audit
    // =========================================================================
    #[tokio::test]
    async fn unknown_recurring_id_is_dropped_after_audit() {
        let plan = monthly_plan();
        let (ledger, _user_id) = seeded_ledger(&plan);

        let handler = NotificationHandler::new(Arc::new(verified_gateway()), ledger.clone());
        handler
            .handle_notification(&payment_ipn(
                "recurring_payment",
                "Completed",
                "I-NOBODY",
                "TX1",
            ))
            .await;

        assert_eq!(ledger.ipn_records().len(), 1);
        assert!(ledger.transactions().is_empty());
    }

    // =========================================================================
    // PAY-N08: Unrecognized txn_type - audited no-op
    // =========================================================================
    #[tokio::test]
    async fn unknown_txn_type_is_noop() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Processed);

        let handler = NotificationHandler::new(Arc::new(verified_gateway()), ledger.clone());
        handler
            .handle_notification(&payment_ipn("express_checkout", "Completed", "I-XYZ", "TX1"))
            .await;

        assert_eq!(ledger.ipn_records().len(), 1);
        assert!(ledger.transactions().is_empty());
        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Processed);
    }

    // =========================================================================
    // PAY-N09: Verification round-trip errors - audit row marked ERROR, no
    //          reconciliation
    // =========================================================================
    #[tokio::test]
    async fn verification_error_marks_audit_row() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Processed);

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_verify_notification()
            .returning(|_| Err(BillingError::Gateway("timeout".into())));

        let handler = NotificationHandler::new(Arc::new(gateway), ledger.clone());
        handler
            .handle_notification(&payment_ipn("recurring_payment", "Completed", "I-XYZ", "TX1"))
            .await;

        let ipn = ledger.ipn_records();
        assert_eq!(ipn.len(), 1);
        assert_eq!(ipn[0].2, "ERROR");
        assert!(ledger.transactions().is_empty());
    }

    // =========================================================================
    // PAY-N10: Concurrent conflicting deliveries for one recurring reference -
    //          whatever the interleaving, a canceled subscription never leaves
    //          the user active
    // =========================================================================
    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_cancel_and_payment_converge_on_canceled() {
        for _ in 0..16 {
            let plan = monthly_plan();
            let (ledger, user_id) = seeded_ledger(&plan);
            seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Processed);

            let cancel_handler =
                NotificationHandler::new(Arc::new(verified_gateway()), ledger.clone());
            let payment_handler =
                NotificationHandler::new(Arc::new(verified_gateway()), ledger.clone());

            let cancel = tokio::spawn(async move {
                cancel_handler
                    .handle_notification(&payment_ipn(
                        "recurring_payment_profile_cancel",
                        "",
                        "I-XYZ",
                        "TX1",
                    ))
                    .await;
            });
            let payment = tokio::spawn(async move {
                payment_handler
                    .handle_notification(&payment_ipn(
                        "recurring_payment",
                        "Completed",
                        "I-XYZ",
                        "TX2",
                    ))
                    .await;
            });
            cancel.await.unwrap();
            payment.await.unwrap();

            // Payment-then-cancel ends canceled; cancel-then-payment drops the
            // payment. Both orders converge on the same entitlement state.
            assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Canceled);
            assert_eq!(ledger.user(user_id).status, UserStatus::Pending);
        }
    }
}

mod cancellation_tests {
    use super::*;
    use crate::gateway::{CancelAck, MockPaymentGateway};
    use crate::subscriptions::SubscriptionService;
    use paylane_shared::UserStatus;

    // =========================================================================
    // PAY-S01: Acknowledged cancel - every invoice sharing the recurring_id is
    //          Canceled, user suspended
    // =========================================================================
    #[tokio::test]
    async fn acknowledged_cancel_flips_all_invoices() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Processed);
        seed_recurring_invoice(&ledger, user_id, &plan, 2, "I-XYZ", PaymentStatus::Completed);

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_cancel_recurring_profile()
            .withf(|profile_id| profile_id == "I-XYZ")
            .returning(|_| {
                Ok(CancelAck {
                    success: true,
                    profile_id: "I-XYZ".into(),
                })
            });

        let service = SubscriptionService::new(Arc::new(gateway), ledger.clone());
        let outcome = service.cancel_subscription(user_id).await;

        assert!(outcome.is_success());
        for invoice in ledger.invoices() {
            assert_eq!(invoice.payment_status, PaymentStatus::Canceled);
        }
        assert_eq!(ledger.user(user_id).status, UserStatus::Pending);
    }

    // =========================================================================
    // PAY-S02: Gateway refuses the cancel - explicit danger outcome, invoices
    //          untouched
    // =========================================================================
    #[tokio::test]
    async fn refused_cancel_surfaces_failure() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);
        seed_recurring_invoice(&ledger, user_id, &plan, 1, "I-XYZ", PaymentStatus::Completed);

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_cancel_recurring_profile().returning(|_| {
            Ok(CancelAck {
                success: false,
                profile_id: "I-XYZ".into(),
            })
        });

        let service = SubscriptionService::new(Arc::new(gateway), ledger.clone());
        let outcome = service.cancel_subscription(user_id).await;

        assert!(!outcome.is_success());
        assert_eq!(ledger.invoices()[0].payment_status, PaymentStatus::Completed);
    }

    // =========================================================================
    // PAY-S03: No recurring invoice on record - explicit danger outcome
    // =========================================================================
    #[tokio::test]
    async fn cancel_without_subscription_fails_explicitly() {
        let plan = monthly_plan();
        let (ledger, user_id) = seeded_ledger(&plan);

        let gateway = MockPaymentGateway::new();
        let service = SubscriptionService::new(Arc::new(gateway), ledger.clone());
        let outcome = service.cancel_subscription(user_id).await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.message, "No subscription to cancel");
    }
}
