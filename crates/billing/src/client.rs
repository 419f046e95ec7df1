//! Production gateway client
//!
//! [`NvpGateway`] speaks the processor's classic name-value-pair API: one
//! form-encoded POST per operation, form-encoded response. Credentials and
//! endpoints come from the environment via [`GatewayConfig::from_env`].

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::checkout::Cart;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    AckStatus, CancelAck, CheckoutDetails, CheckoutRedirect, PaymentExecution, PaymentGateway,
    ProfileStatus, RecurringProfile, VerificationResult,
};
use paylane_shared::PlanPeriod;

const NVP_VERSION: &str = "204.0";
const GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway credentials and endpoints.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// NVP API endpoint for signed operations.
    pub api_endpoint: String,
    /// Hosted-checkout / notification-postback endpoint.
    pub redirect_endpoint: String,
    pub username: String,
    pub password: String,
    pub signature: String,
    pub currency: String,
}

impl GatewayConfig {
    pub fn from_env() -> BillingResult<Self> {
        let require = |key: &str| {
            std::env::var(key).map_err(|_| BillingError::Config(format!("{key} not set")))
        };
        Ok(Self {
            api_endpoint: require("GATEWAY_API_ENDPOINT")?,
            redirect_endpoint: require("GATEWAY_REDIRECT_ENDPOINT")?,
            username: require("GATEWAY_USERNAME")?,
            password: require("GATEWAY_PASSWORD")?,
            signature: require("GATEWAY_SIGNATURE")?,
            currency: std::env::var("GATEWAY_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
        })
    }
}

/// Format integer cents as the decimal string the wire expects.
fn format_amount(cents: i64) -> String {
    format!("{}.{:02}", cents / 100, cents % 100)
}

pub struct NvpGateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl NvpGateway {
    pub fn new(config: GatewayConfig) -> BillingResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(GATEWAY_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Config(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// One signed NVP round-trip; returns the parsed response fields.
    /// ACK interpretation is left to the caller, since some operations need
    /// to see non-success responses rather than fail on them.
    async fn call(
        &self,
        method: &str,
        params: Vec<(String, String)>,
    ) -> BillingResult<HashMap<String, String>> {
        let mut form: Vec<(String, String)> = vec![
            ("METHOD".into(), method.to_string()),
            ("VERSION".into(), NVP_VERSION.into()),
            ("USER".into(), self.config.username.clone()),
            ("PWD".into(), self.config.password.clone()),
            ("SIGNATURE".into(), self.config.signature.clone()),
        ];
        form.extend(params);

        let response = self
            .http
            .post(&self.config.api_endpoint)
            .form(&form)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;

        Ok(url::form_urlencoded::parse(body.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect())
    }

    fn field<'a>(fields: &'a HashMap<String, String>, key: &str) -> BillingResult<&'a str> {
        fields
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| BillingError::Gateway(format!("response missing {key}")))
    }

    /// Flatten the cart into payment-request parameters.
    fn cart_params(&self, cart: &Cart) -> Vec<(String, String)> {
        let mut params = vec![
            (
                "PAYMENTREQUEST_0_AMT".into(),
                format_amount(cart.total_cents),
            ),
            (
                "PAYMENTREQUEST_0_CURRENCYCODE".into(),
                self.config.currency.clone(),
            ),
            ("PAYMENTREQUEST_0_INVNUM".into(), cart.invoice_ref.clone()),
            ("PAYMENTREQUEST_0_DESC".into(), cart.description.clone()),
        ];
        for (n, item) in cart.items.iter().enumerate() {
            params.push((format!("L_PAYMENTREQUEST_0_NAME{n}"), item.name.clone()));
            params.push((
                format!("L_PAYMENTREQUEST_0_AMT{n}"),
                format_amount(item.price_cents),
            ));
            params.push((format!("L_PAYMENTREQUEST_0_QTY{n}"), item.qty.to_string()));
        }
        params
    }
}

#[async_trait]
impl PaymentGateway for NvpGateway {
    async fn initiate_checkout(
        &self,
        cart: &Cart,
        recurring: bool,
    ) -> BillingResult<CheckoutRedirect> {
        let mut params = self.cart_params(cart);
        params.push(("RETURNURL".into(), cart.return_url.clone()));
        params.push(("CANCELURL".into(), cart.cancel_url.clone()));
        if recurring {
            params.push(("L_BILLINGTYPE0".into(), "RecurringPayments".into()));
            if let Some(description) = &cart.subscription_description {
                params.push(("L_BILLINGAGREEMENTDESCRIPTION0".into(), description.clone()));
            }
        }

        let fields = self.call("SetExpressCheckout", params).await?;
        let ack = AckStatus::parse(Self::field(&fields, "ACK")?);
        if !ack.is_success() {
            let detail = fields
                .get("L_LONGMESSAGE0")
                .cloned()
                .unwrap_or_else(|| "checkout initiation refused".to_string());
            return Err(BillingError::Gateway(detail));
        }
        let token = Self::field(&fields, "TOKEN")?.to_string();

        Ok(CheckoutRedirect {
            redirect_url: format!(
                "{}?cmd=_express-checkout&token={}",
                self.config.redirect_endpoint, token
            ),
            token,
        })
    }

    async fn checkout_details(&self, token: &str) -> BillingResult<CheckoutDetails> {
        let fields = self
            .call(
                "GetExpressCheckoutDetails",
                vec![("TOKEN".into(), token.to_string())],
            )
            .await?;
        Ok(CheckoutDetails {
            ack: AckStatus::parse(Self::field(&fields, "ACK")?),
            invoice_ref: fields
                .get("PAYMENTREQUEST_0_INVNUM")
                .or_else(|| fields.get("INVNUM"))
                .cloned()
                .unwrap_or_default(),
            token: fields
                .get("TOKEN")
                .cloned()
                .unwrap_or_else(|| token.to_string()),
        })
    }

    async fn create_recurring_profile(
        &self,
        token: &str,
        amount_cents: i64,
        description: &str,
        period: PlanPeriod,
    ) -> BillingResult<RecurringProfile> {
        let start_date = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| BillingError::Gateway(e.to_string()))?;
        let billing_period = match period {
            PlanPeriod::Monthly => "Month",
            PlanPeriod::Yearly => "Year",
        };

        let fields = self
            .call(
                "CreateRecurringPaymentsProfile",
                vec![
                    ("TOKEN".into(), token.to_string()),
                    ("AMT".into(), format_amount(amount_cents)),
                    ("CURRENCYCODE".into(), self.config.currency.clone()),
                    ("DESC".into(), description.to_string()),
                    ("BILLINGPERIOD".into(), billing_period.into()),
                    ("BILLINGFREQUENCY".into(), "1".into()),
                    ("PROFILESTARTDATE".into(), start_date),
                ],
            )
            .await?;

        Ok(RecurringProfile {
            status: ProfileStatus::parse(fields.get("PROFILESTATUS").map_or("", String::as_str)),
            profile_id: Self::field(&fields, "PROFILEID")?.to_string(),
        })
    }

    async fn execute_payment(
        &self,
        cart: &Cart,
        token: &str,
        payer_id: &str,
    ) -> BillingResult<PaymentExecution> {
        let mut params = self.cart_params(cart);
        params.push(("TOKEN".into(), token.to_string()));
        params.push(("PAYERID".into(), payer_id.to_string()));

        let fields = self.call("DoExpressCheckoutPayment", params).await?;
        Ok(PaymentExecution {
            status_label: Self::field(&fields, "PAYMENTINFO_0_PAYMENTSTATUS")?.to_string(),
        })
    }

    async fn verify_notification(&self, raw_payload: &str) -> BillingResult<VerificationResult> {
        // Verification is a postback of the untouched payload, prefixed with
        // the validation command; the response body is the verdict.
        let body = format!("cmd=_notify-validate&{raw_payload}");
        let response = self
            .http
            .post(&self.config.redirect_endpoint)
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        let verdict = response.text().await?;

        if verdict.trim() == "VERIFIED" {
            Ok(VerificationResult::Verified)
        } else {
            Ok(VerificationResult::Invalid(verdict.trim().to_string()))
        }
    }

    async fn cancel_recurring_profile(&self, profile_id: &str) -> BillingResult<CancelAck> {
        let fields = self
            .call(
                "ManageRecurringPaymentsProfileStatus",
                vec![
                    ("PROFILEID".into(), profile_id.to_string()),
                    ("ACTION".into(), "Cancel".into()),
                ],
            )
            .await?;

        Ok(CancelAck {
            success: AckStatus::parse(fields.get("ACK").map_or("", String::as_str)).is_success(),
            profile_id: fields
                .get("PROFILEID")
                .cloned()
                .unwrap_or_else(|| profile_id.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_formatting() {
        assert_eq!(format_amount(999), "9.99");
        assert_eq!(format_amount(1000), "10.00");
        assert_eq!(format_amount(7), "0.07");
        assert_eq!(format_amount(0), "0.00");
    }
}
