use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::units::{major_string_to_minor, minor_to_major_string};
use super::{GatewayError, GatewayTransaction, PaymentGatewayAdapter, ProviderEvent};
use crate::domain::entities::payment_settings::PaymentSettingsEntity;
use crate::domain::value_objects::enums::ledger_events::LedgerEvent;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::domain::value_objects::enums::transaction_statuses::TransactionStatus;
use crate::domain::value_objects::payments::{ChargeRequest, ConnectionCheck};

const BASE_URL: &str = "https://api.mollie.com/v2";

/// Mollie adapter. Native unit is a major-unit decimal string
/// (`{"currency": "EUR", "value": "19.99"}`); test vs live mode is a
/// property of the API key, not the endpoint. Mollie webhooks carry no
/// signature at all, only a payment id, so authenticity comes from
/// re-fetching that id over the authenticated API and trusting nothing
/// else in the request.
pub struct MollieAdapter {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct MollieCredentials {
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct MollieErrorEnvelope {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
}

#[derive(Debug, Deserialize)]
struct MollieAmount {
    value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct MollieRefund {
    id: String,
    #[serde(default)]
    status: String,
    amount: MollieAmount,
}

#[derive(Debug, Deserialize)]
struct MolliePayment {
    id: String,
    status: String,
    amount: MollieAmount,
    #[serde(rename = "amountRefunded")]
    amount_refunded: Option<MollieAmount>,
    mode: Option<String>,
    #[serde(rename = "billingEmail")]
    billing_email: Option<String>,
}

impl MollieAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn credentials(settings: &PaymentSettingsEntity) -> Result<MollieCredentials, GatewayError> {
        serde_json::from_value(settings.credentials.clone()).map_err(|_| {
            GatewayError::Configuration("mollie credentials are incomplete".to_string())
        })
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let envelope = serde_json::from_str::<MollieErrorEnvelope>(&body).unwrap_or_else(|_| {
            MollieErrorEnvelope {
                title: String::new(),
                detail: String::new(),
            }
        });

        error!(
            status = %status,
            title = %envelope.title,
            detail = %envelope.detail,
            context = %context,
            "mollie api request failed"
        );

        let message = if envelope.detail.is_empty() {
            format!("status {status}")
        } else {
            envelope.detail
        };
        Err(GatewayError::Provider(format!(
            "mollie {context} failed: {message}"
        )))
    }

    fn map_status(status: &str) -> TransactionStatus {
        match status {
            "paid" => TransactionStatus::Succeeded,
            "failed" | "expired" | "canceled" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        }
    }

    fn map_payment(payment: MolliePayment) -> Result<GatewayTransaction, GatewayError> {
        let amount_minor =
            major_string_to_minor(&payment.amount.value, &payment.amount.currency)?;
        Ok(GatewayTransaction {
            external_id: payment.id,
            status: Self::map_status(&payment.status),
            amount_minor,
            currency: payment.amount.currency.to_ascii_uppercase(),
            metadata: json!({ "mollie_status": payment.status, "mode": payment.mode }),
        })
    }

    async fn fetch_payment(
        &self,
        credentials: &MollieCredentials,
        payment_id: &str,
    ) -> Result<MolliePayment, GatewayError> {
        let resp = self
            .http
            .get(format!("{BASE_URL}/payments/{payment_id}"))
            .bearer_auth(&credentials.api_key)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve payment").await?;

        resp.json()
            .await
            .map_err(|_| GatewayError::Provider("mollie returned a malformed payment".into()))
    }

    async fn fetch_latest_refund(
        &self,
        credentials: &MollieCredentials,
        payment_id: &str,
    ) -> Result<Option<MollieRefund>, GatewayError> {
        let resp = self
            .http
            .get(format!("{BASE_URL}/payments/{payment_id}/refunds"))
            .bearer_auth(&credentials.api_key)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "list refunds").await?;

        #[derive(Deserialize)]
        struct Embedded {
            refunds: Vec<MollieRefund>,
        }
        #[derive(Deserialize)]
        struct RefundList {
            #[serde(rename = "_embedded")]
            embedded: Embedded,
        }
        let list: RefundList = resp.json().await.map_err(|_| {
            GatewayError::Provider("mollie returned a malformed refund list".into())
        })?;

        // Mollie lists newest first.
        Ok(list.embedded.refunds.into_iter().next())
    }

    async fn create_payment(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
        manual_capture: bool,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let mut body = json!({
            "amount": {
                "currency": request.currency.to_ascii_uppercase(),
                "value": minor_to_major_string(request.amount_minor, &request.currency),
            },
            "description": request
                .description
                .clone()
                .unwrap_or_else(|| "Payment".to_string()),
        });
        if manual_capture {
            body["captureMode"] = json!("manual");
        }
        if let Some(email) = &request.customer_email {
            body["billingEmail"] = json!(email);
        }
        if let Some(source) = &request.source {
            body["cardToken"] = json!(source);
        }

        let resp = self
            .http
            .post(format!("{BASE_URL}/payments"))
            .bearer_auth(&credentials.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create payment").await?;

        let payment: MolliePayment = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("mollie returned a malformed payment".into()))?;
        Self::map_payment(payment)
    }

    fn amount_body(
        amount_minor: Option<i64>,
        currency: &str,
    ) -> serde_json::Value {
        match amount_minor {
            Some(amount) => json!({
                "amount": {
                    "currency": currency.to_ascii_uppercase(),
                    "value": minor_to_major_string(amount, currency),
                }
            }),
            None => json!({}),
        }
    }
}

impl Default for MollieAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGatewayAdapter for MollieAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Mollie
    }

    async fn charge(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.create_payment(settings, request, false).await
    }

    async fn authorize_only(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.create_payment(settings, request, true).await
    }

    async fn capture(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        amount_minor: Option<i64>,
        currency: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let resp = self
            .http
            .post(format!("{BASE_URL}/payments/{transaction_id}/captures"))
            .bearer_auth(&credentials.api_key)
            .json(&Self::amount_body(amount_minor, currency))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "capture payment").await?;

        #[derive(Deserialize)]
        struct MollieCapture {
            id: String,
            amount: MollieAmount,
        }
        let capture: MollieCapture = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("mollie returned a malformed capture".into()))?;

        Ok(GatewayTransaction {
            external_id: capture.id,
            // Settlement is confirmed by the payment webhook, not here.
            status: TransactionStatus::Pending,
            amount_minor: major_string_to_minor(&capture.amount.value, &capture.amount.currency)?,
            currency: capture.amount.currency.to_ascii_uppercase(),
            metadata: json!({ "payment_id": transaction_id }),
        })
    }

    async fn refund(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        amount_minor: Option<i64>,
        currency: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        // Mollie requires an explicit refund amount.
        let body = match amount_minor {
            Some(_) => Self::amount_body(amount_minor, currency),
            None => {
                let payment = self.fetch_payment(&credentials, transaction_id).await?;
                json!({ "amount": { "currency": payment.amount.currency, "value": payment.amount.value } })
            }
        };

        let resp = self
            .http
            .post(format!("{BASE_URL}/payments/{transaction_id}/refunds"))
            .bearer_auth(&credentials.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "refund payment").await?;

        let refund: MollieRefund = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("mollie returned a malformed refund".into()))?;

        let status = match refund.status.as_str() {
            "refunded" => TransactionStatus::Refunded,
            "failed" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        };
        Ok(GatewayTransaction {
            external_id: refund.id,
            status,
            amount_minor: major_string_to_minor(&refund.amount.value, &refund.amount.currency)?,
            currency: refund.amount.currency.to_ascii_uppercase(),
            metadata: json!({ "payment_id": transaction_id }),
        })
    }

    async fn void(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let resp = self
            .http
            .delete(format!("{BASE_URL}/payments/{transaction_id}"))
            .bearer_auth(&credentials.api_key)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "cancel payment").await?;

        let payment: MolliePayment = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("mollie returned a malformed payment".into()))?;
        let mut mapped = Self::map_payment(payment)?;
        if mapped.status == TransactionStatus::Failed {
            // A cancellation we asked for is a successful void.
            mapped.status = TransactionStatus::Succeeded;
        }
        Ok(mapped)
    }

    async fn get_status(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let payment = self.fetch_payment(&credentials, transaction_id).await?;
        Self::map_payment(payment)
    }

    async fn test_connection(
        &self,
        settings: &PaymentSettingsEntity,
    ) -> Result<ConnectionCheck, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let resp = self
            .http
            .get(format!("{BASE_URL}/methods"))
            .bearer_auth(&credentials.api_key)
            .send()
            .await?;
        Self::ensure_success(resp, "list methods").await?;

        Ok(ConnectionCheck {
            ok: true,
            detail: "Mollie account reachable".to_string(),
            test_mode: credentials.api_key.starts_with("test_"),
        })
    }

    /// Mollie posts `id=tr_xxx` as a form body. The id is the only thing
    /// the request proves it knows, so the event is whatever the
    /// authenticated re-fetch of that payment says it is.
    async fn verify_webhook(
        &self,
        settings: &PaymentSettingsEntity,
        _headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ProviderEvent, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let payment_id = url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| {
                GatewayError::WebhookAuthentication(
                    "mollie webhook body carries no payment id".to_string(),
                )
            })?;
        if !payment_id.starts_with("tr_") {
            return Err(GatewayError::WebhookAuthentication(format!(
                "mollie webhook posted an unexpected id shape: {payment_id}"
            )));
        }

        let payment = self
            .fetch_payment(&credentials, &payment_id)
            .await
            .map_err(|err| match err {
                GatewayError::Provider(msg) => GatewayError::WebhookAuthentication(format!(
                    "mollie payment lookup rejected the posted id: {msg}"
                )),
                other => other,
            })?;

        let refund = if refunded_minor(&payment).is_some() {
            self.fetch_latest_refund(&credentials, &payment.id).await?
        } else {
            None
        };

        Ok(map_fetched_payment(&payment, refund.as_ref()))
    }
}

fn refunded_minor(payment: &MolliePayment) -> Option<i64> {
    payment
        .amount_refunded
        .as_ref()
        .and_then(|a| major_string_to_minor(&a.value, &a.currency).ok())
        .filter(|minor| *minor > 0)
}

fn map_fetched_payment(payment: &MolliePayment, refund: Option<&MollieRefund>) -> ProviderEvent {
    if let Some(refunded) = refunded_minor(payment) {
        // A refund is its own ledger row; it must never share the
        // payment's (provider, external_id) key, or the upsert would
        // fold it onto the payment.
        let (external_id, amount, currency) = match refund {
            Some(refund) => (
                refund.id.clone(),
                major_string_to_minor(&refund.amount.value, &refund.amount.currency).ok(),
                refund.amount.currency.to_ascii_uppercase(),
            ),
            None => (
                format!("{}-refund", payment.id),
                Some(refunded),
                payment.amount.currency.to_ascii_uppercase(),
            ),
        };
        return ProviderEvent {
            event: LedgerEvent::RefundCompleted,
            raw_type: format!("payment.{}", payment.status),
            external_id: Some(external_id),
            amount_minor: amount,
            currency: Some(currency),
            customer_email: payment.billing_email.clone(),
        };
    }

    let full = major_string_to_minor(&payment.amount.value, &payment.amount.currency).ok();
    let event = match payment.status.as_str() {
        "paid" => LedgerEvent::PaymentSucceeded,
        "failed" | "expired" => LedgerEvent::PaymentFailed,
        "canceled" => LedgerEvent::VoidCompleted,
        _ => LedgerEvent::Unrecognized,
    };

    ProviderEvent {
        event,
        raw_type: format!("payment.{}", payment.status),
        external_id: Some(payment.id.clone()),
        amount_minor: full,
        currency: Some(payment.amount.currency.to_ascii_uppercase()),
        customer_email: payment.billing_email.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(status: &str, refunded: Option<&str>) -> MolliePayment {
        MolliePayment {
            id: "tr_abc123".to_string(),
            status: status.to_string(),
            amount: MollieAmount {
                value: "19.99".to_string(),
                currency: "EUR".to_string(),
            },
            amount_refunded: refunded.map(|value| MollieAmount {
                value: value.to_string(),
                currency: "EUR".to_string(),
            }),
            mode: Some("test".to_string()),
            billing_email: None,
        }
    }

    fn refund(id: &str, value: &str) -> MollieRefund {
        MollieRefund {
            id: id.to_string(),
            status: "refunded".to_string(),
            amount: MollieAmount {
                value: value.to_string(),
                currency: "EUR".to_string(),
            },
        }
    }

    #[test]
    fn paid_payment_maps_to_succeeded_in_minor_units() {
        let mapped = map_fetched_payment(&payment("paid", None), None);
        assert_eq!(mapped.event, LedgerEvent::PaymentSucceeded);
        assert_eq!(mapped.amount_minor, Some(1999));
        assert_eq!(mapped.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn refunded_amount_takes_precedence_over_status() {
        let mapped = map_fetched_payment(
            &payment("paid", Some("5.00")),
            Some(&refund("re_xyz789", "5.00")),
        );
        assert_eq!(mapped.event, LedgerEvent::RefundCompleted);
        assert_eq!(mapped.amount_minor, Some(500));
    }

    #[test]
    fn refund_event_is_keyed_by_the_refund_id_not_the_payment_id() {
        let mapped = map_fetched_payment(
            &payment("paid", Some("5.00")),
            Some(&refund("re_xyz789", "5.00")),
        );
        assert_eq!(mapped.external_id.as_deref(), Some("re_xyz789"));
    }

    #[test]
    fn refund_without_a_listed_resource_still_gets_its_own_key() {
        let mapped = map_fetched_payment(&payment("paid", Some("5.00")), None);
        assert_eq!(mapped.event, LedgerEvent::RefundCompleted);
        assert_eq!(mapped.external_id.as_deref(), Some("tr_abc123-refund"));
        assert_eq!(mapped.amount_minor, Some(500));
    }

    #[test]
    fn zero_refund_is_not_a_refund() {
        let mapped = map_fetched_payment(&payment("paid", Some("0.00")), None);
        assert_eq!(mapped.event, LedgerEvent::PaymentSucceeded);
        assert_eq!(mapped.external_id.as_deref(), Some("tr_abc123"));
    }

    #[test]
    fn expired_maps_to_failed() {
        let mapped = map_fetched_payment(&payment("expired", None), None);
        assert_eq!(mapped.event, LedgerEvent::PaymentFailed);
    }

    #[test]
    fn statuses_normalize() {
        assert_eq!(
            MollieAdapter::map_status("paid"),
            TransactionStatus::Succeeded
        );
        assert_eq!(
            MollieAdapter::map_status("expired"),
            TransactionStatus::Failed
        );
        assert_eq!(
            MollieAdapter::map_status("open"),
            TransactionStatus::Pending
        );
    }
}
