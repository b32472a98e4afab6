use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::error;
use uuid::Uuid;

use super::{
    GatewayError, GatewayTransaction, PaymentGatewayAdapter, ProviderEvent, constant_time_eq,
    header_str,
};
use crate::domain::entities::payment_settings::PaymentSettingsEntity;
use crate::domain::value_objects::enums::ledger_events::LedgerEvent;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::domain::value_objects::enums::transaction_statuses::TransactionStatus;
use crate::domain::value_objects::payments::{ChargeRequest, ConnectionCheck};

type HmacSha256 = Hmac<Sha256>;

const LIVE_BASE_URL: &str = "https://connect.squareup.com";
const SANDBOX_BASE_URL: &str = "https://connect.squareupsandbox.com";

/// Square Payments adapter. Native unit is minor units. Webhook signatures
/// are base64 HMAC-SHA256 over the notification URL concatenated with the
/// raw body, so the registered URL must be part of the tenant's credential
/// bag.
pub struct SquareAdapter {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SquareCredentials {
    access_token: String,
    webhook_signature_key: Option<String>,
    /// The exact URL Square was configured to POST to; part of the
    /// signature input by Square's scheme.
    webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SquareErrorEnvelope {
    #[serde(default)]
    errors: Vec<SquareErrorDetails>,
}

#[derive(Debug, Deserialize)]
struct SquareErrorDetails {
    category: Option<String>,
    code: Option<String>,
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MoneyAmount {
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct SquarePayment {
    id: String,
    status: String,
    amount_money: MoneyAmount,
}

#[derive(Debug, Deserialize)]
struct PaymentEnvelope {
    payment: SquarePayment,
}

#[derive(Debug, Deserialize)]
struct RefundEnvelope {
    refund: SquarePayment,
}

impl SquareAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn base_url(settings: &PaymentSettingsEntity) -> &'static str {
        if settings.test_mode {
            SANDBOX_BASE_URL
        } else {
            LIVE_BASE_URL
        }
    }

    fn credentials(settings: &PaymentSettingsEntity) -> Result<SquareCredentials, GatewayError> {
        serde_json::from_value(settings.credentials.clone()).map_err(|_| {
            GatewayError::Configuration("square credentials are incomplete".to_string())
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
        let first_error = serde_json::from_str::<SquareErrorEnvelope>(&body)
            .ok()
            .and_then(|envelope| envelope.errors.into_iter().next());

        error!(
            status = %status,
            error_category = ?first_error.as_ref().and_then(|e| e.category.clone()),
            error_code = ?first_error.as_ref().and_then(|e| e.code.clone()),
            context = %context,
            "square api request failed"
        );

        let message = first_error
            .and_then(|e| e.detail)
            .unwrap_or_else(|| format!("status {status}"));
        Err(GatewayError::Provider(format!(
            "square {context} failed: {message}"
        )))
    }

    fn map_status(status: &str) -> TransactionStatus {
        match status {
            "COMPLETED" => TransactionStatus::Succeeded,
            "FAILED" | "CANCELED" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        }
    }

    fn map_payment(payment: SquarePayment) -> GatewayTransaction {
        GatewayTransaction {
            external_id: payment.id,
            status: Self::map_status(&payment.status),
            amount_minor: payment.amount_money.amount,
            currency: payment.amount_money.currency.to_ascii_uppercase(),
            metadata: json!({ "square_status": payment.status }),
        }
    }

    async fn create_payment(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
        autocomplete: bool,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let source = request.source.as_deref().ok_or_else(|| {
            GatewayError::Configuration("square charge requires a source id".to_string())
        })?;

        let mut body = json!({
            "idempotency_key": Uuid::new_v4().to_string(),
            "source_id": source,
            "autocomplete": autocomplete,
            "amount_money": {
                "amount": request.amount_minor,
                "currency": request.currency.to_ascii_uppercase(),
            },
        });
        if let Some(email) = &request.customer_email {
            body["buyer_email_address"] = json!(email);
        }
        if let Some(description) = &request.description {
            body["note"] = json!(description);
        }

        let resp = self
            .http
            .post(format!("{}/v2/payments", Self::base_url(settings)))
            .bearer_auth(&credentials.access_token)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create payment").await?;

        let envelope: PaymentEnvelope = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("square returned a malformed payment".into()))?;
        Ok(Self::map_payment(envelope.payment))
    }

    async fn fetch_payment(
        &self,
        settings: &PaymentSettingsEntity,
        credentials: &SquareCredentials,
        payment_id: &str,
    ) -> Result<SquarePayment, GatewayError> {
        let resp = self
            .http
            .get(format!(
                "{}/v2/payments/{payment_id}",
                Self::base_url(settings)
            ))
            .bearer_auth(&credentials.access_token)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve payment").await?;

        let envelope: PaymentEnvelope = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("square returned a malformed payment".into()))?;
        Ok(envelope.payment)
    }
}

impl Default for SquareAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGatewayAdapter for SquareAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Square
    }

    async fn charge(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.create_payment(settings, request, true).await
    }

    async fn authorize_only(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.create_payment(settings, request, false).await
    }

    async fn capture(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        _amount_minor: Option<i64>,
        _currency: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let resp = self
            .http
            .post(format!(
                "{}/v2/payments/{transaction_id}/complete",
                Self::base_url(settings)
            ))
            .bearer_auth(&credentials.access_token)
            .json(&json!({}))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "complete payment").await?;

        let envelope: PaymentEnvelope = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("square returned a malformed payment".into()))?;
        Ok(Self::map_payment(envelope.payment))
    }

    async fn refund(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        amount_minor: Option<i64>,
        currency: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        // Square requires an explicit refund amount; a full refund means
        // looking the original payment up first.
        let (amount, currency) = match amount_minor {
            Some(amount) => (amount, currency.to_ascii_uppercase()),
            None => {
                let payment = self
                    .fetch_payment(settings, &credentials, transaction_id)
                    .await?;
                (
                    payment.amount_money.amount,
                    payment.amount_money.currency.to_ascii_uppercase(),
                )
            }
        };

        let body = json!({
            "idempotency_key": Uuid::new_v4().to_string(),
            "payment_id": transaction_id,
            "amount_money": { "amount": amount, "currency": currency },
        });

        let resp = self
            .http
            .post(format!("{}/v2/refunds", Self::base_url(settings)))
            .bearer_auth(&credentials.access_token)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create refund").await?;

        let envelope: RefundEnvelope = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("square returned a malformed refund".into()))?;
        let mut tx = Self::map_payment(envelope.refund);
        tx.metadata = json!({ "payment_id": transaction_id });
        Ok(tx)
    }

    async fn void(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let resp = self
            .http
            .post(format!(
                "{}/v2/payments/{transaction_id}/cancel",
                Self::base_url(settings)
            ))
            .bearer_auth(&credentials.access_token)
            .json(&json!({}))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "cancel payment").await?;

        let envelope: PaymentEnvelope = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("square returned a malformed payment".into()))?;
        Ok(GatewayTransaction {
            external_id: envelope.payment.id,
            status: TransactionStatus::Succeeded,
            amount_minor: envelope.payment.amount_money.amount,
            currency: envelope.payment.amount_money.currency.to_ascii_uppercase(),
            metadata: json!({ "square_status": envelope.payment.status }),
        })
    }

    async fn get_status(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let payment = self
            .fetch_payment(settings, &credentials, transaction_id)
            .await?;
        Ok(Self::map_payment(payment))
    }

    async fn test_connection(
        &self,
        settings: &PaymentSettingsEntity,
    ) -> Result<ConnectionCheck, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let resp = self
            .http
            .get(format!("{}/v2/locations", Self::base_url(settings)))
            .bearer_auth(&credentials.access_token)
            .send()
            .await?;
        Self::ensure_success(resp, "list locations").await?;

        Ok(ConnectionCheck {
            ok: true,
            detail: "Square account reachable".to_string(),
            test_mode: settings.test_mode,
        })
    }

    /// `x-square-hmacsha256-signature`: base64 HMAC-SHA256 over the
    /// registered notification URL concatenated with the raw body.
    async fn verify_webhook(
        &self,
        settings: &PaymentSettingsEntity,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ProviderEvent, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let signature_key = credentials.webhook_signature_key.ok_or_else(|| {
            GatewayError::Configuration("square webhook signature key is not configured".into())
        })?;
        let notification_url = credentials.webhook_url.ok_or_else(|| {
            GatewayError::Configuration("square webhook url is not configured".into())
        })?;

        let provided = header_str(headers, "x-square-hmacsha256-signature").ok_or_else(|| {
            GatewayError::WebhookAuthentication("missing square signature header".to_string())
        })?;
        let provided = BASE64.decode(provided).map_err(|_| {
            GatewayError::WebhookAuthentication("malformed square signature".to_string())
        })?;

        let mut mac = HmacSha256::new_from_slice(signature_key.as_bytes())
            .map_err(|_| GatewayError::Configuration("invalid square signature key".into()))?;
        mac.update(notification_url.as_bytes());
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        if !constant_time_eq(&expected, &provided) {
            return Err(GatewayError::WebhookAuthentication(
                "invalid square signature".to_string(),
            ));
        }

        let event: serde_json::Value = serde_json::from_slice(body).map_err(|_| {
            GatewayError::WebhookAuthentication("unparseable square event".to_string())
        })?;
        Ok(map_event(&event))
    }
}

fn map_event(event: &serde_json::Value) -> ProviderEvent {
    let event_type = event
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let object = event.pointer("/data/object");

    let (resource, mapped) = match event_type.as_str() {
        "payment.updated" | "payment.created" => {
            let payment = object.and_then(|o| o.get("payment"));
            let mapped = match payment
                .and_then(|p| p.get("status"))
                .and_then(|v| v.as_str())
            {
                Some("COMPLETED") => LedgerEvent::PaymentSucceeded,
                Some("FAILED") => LedgerEvent::PaymentFailed,
                Some("CANCELED") => LedgerEvent::VoidCompleted,
                _ => LedgerEvent::Unrecognized,
            };
            (payment, mapped)
        }
        "refund.updated" | "refund.created" => {
            let refund = object.and_then(|o| o.get("refund"));
            let mapped = match refund
                .and_then(|r| r.get("status"))
                .and_then(|v| v.as_str())
            {
                Some("COMPLETED") => LedgerEvent::RefundCompleted,
                _ => LedgerEvent::Unrecognized,
            };
            (refund, mapped)
        }
        _ => (None, LedgerEvent::Unrecognized),
    };

    ProviderEvent {
        event: mapped,
        raw_type: event_type,
        external_id: resource
            .and_then(|r| r.get("id"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
        amount_minor: resource
            .and_then(|r| r.pointer("/amount_money/amount"))
            .and_then(|v| v.as_i64()),
        currency: resource
            .and_then(|r| r.pointer("/amount_money/currency"))
            .and_then(|v| v.as_str())
            .map(str::to_ascii_uppercase),
        customer_email: resource
            .and_then(|r| r.get("buyer_email_address"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_completed_payment_event() {
        let event = serde_json::json!({
            "type": "payment.updated",
            "data": { "object": { "payment": {
                "id": "sq_pay_1",
                "status": "COMPLETED",
                "amount_money": { "amount": 1999, "currency": "USD" }
            }}}
        });
        let mapped = map_event(&event);
        assert_eq!(mapped.event, LedgerEvent::PaymentSucceeded);
        assert_eq!(mapped.external_id.as_deref(), Some("sq_pay_1"));
        assert_eq!(mapped.amount_minor, Some(1999));
    }

    #[test]
    fn canceled_payment_maps_to_void() {
        let event = serde_json::json!({
            "type": "payment.updated",
            "data": { "object": { "payment": {
                "id": "sq_pay_2",
                "status": "CANCELED",
                "amount_money": { "amount": 500, "currency": "USD" }
            }}}
        });
        assert_eq!(map_event(&event).event, LedgerEvent::VoidCompleted);
    }

    #[test]
    fn unrelated_event_is_unrecognized() {
        let event = serde_json::json!({ "type": "catalog.version.updated", "data": {} });
        assert_eq!(map_event(&event).event, LedgerEvent::Unrecognized);
    }
}
