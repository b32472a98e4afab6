use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::error;

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

const LIVE_BASE_URL: &str = "https://api.checkout.com";
const SANDBOX_BASE_URL: &str = "https://api.sandbox.checkout.com";

/// Checkout.com adapter. Native unit is minor units. Captures, refunds and
/// voids are accepted asynchronously (202 + action id); the resulting
/// ledger rows stay `pending` until the corresponding webhook confirms
/// them, which is exactly the reconciliation path the receiver exists for.
pub struct CheckoutAdapter {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CheckoutCredentials {
    secret_key: String,
    webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutErrorEnvelope {
    #[serde(default)]
    error_codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutPayment {
    id: String,
    status: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ActionAccepted {
    action_id: String,
}

impl CheckoutAdapter {
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

    fn credentials(settings: &PaymentSettingsEntity) -> Result<CheckoutCredentials, GatewayError> {
        serde_json::from_value(settings.credentials.clone()).map_err(|_| {
            GatewayError::Configuration("checkout credentials are incomplete".to_string())
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
        let error_codes = serde_json::from_str::<CheckoutErrorEnvelope>(&body)
            .map(|envelope| envelope.error_codes)
            .unwrap_or_default();

        error!(
            status = %status,
            error_codes = ?error_codes,
            context = %context,
            "checkout api request failed"
        );

        let message = if error_codes.is_empty() {
            format!("status {status}")
        } else {
            error_codes.join(", ")
        };
        Err(GatewayError::Provider(format!(
            "checkout {context} failed: {message}"
        )))
    }

    fn map_status(status: &str) -> TransactionStatus {
        match status {
            "Captured" | "Paid" => TransactionStatus::Succeeded,
            "Declined" | "Canceled" | "Expired" => TransactionStatus::Failed,
            "Refunded" => TransactionStatus::Refunded,
            _ => TransactionStatus::Pending,
        }
    }

    fn map_payment(payment: CheckoutPayment) -> GatewayTransaction {
        GatewayTransaction {
            external_id: payment.id,
            status: Self::map_status(&payment.status),
            amount_minor: payment.amount,
            currency: payment.currency.to_ascii_uppercase(),
            metadata: json!({ "checkout_status": payment.status }),
        }
    }

    async fn fetch_payment(
        &self,
        settings: &PaymentSettingsEntity,
        credentials: &CheckoutCredentials,
        payment_id: &str,
    ) -> Result<CheckoutPayment, GatewayError> {
        let resp = self
            .http
            .get(format!(
                "{}/payments/{payment_id}",
                Self::base_url(settings)
            ))
            .bearer_auth(&credentials.secret_key)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve payment").await?;

        resp.json()
            .await
            .map_err(|_| GatewayError::Provider("checkout returned a malformed payment".into()))
    }

    async fn create_payment(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
        capture: bool,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let source = request.source.as_deref().ok_or_else(|| {
            GatewayError::Configuration("checkout charge requires a source id".to_string())
        })?;

        let mut body = json!({
            "source": { "type": "id", "id": source },
            "amount": request.amount_minor,
            "currency": request.currency.to_ascii_uppercase(),
            "capture": capture,
        });
        if let Some(email) = &request.customer_email {
            body["customer"] = json!({ "email": email });
        }
        if let Some(description) = &request.description {
            body["reference"] = json!(description);
        }

        let resp = self
            .http
            .post(format!("{}/payments", Self::base_url(settings)))
            .bearer_auth(&credentials.secret_key)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create payment").await?;

        let payment: CheckoutPayment = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("checkout returned a malformed payment".into()))?;
        Ok(Self::map_payment(payment))
    }

    /// Captures, refunds and voids share the accepted-action response
    /// shape; the action id becomes the ledger external id so the later
    /// webhook confirmation collapses onto the same row.
    async fn submit_action(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        action: &str,
        amount_minor: Option<i64>,
        context: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let body = match amount_minor {
            Some(amount) => json!({ "amount": amount }),
            None => json!({}),
        };

        let resp = self
            .http
            .post(format!(
                "{}/payments/{transaction_id}/{action}",
                Self::base_url(settings)
            ))
            .bearer_auth(&credentials.secret_key)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, context).await?;

        let accepted: ActionAccepted = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("checkout returned a malformed action".into()))?;

        // Amount not echoed back on 202; fall back to the original payment.
        let payment = self
            .fetch_payment(settings, &credentials, transaction_id)
            .await?;
        let amount_minor = amount_minor.unwrap_or(payment.amount);
        let currency = payment.currency.to_ascii_uppercase();

        Ok(GatewayTransaction {
            external_id: accepted.action_id,
            status: TransactionStatus::Pending,
            amount_minor,
            currency,
            metadata: json!({ "payment_id": transaction_id }),
        })
    }
}

impl Default for CheckoutAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGatewayAdapter for CheckoutAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Checkout
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
        amount_minor: Option<i64>,
        _currency: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.submit_action(
            settings,
            transaction_id,
            "captures",
            amount_minor,
            "capture payment",
        )
        .await
    }

    async fn refund(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        amount_minor: Option<i64>,
        _currency: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.submit_action(
            settings,
            transaction_id,
            "refunds",
            amount_minor,
            "refund payment",
        )
        .await
    }

    async fn void(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.submit_action(settings, transaction_id, "voids", None, "void payment")
            .await
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
            .get(format!("{}/event-types", Self::base_url(settings)))
            .bearer_auth(&credentials.secret_key)
            .send()
            .await?;
        Self::ensure_success(resp, "list event types").await?;

        Ok(ConnectionCheck {
            ok: true,
            detail: "Checkout.com account reachable".to_string(),
            test_mode: settings.test_mode,
        })
    }

    /// `cko-signature`: hex HMAC-SHA256 over the raw body.
    async fn verify_webhook(
        &self,
        settings: &PaymentSettingsEntity,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ProviderEvent, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let webhook_secret = credentials.webhook_secret.ok_or_else(|| {
            GatewayError::Configuration("checkout webhook secret is not configured".to_string())
        })?;

        let provided = header_str(headers, "cko-signature").ok_or_else(|| {
            GatewayError::WebhookAuthentication("missing cko-signature header".to_string())
        })?;
        let provided = hex::decode(provided).map_err(|_| {
            GatewayError::WebhookAuthentication("malformed checkout signature".to_string())
        })?;

        let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
            .map_err(|_| GatewayError::Configuration("invalid checkout webhook secret".into()))?;
        mac.update(body);
        let expected = mac.finalize().into_bytes();

        if !constant_time_eq(&expected, &provided) {
            return Err(GatewayError::WebhookAuthentication(
                "invalid checkout signature".to_string(),
            ));
        }

        let event: serde_json::Value = serde_json::from_slice(body).map_err(|_| {
            GatewayError::WebhookAuthentication("unparseable checkout event".to_string())
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
    let data = event.get("data");

    let mapped = match event_type.as_str() {
        "payment_captured" | "payment_approved" => LedgerEvent::PaymentSucceeded,
        "payment_declined" => LedgerEvent::PaymentFailed,
        "payment_refunded" => LedgerEvent::RefundCompleted,
        "payment_voided" => LedgerEvent::VoidCompleted,
        _ => LedgerEvent::Unrecognized,
    };

    // Refund/void confirmations reference the action id that the
    // synchronous 202 path already wrote to the ledger.
    let external_id = data
        .and_then(|d| d.get("action_id"))
        .and_then(|v| v.as_str())
        .filter(|_| {
            matches!(
                mapped,
                LedgerEvent::RefundCompleted | LedgerEvent::VoidCompleted
            )
        })
        .or_else(|| data.and_then(|d| d.get("id")).and_then(|v| v.as_str()))
        .map(str::to_string);

    ProviderEvent {
        event: mapped,
        raw_type: event_type,
        external_id,
        amount_minor: data.and_then(|d| d.get("amount")).and_then(|v| v.as_i64()),
        currency: data
            .and_then(|d| d.get("currency"))
            .and_then(|v| v.as_str())
            .map(str::to_ascii_uppercase),
        customer_email: data
            .and_then(|d| d.pointer("/customer/email"))
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_captured_event() {
        let event = serde_json::json!({
            "type": "payment_captured",
            "data": { "id": "pay_1", "amount": 1999, "currency": "usd" }
        });
        let mapped = map_event(&event);
        assert_eq!(mapped.event, LedgerEvent::PaymentSucceeded);
        assert_eq!(mapped.external_id.as_deref(), Some("pay_1"));
        assert_eq!(mapped.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn refund_event_uses_action_id() {
        let event = serde_json::json!({
            "type": "payment_refunded",
            "data": { "id": "pay_1", "action_id": "act_9", "amount": 500, "currency": "USD" }
        });
        let mapped = map_event(&event);
        assert_eq!(mapped.event, LedgerEvent::RefundCompleted);
        assert_eq!(mapped.external_id.as_deref(), Some("act_9"));
    }

    #[test]
    fn statuses_normalize() {
        assert_eq!(
            CheckoutAdapter::map_status("Captured"),
            TransactionStatus::Succeeded
        );
        assert_eq!(
            CheckoutAdapter::map_status("Declined"),
            TransactionStatus::Failed
        );
        assert_eq!(
            CheckoutAdapter::map_status("Authorized"),
            TransactionStatus::Pending
        );
    }
}
