use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
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

const BASE_URL: &str = "https://api.stripe.com";

/// Stripe PaymentIntents adapter. Native unit is already minor units, so
/// amounts pass through unconverted. Sandbox vs live is carried by the
/// secret key itself (`sk_test_` / `sk_live_`).
pub struct StripeAdapter {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StripeCredentials {
    secret_key: String,
    webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    decline_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    amount: i64,
    amount_received: Option<i64>,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
    status: Option<String>,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    type_: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

impl StripeAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    fn credentials(settings: &PaymentSettingsEntity) -> Result<StripeCredentials, GatewayError> {
        serde_json::from_value(settings.credentials.clone()).map_err(|_| {
            GatewayError::Configuration("stripe credentials are incomplete".to_string())
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
        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .ok();

        error!(
            status = %status,
            error_type = ?details.as_ref().and_then(|d| d.type_.clone()),
            error_code = ?details.as_ref().and_then(|d| d.code.clone()),
            decline_code = ?details.as_ref().and_then(|d| d.decline_code.clone()),
            context = %context,
            "stripe api request failed"
        );

        let message = details
            .and_then(|d| d.message)
            .unwrap_or_else(|| format!("status {status}"));
        Err(GatewayError::Provider(format!(
            "stripe {context} failed: {message}"
        )))
    }

    fn map_intent(intent: PaymentIntent) -> GatewayTransaction {
        let status = match intent.status.as_str() {
            "succeeded" => TransactionStatus::Succeeded,
            "canceled" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        };

        GatewayTransaction {
            external_id: intent.id,
            status,
            amount_minor: intent
                .amount_received
                .filter(|amount| *amount > 0)
                .unwrap_or(intent.amount),
            currency: intent.currency.to_ascii_uppercase(),
            metadata: serde_json::json!({ "stripe_status": intent.status }),
        }
    }

    async fn create_intent(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
        capture_method: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let source = request.source.as_deref().ok_or_else(|| {
            GatewayError::Configuration("stripe charge requires a payment method id".to_string())
        })?;

        let mut form: Vec<(&str, String)> = vec![
            ("amount", request.amount_minor.to_string()),
            ("currency", request.currency.to_ascii_lowercase()),
            ("payment_method", source.to_string()),
            ("confirm", "true".to_string()),
            ("capture_method", capture_method.to_string()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("receipt_email", email.clone()));
        }
        if let Some(description) = &request.description {
            form.push(("description", description.clone()));
        }

        let resp = self
            .http
            .post(format!("{BASE_URL}/v1/payment_intents"))
            .header(AUTHORIZATION, format!("Bearer {}", credentials.secret_key))
            .form(&form)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create payment intent").await?;

        let intent: PaymentIntent = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("stripe returned a malformed intent".into()))?;
        Ok(Self::map_intent(intent))
    }
}

impl Default for StripeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGatewayAdapter for StripeAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    async fn charge(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.create_intent(settings, request, "automatic").await
    }

    async fn authorize_only(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.create_intent(settings, request, "manual").await
    }

    async fn capture(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        amount_minor: Option<i64>,
        _currency: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let mut form: Vec<(&str, String)> = Vec::new();
        if let Some(amount) = amount_minor {
            form.push(("amount_to_capture", amount.to_string()));
        }

        let resp = self
            .http
            .post(format!(
                "{BASE_URL}/v1/payment_intents/{transaction_id}/capture"
            ))
            .header(AUTHORIZATION, format!("Bearer {}", credentials.secret_key))
            .form(&form)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "capture payment intent").await?;

        let intent: PaymentIntent = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("stripe returned a malformed intent".into()))?;
        Ok(Self::map_intent(intent))
    }

    async fn refund(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        amount_minor: Option<i64>,
        _currency: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let mut form: Vec<(&str, String)> =
            vec![("payment_intent", transaction_id.to_string())];
        if let Some(amount) = amount_minor {
            form.push(("amount", amount.to_string()));
        }

        let resp = self
            .http
            .post(format!("{BASE_URL}/v1/refunds"))
            .header(AUTHORIZATION, format!("Bearer {}", credentials.secret_key))
            .form(&form)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create refund").await?;

        let refund: StripeRefund = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("stripe returned a malformed refund".into()))?;

        let status = match refund.status.as_deref() {
            Some("succeeded") => TransactionStatus::Succeeded,
            Some("failed") | Some("canceled") => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        };
        Ok(GatewayTransaction {
            external_id: refund.id,
            status,
            amount_minor: refund.amount,
            currency: refund.currency.to_ascii_uppercase(),
            metadata: serde_json::json!({ "payment_intent": transaction_id }),
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
            .post(format!(
                "{BASE_URL}/v1/payment_intents/{transaction_id}/cancel"
            ))
            .header(AUTHORIZATION, format!("Bearer {}", credentials.secret_key))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "cancel payment intent").await?;

        let intent: PaymentIntent = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("stripe returned a malformed intent".into()))?;
        Ok(GatewayTransaction {
            external_id: intent.id,
            status: TransactionStatus::Succeeded,
            amount_minor: intent.amount,
            currency: intent.currency.to_ascii_uppercase(),
            metadata: serde_json::json!({ "stripe_status": intent.status }),
        })
    }

    async fn get_status(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;

        let resp = self
            .http
            .get(format!("{BASE_URL}/v1/payment_intents/{transaction_id}"))
            .header(AUTHORIZATION, format!("Bearer {}", credentials.secret_key))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve payment intent").await?;

        let intent: PaymentIntent = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("stripe returned a malformed intent".into()))?;
        Ok(Self::map_intent(intent))
    }

    async fn test_connection(
        &self,
        settings: &PaymentSettingsEntity,
    ) -> Result<ConnectionCheck, GatewayError> {
        let credentials = Self::credentials(settings)?;

        #[derive(Deserialize)]
        struct Balance {
            livemode: bool,
        }

        let resp = self
            .http
            .get(format!("{BASE_URL}/v1/balance"))
            .header(AUTHORIZATION, format!("Bearer {}", credentials.secret_key))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve balance").await?;

        let balance: Balance = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("stripe returned a malformed balance".into()))?;
        Ok(ConnectionCheck {
            ok: true,
            detail: "Stripe account reachable".to_string(),
            test_mode: !balance.livemode,
        })
    }

    /// `Stripe-Signature: t=<ts>,v1=<hex hmac>` over `"{t}.{raw body}"`.
    async fn verify_webhook(
        &self,
        settings: &PaymentSettingsEntity,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ProviderEvent, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let webhook_secret = credentials.webhook_secret.ok_or_else(|| {
            GatewayError::Configuration("stripe webhook secret is not configured".to_string())
        })?;

        let signature_header = header_str(headers, "stripe-signature").ok_or_else(|| {
            GatewayError::WebhookAuthentication("missing stripe-signature header".to_string())
        })?;

        let mut timestamp: Option<&str> = None;
        let mut signature: Option<&str> = None;
        for part in signature_header.split(',') {
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest);
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signature = Some(rest);
            }
        }
        let timestamp = timestamp.ok_or_else(|| {
            GatewayError::WebhookAuthentication("missing timestamp in stripe-signature".to_string())
        })?;
        let signature = signature.ok_or_else(|| {
            GatewayError::WebhookAuthentication("missing v1 in stripe-signature".to_string())
        })?;

        let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
            .map_err(|_| GatewayError::Configuration("invalid stripe webhook secret".into()))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        let expected = mac.finalize().into_bytes();
        let provided = hex::decode(signature).map_err(|_| {
            GatewayError::WebhookAuthentication("malformed stripe signature".to_string())
        })?;

        if !constant_time_eq(&expected, &provided) {
            return Err(GatewayError::WebhookAuthentication(
                "invalid stripe signature".to_string(),
            ));
        }

        let event: StripeEvent = serde_json::from_slice(body).map_err(|_| {
            GatewayError::WebhookAuthentication("unparseable stripe event".to_string())
        })?;
        Ok(map_event(event))
    }
}

fn map_event(event: StripeEvent) -> ProviderEvent {
    let object = &event.data.object;
    let external_id = object
        .get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let currency = object
        .get("currency")
        .and_then(|v| v.as_str())
        .map(str::to_ascii_uppercase);
    let amount_minor = object
        .get("amount_received")
        .and_then(|v| v.as_i64())
        .filter(|amount| *amount > 0)
        .or_else(|| object.get("amount").and_then(|v| v.as_i64()));
    let customer_email = object
        .get("receipt_email")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let mapped = match event.type_.as_str() {
        "payment_intent.succeeded" => LedgerEvent::PaymentSucceeded,
        "payment_intent.payment_failed" => LedgerEvent::PaymentFailed,
        "payment_intent.canceled" => LedgerEvent::VoidCompleted,
        "refund.created" | "refund.updated" => {
            match object.get("status").and_then(|v| v.as_str()) {
                Some("succeeded") => LedgerEvent::RefundCompleted,
                _ => LedgerEvent::Unrecognized,
            }
        }
        _ => LedgerEvent::Unrecognized,
    };

    ProviderEvent {
        event: mapped,
        raw_type: event.type_,
        external_id,
        amount_minor,
        currency,
        customer_email,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(type_: &str, object: serde_json::Value) -> StripeEvent {
        StripeEvent {
            type_: type_.to_string(),
            data: StripeEventData { object },
        }
    }

    #[test]
    fn maps_succeeded_intent() {
        let mapped = map_event(event(
            "payment_intent.succeeded",
            serde_json::json!({
                "id": "pi_123",
                "amount": 1999,
                "amount_received": 1999,
                "currency": "usd"
            }),
        ));
        assert_eq!(mapped.event, LedgerEvent::PaymentSucceeded);
        assert_eq!(mapped.external_id.as_deref(), Some("pi_123"));
        assert_eq!(mapped.amount_minor, Some(1999));
        assert_eq!(mapped.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn pending_refund_is_unrecognized() {
        let mapped = map_event(event(
            "refund.created",
            serde_json::json!({ "id": "re_1", "status": "pending", "amount": 500, "currency": "usd" }),
        ));
        assert_eq!(mapped.event, LedgerEvent::Unrecognized);
    }

    #[test]
    fn unknown_event_type_is_unrecognized() {
        let mapped = map_event(event("customer.created", serde_json::json!({ "id": "cus_1" })));
        assert_eq!(mapped.event, LedgerEvent::Unrecognized);
        assert_eq!(mapped.raw_type, "customer.created");
    }

    #[test]
    fn intent_statuses_normalize() {
        let tx = StripeAdapter::map_intent(PaymentIntent {
            id: "pi_1".into(),
            status: "requires_action".into(),
            amount: 100,
            amount_received: None,
            currency: "usd".into(),
        });
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount_minor, 100);
    }
}
