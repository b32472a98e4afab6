use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::units::major_string_to_minor;
use super::{GatewayError, GatewayTransaction, PaymentGatewayAdapter, ProviderEvent, header_str};
use crate::domain::entities::payment_settings::PaymentSettingsEntity;
use crate::domain::value_objects::enums::ledger_events::LedgerEvent;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::domain::value_objects::enums::transaction_statuses::TransactionStatus;
use crate::domain::value_objects::payments::{ChargeRequest, ConnectionCheck};

const LIVE_BASE_URL: &str = "https://api-m.paypal.com";
const SANDBOX_BASE_URL: &str = "https://api-m.sandbox.paypal.com";

/// PayPal Orders v2 adapter. The wallet network speaks decimal major-unit
/// strings; conversion to ledger minor units happens here and nowhere
/// else. Inbound callbacks are authenticated with PayPal's own
/// verify-webhook-signature endpoint (transmission-id scheme), not a
/// locally computed HMAC.
pub struct PaypalAdapter {
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct PaypalCredentials {
    client_id: String,
    client_secret: String,
    webhook_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaypalErrorEnvelope {
    name: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaypalAmount {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResource {
    id: String,
    status: String,
    amount: Option<PaypalAmount>,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    amount: Option<PaypalAmount>,
    payments: Option<PurchaseUnitPayments>,
}

#[derive(Debug, Deserialize, Default)]
struct PurchaseUnitPayments {
    #[serde(default)]
    captures: Vec<CaptureResource>,
    #[serde(default)]
    authorizations: Vec<CaptureResource>,
}

impl PaypalAdapter {
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

    fn credentials(settings: &PaymentSettingsEntity) -> Result<PaypalCredentials, GatewayError> {
        serde_json::from_value(settings.credentials.clone()).map_err(|_| {
            GatewayError::Configuration("paypal credentials are incomplete".to_string())
        })
    }

    async fn access_token(
        &self,
        settings: &PaymentSettingsEntity,
        credentials: &PaypalCredentials,
    ) -> Result<String, GatewayError> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let resp = self
            .http
            .post(format!("{}/v1/oauth2/token", Self::base_url(settings)))
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "fetch oauth token").await?;

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("paypal returned a malformed token".into()))?;
        Ok(token.access_token)
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
        let details = serde_json::from_str::<PaypalErrorEnvelope>(&body).ok();

        error!(
            status = %status,
            error_name = ?details.as_ref().and_then(|d| d.name.clone()),
            context = %context,
            "paypal api request failed"
        );

        let message = details
            .and_then(|d| d.message)
            .unwrap_or_else(|| format!("status {status}"));
        Err(GatewayError::Provider(format!(
            "paypal {context} failed: {message}"
        )))
    }

    fn map_order_status(status: &str) -> TransactionStatus {
        match status {
            "COMPLETED" => TransactionStatus::Succeeded,
            "VOIDED" | "DECLINED" => TransactionStatus::Failed,
            _ => TransactionStatus::Pending,
        }
    }

    fn amount_minor(amount: Option<&PaypalAmount>) -> Result<(i64, String), GatewayError> {
        match amount {
            Some(amount) => Ok((
                major_string_to_minor(&amount.value, &amount.currency_code)?,
                amount.currency_code.to_ascii_uppercase(),
            )),
            None => Err(GatewayError::Provider(
                "paypal response is missing an amount".to_string(),
            )),
        }
    }

    fn map_void(authorization_id: &str, amount_minor: i64, currency: String) -> GatewayTransaction {
        GatewayTransaction {
            // Voids have no resource id of their own on this network.
            external_id: format!("{authorization_id}-void"),
            status: TransactionStatus::Succeeded,
            amount_minor,
            currency,
            metadata: json!({ "authorization_id": authorization_id }),
        }
    }

    fn map_order(order: OrderResponse) -> Result<GatewayTransaction, GatewayError> {
        // Prefer the settled capture/authorization id over the order id:
        // that is the reference later refunds and voids operate on.
        let unit = order.purchase_units.first();
        let payment = unit.and_then(|u| u.payments.as_ref());
        let settled = payment
            .and_then(|p| p.captures.first())
            .or_else(|| payment.and_then(|p| p.authorizations.first()));

        let (external_id, amount) = match settled {
            Some(resource) => (resource.id.clone(), resource.amount.as_ref()),
            None => (order.id.clone(), unit.and_then(|u| u.amount.as_ref())),
        };
        let (amount_minor, currency) = Self::amount_minor(amount)?;

        Ok(GatewayTransaction {
            external_id,
            status: Self::map_order_status(&order.status),
            amount_minor,
            currency,
            metadata: json!({ "order_id": order.id, "paypal_status": order.status }),
        })
    }

    async fn create_order(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
        intent: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let token = self.access_token(settings, &credentials).await?;

        let mut body = json!({
            "intent": intent,
            "purchase_units": [{
                "amount": {
                    "currency_code": request.currency.to_ascii_uppercase(),
                    "value": super::units::minor_to_major_string(
                        request.amount_minor,
                        &request.currency,
                    ),
                }
            }]
        });
        if let Some(source) = &request.source {
            body["payment_source"] = json!({
                "token": { "id": source, "type": "PAYMENT_METHOD_TOKEN" }
            });
        }

        let resp = self
            .http
            .post(format!("{}/v2/checkout/orders", Self::base_url(settings)))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "create order").await?;

        let order: OrderResponse = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("paypal returned a malformed order".into()))?;
        Self::map_order(order)
    }
}

impl Default for PaypalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGatewayAdapter for PaypalAdapter {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paypal
    }

    async fn charge(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.create_order(settings, request, "CAPTURE").await
    }

    async fn authorize_only(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError> {
        self.create_order(settings, request, "AUTHORIZE").await
    }

    async fn capture(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        amount_minor: Option<i64>,
        currency: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let token = self.access_token(settings, &credentials).await?;

        let body = match amount_minor {
            Some(amount) => json!({
                "amount": {
                    "currency_code": currency.to_ascii_uppercase(),
                    "value": super::units::minor_to_major_string(amount, currency),
                }
            }),
            None => json!({}),
        };

        let resp = self
            .http
            .post(format!(
                "{}/v2/payments/authorizations/{transaction_id}/capture",
                Self::base_url(settings)
            ))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "capture authorization").await?;

        let capture: CaptureResource = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("paypal returned a malformed capture".into()))?;
        let (amount_minor, currency) = Self::amount_minor(capture.amount.as_ref())?;
        Ok(GatewayTransaction {
            external_id: capture.id,
            status: Self::map_order_status(&capture.status),
            amount_minor,
            currency,
            metadata: json!({ "authorization_id": transaction_id }),
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
        let token = self.access_token(settings, &credentials).await?;

        let body = match amount_minor {
            Some(amount) => json!({
                "amount": {
                    "currency_code": currency.to_ascii_uppercase(),
                    "value": super::units::minor_to_major_string(amount, currency),
                }
            }),
            None => json!({}),
        };

        let resp = self
            .http
            .post(format!(
                "{}/v2/payments/captures/{transaction_id}/refund",
                Self::base_url(settings)
            ))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "refund capture").await?;

        let refund: CaptureResource = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("paypal returned a malformed refund".into()))?;
        let (amount_minor, currency) = Self::amount_minor(refund.amount.as_ref())?;
        Ok(GatewayTransaction {
            external_id: refund.id,
            status: Self::map_order_status(&refund.status),
            amount_minor,
            currency,
            metadata: json!({ "capture_id": transaction_id }),
        })
    }

    async fn void(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let token = self.access_token(settings, &credentials).await?;

        // The void endpoint answers 204 with no body, so the released
        // amount and its currency come from the authorization itself,
        // fetched before the hold is touched.
        let resp = self
            .http
            .get(format!(
                "{}/v2/payments/authorizations/{transaction_id}",
                Self::base_url(settings)
            ))
            .bearer_auth(&token)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve authorization").await?;
        let authorization: CaptureResource = resp.json().await.map_err(|_| {
            GatewayError::Provider("paypal returned a malformed authorization".into())
        })?;
        let (amount_minor, currency) = Self::amount_minor(authorization.amount.as_ref())?;

        let resp = self
            .http
            .post(format!(
                "{}/v2/payments/authorizations/{transaction_id}/void",
                Self::base_url(settings)
            ))
            .bearer_auth(&token)
            .send()
            .await?;
        Self::ensure_success(resp, "void authorization").await?;

        Ok(Self::map_void(transaction_id, amount_minor, currency))
    }

    async fn get_status(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let token = self.access_token(settings, &credentials).await?;

        let resp = self
            .http
            .get(format!(
                "{}/v2/checkout/orders/{transaction_id}",
                Self::base_url(settings)
            ))
            .bearer_auth(&token)
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "retrieve order").await?;

        let order: OrderResponse = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("paypal returned a malformed order".into()))?;
        Self::map_order(order)
    }

    async fn test_connection(
        &self,
        settings: &PaymentSettingsEntity,
    ) -> Result<ConnectionCheck, GatewayError> {
        let credentials = Self::credentials(settings)?;
        self.access_token(settings, &credentials).await?;

        Ok(ConnectionCheck {
            ok: true,
            detail: "PayPal credentials accepted".to_string(),
            test_mode: settings.test_mode,
        })
    }

    /// Transmission-id scheme: the signature headers are handed back to
    /// PayPal's verify-webhook-signature endpoint together with the
    /// tenant's registered webhook id; only a SUCCESS verdict is trusted.
    async fn verify_webhook(
        &self,
        settings: &PaymentSettingsEntity,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ProviderEvent, GatewayError> {
        let credentials = Self::credentials(settings)?;
        let webhook_id = credentials.webhook_id.clone().ok_or_else(|| {
            GatewayError::Configuration("paypal webhook id is not configured".to_string())
        })?;

        let transmission_id = header_str(headers, "paypal-transmission-id");
        let transmission_time = header_str(headers, "paypal-transmission-time");
        let transmission_sig = header_str(headers, "paypal-transmission-sig");
        let cert_url = header_str(headers, "paypal-cert-url");
        let auth_algo = header_str(headers, "paypal-auth-algo");
        let (Some(transmission_id), Some(transmission_time), Some(transmission_sig), Some(cert_url), Some(auth_algo)) =
            (transmission_id, transmission_time, transmission_sig, cert_url, auth_algo)
        else {
            return Err(GatewayError::WebhookAuthentication(
                "missing paypal transmission headers".to_string(),
            ));
        };

        let webhook_event: serde_json::Value = serde_json::from_slice(body).map_err(|_| {
            GatewayError::WebhookAuthentication("unparseable paypal event".to_string())
        })?;

        let token = self.access_token(settings, &credentials).await?;
        let resp = self
            .http
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                Self::base_url(settings)
            ))
            .bearer_auth(&token)
            .json(&json!({
                "transmission_id": transmission_id,
                "transmission_time": transmission_time,
                "transmission_sig": transmission_sig,
                "cert_url": cert_url,
                "auth_algo": auth_algo,
                "webhook_id": webhook_id,
                "webhook_event": webhook_event,
            }))
            .send()
            .await?;
        let resp = Self::ensure_success(resp, "verify webhook signature").await?;

        #[derive(Deserialize)]
        struct Verdict {
            verification_status: String,
        }
        let verdict: Verdict = resp
            .json()
            .await
            .map_err(|_| GatewayError::Provider("paypal returned a malformed verdict".into()))?;
        if verdict.verification_status != "SUCCESS" {
            return Err(GatewayError::WebhookAuthentication(
                "paypal rejected the transmission signature".to_string(),
            ));
        }

        map_event(&webhook_event)
    }
}

fn map_event(event: &serde_json::Value) -> Result<ProviderEvent, GatewayError> {
    let event_type = event
        .get("event_type")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let resource = event.get("resource");

    let external_id = resource
        .and_then(|r| r.get("id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let (amount_minor, currency) = match resource.and_then(|r| r.get("amount")) {
        Some(amount) => {
            let value = amount.get("value").and_then(|v| v.as_str());
            let currency_code = amount.get("currency_code").and_then(|v| v.as_str());
            match (value, currency_code) {
                (Some(value), Some(code)) => (
                    Some(major_string_to_minor(value, code)?),
                    Some(code.to_ascii_uppercase()),
                ),
                _ => (None, None),
            }
        }
        None => (None, None),
    };

    let mapped = match event_type.as_str() {
        "PAYMENT.CAPTURE.COMPLETED" => LedgerEvent::PaymentSucceeded,
        "PAYMENT.CAPTURE.DENIED" => LedgerEvent::PaymentFailed,
        "PAYMENT.CAPTURE.REFUNDED" => LedgerEvent::RefundCompleted,
        "PAYMENT.AUTHORIZATION.VOIDED" => LedgerEvent::VoidCompleted,
        _ => LedgerEvent::Unrecognized,
    };

    Ok(ProviderEvent {
        event: mapped,
        raw_type: event_type,
        external_id,
        amount_minor,
        currency,
        customer_email: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_capture_completed_with_major_units() {
        let event = serde_json::json!({
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "8XY12345",
                "amount": { "currency_code": "USD", "value": "19.99" }
            }
        });
        let mapped = map_event(&event).unwrap();
        assert_eq!(mapped.event, LedgerEvent::PaymentSucceeded);
        assert_eq!(mapped.external_id.as_deref(), Some("8XY12345"));
        assert_eq!(mapped.amount_minor, Some(1999));
    }

    #[test]
    fn unknown_event_is_unrecognized() {
        let event = serde_json::json!({ "event_type": "BILLING.PLAN.CREATED", "resource": {} });
        assert_eq!(map_event(&event).unwrap().event, LedgerEvent::Unrecognized);
    }

    #[test]
    fn void_row_carries_the_authorization_amount_and_currency() {
        let mapped = PaypalAdapter::map_void("5O190127TN364715T", 1999, "USD".to_string());
        assert_eq!(mapped.external_id, "5O190127TN364715T-void");
        assert_eq!(mapped.status, TransactionStatus::Succeeded);
        assert_eq!(mapped.amount_minor, 1999);
        assert_eq!(mapped.currency, "USD");
    }

    #[test]
    fn order_prefers_capture_id() {
        let order = OrderResponse {
            id: "ORDER-1".into(),
            status: "COMPLETED".into(),
            purchase_units: vec![PurchaseUnit {
                amount: Some(PaypalAmount {
                    currency_code: "USD".into(),
                    value: "5.00".into(),
                }),
                payments: Some(PurchaseUnitPayments {
                    captures: vec![CaptureResource {
                        id: "CAP-1".into(),
                        status: "COMPLETED".into(),
                        amount: Some(PaypalAmount {
                            currency_code: "USD".into(),
                            value: "5.00".into(),
                        }),
                    }],
                    authorizations: vec![],
                }),
            }],
        };
        let tx = PaypalAdapter::map_order(order).unwrap();
        assert_eq!(tx.external_id, "CAP-1");
        assert_eq!(tx.amount_minor, 500);
        assert_eq!(tx.status, TransactionStatus::Succeeded);
    }
}
