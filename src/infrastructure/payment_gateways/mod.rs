pub mod checkout;
pub mod mollie;
pub mod paypal;
pub mod square;
pub mod stripe;
pub mod units;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use thiserror::Error;

use crate::domain::entities::payment_settings::PaymentSettingsEntity;
use crate::domain::value_objects::enums::ledger_events::LedgerEvent;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::domain::value_objects::enums::transaction_statuses::TransactionStatus;
use crate::domain::value_objects::payments::{ChargeRequest, ConnectionCheck};

/// Normalized error surface for every provider. Raw provider exception
/// shapes never cross this boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider not configured: {0}")]
    Configuration(String),
    #[error("{0}")]
    Provider(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("webhook authentication failed: {0}")]
    WebhookAuthentication(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        // without_url: credentials can appear in query strings.
        GatewayError::Network(error.without_url().to_string())
    }
}

/// One provider response mapped into the unified shape. `amount_minor` is
/// already normalized to integer minor units by the adapter, whatever the
/// provider's native convention is.
#[derive(Debug, Clone)]
pub struct GatewayTransaction {
    pub external_id: String,
    pub status: TransactionStatus,
    pub amount_minor: i64,
    pub currency: String,
    pub metadata: serde_json::Value,
}

/// One authenticated inbound callback, normalized into the internal event
/// vocabulary. `raw_type` keeps the provider's own event name for logging.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub event: LedgerEvent,
    pub raw_type: String,
    pub external_id: Option<String>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
}

/// The unified operation set every payment network implements. Credential
/// resolution happens per call from the tenant's settings row; adapters
/// hold no tenant state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGatewayAdapter: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn charge(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError>;

    async fn authorize_only(
        &self,
        settings: &PaymentSettingsEntity,
        request: &ChargeRequest,
    ) -> Result<GatewayTransaction, GatewayError>;

    async fn capture(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        amount_minor: Option<i64>,
        currency: &str,
    ) -> Result<GatewayTransaction, GatewayError>;

    async fn refund(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
        amount_minor: Option<i64>,
        currency: &str,
    ) -> Result<GatewayTransaction, GatewayError>;

    async fn void(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError>;

    async fn get_status(
        &self,
        settings: &PaymentSettingsEntity,
        transaction_id: &str,
    ) -> Result<GatewayTransaction, GatewayError>;

    /// Read-only credential check; never moves money.
    async fn test_connection(
        &self,
        settings: &PaymentSettingsEntity,
    ) -> Result<ConnectionCheck, GatewayError>;

    /// Authenticates one inbound callback with this provider's scheme and
    /// parses it into a normalized event. Must not trust anything in the
    /// body before authentication succeeds.
    async fn verify_webhook(
        &self,
        settings: &PaymentSettingsEntity,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ProviderEvent, GatewayError>;
}

/// All five adapters behind their provider key.
pub struct AdapterRegistry {
    adapters: HashMap<PaymentProvider, Arc<dyn PaymentGatewayAdapter>>,
}

impl AdapterRegistry {
    pub fn bootstrap() -> Self {
        let adapters: Vec<Arc<dyn PaymentGatewayAdapter>> = vec![
            Arc::new(stripe::StripeAdapter::new()),
            Arc::new(paypal::PaypalAdapter::new()),
            Arc::new(square::SquareAdapter::new()),
            Arc::new(checkout::CheckoutAdapter::new()),
            Arc::new(mollie::MollieAdapter::new()),
        ];

        Self {
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.provider(), adapter))
                .collect(),
        }
    }

    pub fn with_adapters(adapters: Vec<Arc<dyn PaymentGatewayAdapter>>) -> Self {
        Self {
            adapters: adapters
                .into_iter()
                .map(|adapter| (adapter.provider(), adapter))
                .collect(),
        }
    }

    pub fn adapter(&self, provider: PaymentProvider) -> Option<Arc<dyn PaymentGatewayAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

pub(crate) fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_bootstraps_all_five_providers() {
        let registry = AdapterRegistry::bootstrap();
        for provider in PaymentProvider::PRIORITY_ORDER {
            assert!(registry.adapter(provider).is_some(), "{provider} missing");
        }
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"same", b"same"));
        assert!(!constant_time_eq(b"same", b"sane"));
    }
}
