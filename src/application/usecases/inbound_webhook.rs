use std::sync::Arc;

use axum::http::HeaderMap;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::transactions::NewTransactionEntity;
use crate::domain::repositories::payment_settings::PaymentSettingsRepository;
use crate::domain::repositories::transactions::TransactionRepository;
use crate::domain::value_objects::enums::ledger_events::LedgerEvent;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::infrastructure::payment_gateways::{AdapterRegistry, GatewayError};

#[derive(Debug, Error)]
pub enum InboundWebhookError {
    #[error("provider is not configured for this tenant")]
    NotConfigured,
    #[error("webhook authentication failed")]
    AuthenticationFailed,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl InboundWebhookError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            InboundWebhookError::NotConfigured => StatusCode::NOT_FOUND,
            InboundWebhookError::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            // Non-2xx makes the provider redeliver later; the upsert makes
            // that redelivery harmless.
            InboundWebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Receives one provider callback: authenticate with the provider's own
/// scheme before reading anything else out of the request, translate into
/// the internal event vocabulary, and apply through the same idempotent
/// upsert the synchronous path uses.
pub struct InboundWebhookUseCase<S, T>
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
    T: TransactionRepository + Send + Sync + 'static,
{
    settings_repo: Arc<S>,
    transaction_repo: Arc<T>,
    adapters: Arc<AdapterRegistry>,
}

impl<S, T> InboundWebhookUseCase<S, T>
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
    T: TransactionRepository + Send + Sync + 'static,
{
    pub fn new(settings_repo: Arc<S>, transaction_repo: Arc<T>, adapters: Arc<AdapterRegistry>) -> Self {
        Self {
            settings_repo,
            transaction_repo,
            adapters,
        }
    }

    pub async fn receive(
        &self,
        tenant_id: Uuid,
        provider: PaymentProvider,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<(), InboundWebhookError> {
        let settings = self
            .settings_repo
            .find_by_tenant_and_provider(tenant_id, provider)
            .await
            .map_err(|err| {
                error!(%tenant_id, %provider, db_error = ?err, "inbound webhook: settings lookup failed");
                InboundWebhookError::Internal(err)
            })?
            .ok_or(InboundWebhookError::NotConfigured)?;

        let adapter = self
            .adapters
            .adapter(provider)
            .ok_or(InboundWebhookError::NotConfigured)?;

        let event = match adapter.verify_webhook(&settings, headers, body).await {
            Ok(event) => event,
            Err(GatewayError::WebhookAuthentication(reason)) => {
                // Possibly a forgery attempt; keep the reason in the log,
                // never in the response.
                warn!(
                    %tenant_id,
                    %provider,
                    reason = %reason,
                    "inbound webhook: authentication rejected"
                );
                return Err(InboundWebhookError::AuthenticationFailed);
            }
            Err(err) => {
                error!(%tenant_id, %provider, gateway_error = %err, "inbound webhook: verification errored");
                return Err(InboundWebhookError::Internal(anyhow::anyhow!(err)));
            }
        };

        let Some((type_, status)) = event.event.ledger_row() else {
            // Authenticated but outside our vocabulary. Ack so the
            // provider stops redelivering.
            info!(
                %tenant_id,
                %provider,
                raw_type = %event.raw_type,
                "inbound webhook: unrecognized event acknowledged"
            );
            return Ok(());
        };

        let Some(external_id) = event.external_id else {
            warn!(
                %tenant_id,
                %provider,
                raw_type = %event.raw_type,
                "inbound webhook: recognized event carried no transaction reference"
            );
            return Ok(());
        };

        let row = NewTransactionEntity {
            tenant_id,
            external_id: external_id.clone(),
            provider: provider.as_str().to_string(),
            amount_minor: event.amount_minor.unwrap_or(0),
            currency: event.currency.unwrap_or_default(),
            status: status.to_string(),
            type_: type_.to_string(),
            customer_email: event.customer_email,
            metadata: serde_json::json!({ "source": "webhook", "raw_type": event.raw_type }),
        };

        self.transaction_repo
            .upsert_by_provider_ref(row)
            .await
            .map_err(|err| {
                error!(
                    %tenant_id,
                    %provider,
                    external_id = %external_id,
                    db_error = ?err,
                    "inbound webhook: ledger upsert failed"
                );
                InboundWebhookError::Internal(err)
            })?;

        info!(
            %tenant_id,
            %provider,
            external_id = %external_id,
            event = %event.event,
            "inbound webhook: confirmation applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::payment_settings::PaymentSettingsEntity;
    use crate::domain::repositories::payment_settings::MockPaymentSettingsRepository;
    use crate::domain::repositories::transactions::MockTransactionRepository;
    use crate::infrastructure::payment_gateways::{
        MockPaymentGatewayAdapter, PaymentGatewayAdapter, ProviderEvent,
    };
    use chrono::Utc;
    use serde_json::json;

    fn settings_repo_with_row(provider: PaymentProvider) -> MockPaymentSettingsRepository {
        let mut repo = MockPaymentSettingsRepository::new();
        repo.expect_find_by_tenant_and_provider()
            .returning(move |tenant_id, _| {
                Ok(Some(PaymentSettingsEntity {
                    id: Uuid::new_v4(),
                    tenant_id,
                    provider: provider.as_str().to_string(),
                    enabled: true,
                    test_mode: true,
                    credentials: json!({}),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                }))
            });
        repo
    }

    fn registry_with(adapter: MockPaymentGatewayAdapter) -> Arc<AdapterRegistry> {
        Arc::new(AdapterRegistry::with_adapters(vec![Arc::new(adapter)
            as Arc<dyn PaymentGatewayAdapter>]))
    }

    fn succeeded_event(external_id: &str) -> ProviderEvent {
        ProviderEvent {
            event: LedgerEvent::PaymentSucceeded,
            raw_type: "payment_intent.succeeded".to_string(),
            external_id: Some(external_id.to_string()),
            amount_minor: Some(1999),
            currency: Some("USD".to_string()),
            customer_email: None,
        }
    }

    #[tokio::test]
    async fn authenticated_confirmation_upserts_by_provider_ref() {
        let mut adapter = MockPaymentGatewayAdapter::new();
        adapter.expect_provider().return_const(PaymentProvider::Stripe);
        adapter
            .expect_verify_webhook()
            .returning(|_, _, _| Ok(succeeded_event("pi_123")));

        let mut transaction_repo = MockTransactionRepository::new();
        transaction_repo
            .expect_upsert_by_provider_ref()
            .times(1)
            .withf(|row| {
                row.provider == "stripe"
                    && row.external_id == "pi_123"
                    && row.status == "succeeded"
                    && row.type_ == "payment"
            })
            .returning(|_| Ok(Uuid::new_v4()));

        let usecase = InboundWebhookUseCase::new(
            Arc::new(settings_repo_with_row(PaymentProvider::Stripe)),
            Arc::new(transaction_repo),
            registry_with(adapter),
        );

        let result = usecase
            .receive(Uuid::new_v4(), PaymentProvider::Stripe, &HeaderMap::new(), b"{}")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn duplicate_confirmations_are_each_applied_through_the_upsert() {
        let mut adapter = MockPaymentGatewayAdapter::new();
        adapter.expect_provider().return_const(PaymentProvider::Stripe);
        adapter
            .expect_verify_webhook()
            .returning(|_, _, _| Ok(succeeded_event("pi_dup")));

        let mut transaction_repo = MockTransactionRepository::new();
        // Same (provider, external_id) both times; the unique key makes
        // the second call a no-op update rather than a second row.
        transaction_repo
            .expect_upsert_by_provider_ref()
            .times(2)
            .withf(|row| row.provider == "stripe" && row.external_id == "pi_dup")
            .returning(|_| Ok(Uuid::new_v4()));

        let usecase = InboundWebhookUseCase::new(
            Arc::new(settings_repo_with_row(PaymentProvider::Stripe)),
            Arc::new(transaction_repo),
            registry_with(adapter),
        );

        let tenant_id = Uuid::new_v4();
        for _ in 0..2 {
            usecase
                .receive(tenant_id, PaymentProvider::Stripe, &HeaderMap::new(), b"{}")
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn authentication_failure_rejects_without_touching_the_ledger() {
        let mut adapter = MockPaymentGatewayAdapter::new();
        adapter.expect_provider().return_const(PaymentProvider::Checkout);
        adapter.expect_verify_webhook().returning(|_, _, _| {
            Err(GatewayError::WebhookAuthentication("bad signature".to_string()))
        });

        let mut transaction_repo = MockTransactionRepository::new();
        transaction_repo.expect_upsert_by_provider_ref().never();

        let usecase = InboundWebhookUseCase::new(
            Arc::new(settings_repo_with_row(PaymentProvider::Checkout)),
            Arc::new(transaction_repo),
            registry_with(adapter),
        );

        let result = usecase
            .receive(Uuid::new_v4(), PaymentProvider::Checkout, &HeaderMap::new(), b"{}")
            .await;
        assert!(matches!(result, Err(InboundWebhookError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn unrecognized_event_is_acknowledged() {
        let mut adapter = MockPaymentGatewayAdapter::new();
        adapter.expect_provider().return_const(PaymentProvider::Square);
        adapter.expect_verify_webhook().returning(|_, _, _| {
            Ok(ProviderEvent {
                event: LedgerEvent::Unrecognized,
                raw_type: "dispute.created".to_string(),
                external_id: Some("py_1".to_string()),
                amount_minor: None,
                currency: None,
                customer_email: None,
            })
        });

        let mut transaction_repo = MockTransactionRepository::new();
        transaction_repo.expect_upsert_by_provider_ref().never();

        let usecase = InboundWebhookUseCase::new(
            Arc::new(settings_repo_with_row(PaymentProvider::Square)),
            Arc::new(transaction_repo),
            registry_with(adapter),
        );

        let result = usecase
            .receive(Uuid::new_v4(), PaymentProvider::Square, &HeaderMap::new(), b"{}")
            .await;
        assert!(result.is_ok());
    }
}
