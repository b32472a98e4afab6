use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::repositories::payment_settings::PaymentSettingsRepository;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::domain::value_objects::payments::{ConnectionCheck, ProviderStatusDto};
use crate::infrastructure::payment_gateways::AdapterRegistry;

#[derive(Debug, Error)]
pub enum ProviderStatusError {
    #[error("provider is not configured for this tenant")]
    NotConfigured,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ProviderStatusError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            ProviderStatusError::NotConfigured => StatusCode::NOT_FOUND,
            ProviderStatusError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Read-only diagnostics over the tenant's provider configuration: which
/// providers are set up, and whether their stored credentials actually
/// work, without moving any money.
pub struct ProviderStatusUseCase<S>
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
{
    settings_repo: Arc<S>,
    adapters: Arc<AdapterRegistry>,
    public_base_url: String,
}

impl<S> ProviderStatusUseCase<S>
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
{
    pub fn new(settings_repo: Arc<S>, adapters: Arc<AdapterRegistry>, public_base_url: String) -> Self {
        Self {
            settings_repo,
            adapters,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// One row per supported provider, in priority order, whether the
    /// tenant configured it or not. The webhook URL is where the provider
    /// dashboard should point its callbacks.
    pub async fn status(&self, tenant_id: Uuid) -> Result<Vec<ProviderStatusDto>> {
        let settings = self.settings_repo.list_by_tenant(tenant_id).await?;

        Ok(PaymentProvider::PRIORITY_ORDER
            .into_iter()
            .map(|provider| {
                let row = settings
                    .iter()
                    .find(|row| row.provider == provider.as_str());
                ProviderStatusDto {
                    provider,
                    configured: row.is_some(),
                    enabled: row.map(|row| row.enabled).unwrap_or(false),
                    test_mode: row.map(|row| row.test_mode).unwrap_or(false),
                    webhook_url: format!(
                        "{}/webhooks/{}/{}",
                        self.public_base_url,
                        provider.as_str(),
                        tenant_id
                    ),
                }
            })
            .collect())
    }

    pub async fn test_connection(
        &self,
        tenant_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<ConnectionCheck, ProviderStatusError> {
        let settings = self
            .settings_repo
            .find_by_tenant_and_provider(tenant_id, provider)
            .await
            .map_err(ProviderStatusError::Internal)?
            .ok_or(ProviderStatusError::NotConfigured)?;

        let adapter = self
            .adapters
            .adapter(provider)
            .ok_or(ProviderStatusError::NotConfigured)?;

        match adapter.test_connection(&settings).await {
            Ok(check) => {
                info!(%tenant_id, %provider, ok = check.ok, "provider connection check completed");
                Ok(check)
            }
            Err(err) => {
                // A rejected credential is a result, not an error.
                warn!(%tenant_id, %provider, gateway_error = %err, "provider connection check failed");
                Ok(ConnectionCheck {
                    ok: false,
                    detail: err.to_string(),
                    test_mode: settings.test_mode,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::payment_settings::PaymentSettingsEntity;
    use crate::domain::repositories::payment_settings::MockPaymentSettingsRepository;
    use crate::infrastructure::payment_gateways::{
        GatewayError, MockPaymentGatewayAdapter, PaymentGatewayAdapter,
    };
    use chrono::Utc;
    use serde_json::json;

    fn settings_row(provider: PaymentProvider, enabled: bool, test_mode: bool) -> PaymentSettingsEntity {
        PaymentSettingsEntity {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider: provider.as_str().to_string(),
            enabled,
            test_mode,
            credentials: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn status_lists_all_providers_in_priority_order() {
        let tenant_id = Uuid::new_v4();
        let mut settings_repo = MockPaymentSettingsRepository::new();
        settings_repo.expect_list_by_tenant().returning(|_| {
            Ok(vec![settings_row(PaymentProvider::Square, true, true)])
        });

        let usecase = ProviderStatusUseCase::new(
            Arc::new(settings_repo),
            Arc::new(AdapterRegistry::with_adapters(vec![])),
            "https://pay.example.com/".to_string(),
        );

        let rows = usecase.status(tenant_id).await.unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0].provider, PaymentProvider::Stripe);
        assert!(!rows[0].configured);

        let square = rows.iter().find(|r| r.provider == PaymentProvider::Square).unwrap();
        assert!(square.configured && square.enabled && square.test_mode);
        assert_eq!(
            square.webhook_url,
            format!("https://pay.example.com/webhooks/square/{tenant_id}")
        );
    }

    #[tokio::test]
    async fn failed_credential_check_is_reported_not_raised() {
        let mut settings_repo = MockPaymentSettingsRepository::new();
        settings_repo
            .expect_find_by_tenant_and_provider()
            .returning(|_, provider| Ok(Some(settings_row(provider, true, true))));

        let mut adapter = MockPaymentGatewayAdapter::new();
        adapter.expect_provider().return_const(PaymentProvider::Mollie);
        adapter
            .expect_test_connection()
            .returning(|_| Err(GatewayError::Provider("invalid api key".to_string())));

        let usecase = ProviderStatusUseCase::new(
            Arc::new(settings_repo),
            Arc::new(AdapterRegistry::with_adapters(vec![
                Arc::new(adapter) as Arc<dyn PaymentGatewayAdapter>
            ])),
            "https://pay.example.com".to_string(),
        );

        let check = usecase
            .test_connection(Uuid::new_v4(), PaymentProvider::Mollie)
            .await
            .unwrap();
        assert!(!check.ok);
        assert!(check.detail.contains("invalid api key"));
    }
}
