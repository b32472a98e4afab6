use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::transactions::{NewTransactionEntity, TransactionEntity};
use crate::domain::repositories::payment_settings::PaymentSettingsRepository;
use crate::domain::repositories::transactions::TransactionRepository;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::domain::value_objects::enums::transaction_statuses::TransactionStatus;
use crate::domain::value_objects::enums::transaction_types::TransactionType;
use crate::domain::value_objects::payments::{PaymentOperation, PaymentResult};
use crate::infrastructure::payment_gateways::{AdapterRegistry, GatewayTransaction};

const LEDGER_WRITE_ATTEMPTS: u32 = 3;
const LEDGER_WRITE_BACKOFF: Duration = Duration::from_millis(200);

/// Routes unified payment operations to the tenant's provider and appends
/// the resulting money movement to the ledger. `process` never returns an
/// error: every failure mode collapses into a `PaymentResult` with
/// `success = false`, because callers branch on the outcome rather than
/// on an error type.
pub struct PaymentGatewayUseCase<S, T>
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
    T: TransactionRepository + Send + Sync + 'static,
{
    settings_repo: Arc<S>,
    transaction_repo: Arc<T>,
    adapters: Arc<AdapterRegistry>,
}

impl<S, T> PaymentGatewayUseCase<S, T>
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

    /// The highest-priority enabled provider for this tenant. Priority is
    /// fixed, not configurable per tenant.
    pub async fn default_provider(&self, tenant_id: Uuid) -> Result<Option<PaymentProvider>> {
        let settings = self.settings_repo.list_by_tenant(tenant_id).await?;

        Ok(PaymentProvider::PRIORITY_ORDER.into_iter().find(|provider| {
            settings
                .iter()
                .any(|row| row.enabled && row.provider == provider.as_str())
        }))
    }

    pub async fn process(
        &self,
        tenant_id: Uuid,
        provider: Option<PaymentProvider>,
        operation: PaymentOperation,
    ) -> PaymentResult {
        let provider = match provider {
            Some(explicit) => explicit,
            None => match self.default_provider(tenant_id).await {
                Ok(Some(resolved)) => resolved,
                Ok(None) => {
                    warn!(%tenant_id, "payments: no enabled payment provider for tenant");
                    return PaymentResult::failure(
                        PaymentProvider::PRIORITY_ORDER[0],
                        "no enabled payment provider is configured for this tenant",
                    );
                }
                Err(err) => {
                    error!(%tenant_id, db_error = ?err, "payments: failed to resolve default provider");
                    return PaymentResult::failure(
                        PaymentProvider::PRIORITY_ORDER[0],
                        "could not resolve a payment provider",
                    );
                }
            },
        };

        let settings = match self
            .settings_repo
            .find_by_tenant_and_provider(tenant_id, provider)
            .await
        {
            Ok(Some(settings)) if settings.enabled => settings,
            Ok(_) => {
                warn!(%tenant_id, %provider, "payments: provider not configured or disabled");
                return PaymentResult::failure(
                    provider,
                    format!("{provider} is not configured for this tenant"),
                );
            }
            Err(err) => {
                error!(%tenant_id, %provider, db_error = ?err, "payments: failed to load provider settings");
                return PaymentResult::failure(provider, "could not load provider settings");
            }
        };

        let adapter = match self.adapters.adapter(provider) {
            Some(adapter) => adapter,
            None => {
                error!(%provider, "payments: no adapter registered");
                return PaymentResult::failure(provider, format!("{provider} is not supported"));
            }
        };

        info!(
            %tenant_id,
            %provider,
            operation = operation.name(),
            "payments: dispatching operation"
        );

        let outcome = match &operation {
            PaymentOperation::Charge(request) => adapter.charge(&settings, request).await,
            PaymentOperation::AuthorizeOnly(request) => {
                adapter.authorize_only(&settings, request).await
            }
            PaymentOperation::Capture {
                transaction_id,
                amount_minor,
                currency,
            } => {
                adapter
                    .capture(&settings, transaction_id, *amount_minor, currency)
                    .await
            }
            PaymentOperation::Refund {
                transaction_id,
                amount_minor,
                currency,
            } => {
                adapter
                    .refund(&settings, transaction_id, *amount_minor, currency)
                    .await
            }
            PaymentOperation::Void { transaction_id } => {
                adapter.void(&settings, transaction_id).await
            }
            PaymentOperation::GetStatus { transaction_id } => {
                adapter.get_status(&settings, transaction_id).await
            }
        };

        let transaction = match outcome {
            Ok(transaction) => transaction,
            Err(err) => {
                warn!(
                    %tenant_id,
                    %provider,
                    operation = operation.name(),
                    gateway_error = %err,
                    "payments: provider rejected operation"
                );
                return PaymentResult::failure(provider, err.to_string());
            }
        };

        if let Some(type_) = ledger_type(&operation) {
            self.append_to_ledger(tenant_id, provider, type_, &operation, &transaction)
                .await;
        }

        PaymentResult {
            success: transaction.status != TransactionStatus::Failed,
            provider,
            transaction_id: Some(transaction.external_id),
            status: Some(transaction.status),
            amount_minor: Some(transaction.amount_minor),
            currency: Some(transaction.currency),
            error: None,
            metadata: transaction.metadata,
        }
    }

    pub async fn list_transactions(
        &self,
        tenant_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TransactionEntity>> {
        self.transaction_repo.list_by_tenant(tenant_id, limit).await
    }

    /// Money already moved at the provider by the time this runs, so a
    /// write failure here is a real inconsistency: retry a bounded number
    /// of times, then raise an ERROR with everything an operator needs to
    /// reconcile the row by hand.
    async fn append_to_ledger(
        &self,
        tenant_id: Uuid,
        provider: PaymentProvider,
        type_: TransactionType,
        operation: &PaymentOperation,
        transaction: &GatewayTransaction,
    ) {
        let customer_email = match operation {
            PaymentOperation::Charge(request) | PaymentOperation::AuthorizeOnly(request) => {
                request.customer_email.clone()
            }
            _ => None,
        };

        let row = NewTransactionEntity {
            tenant_id,
            external_id: transaction.external_id.clone(),
            provider: provider.as_str().to_string(),
            amount_minor: transaction.amount_minor,
            currency: transaction.currency.clone(),
            status: transaction.status.to_string(),
            type_: type_.to_string(),
            customer_email,
            metadata: transaction.metadata.clone(),
        };

        let mut last_error = None;
        for attempt in 1..=LEDGER_WRITE_ATTEMPTS {
            match self.transaction_repo.upsert_by_provider_ref(row.clone()).await {
                Ok(_) => return,
                Err(err) => {
                    warn!(
                        %tenant_id,
                        %provider,
                        external_id = %row.external_id,
                        attempt,
                        db_error = ?err,
                        "payments: ledger write failed"
                    );
                    last_error = Some(err);
                    tokio::time::sleep(LEDGER_WRITE_BACKOFF).await;
                }
            }
        }

        error!(
            %tenant_id,
            %provider,
            external_id = %row.external_id,
            amount_minor = row.amount_minor,
            currency = %row.currency,
            transaction_type = %row.type_,
            db_error = ?last_error,
            "payments: ledger write exhausted retries after money moved; manual reconciliation required"
        );
    }
}

/// Which ledger row type a successful operation produces. Authorizations
/// and status reads move no money and are not ledgered.
fn ledger_type(operation: &PaymentOperation) -> Option<TransactionType> {
    match operation {
        PaymentOperation::Charge(_) => Some(TransactionType::Payment),
        PaymentOperation::Capture { .. } => Some(TransactionType::Capture),
        PaymentOperation::Refund { .. } => Some(TransactionType::Refund),
        PaymentOperation::Void { .. } => Some(TransactionType::Void),
        PaymentOperation::AuthorizeOnly(_) | PaymentOperation::GetStatus { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::payment_settings::PaymentSettingsEntity;
    use crate::domain::repositories::payment_settings::MockPaymentSettingsRepository;
    use crate::domain::repositories::transactions::MockTransactionRepository;
    use crate::domain::value_objects::payments::ChargeRequest;
    use crate::infrastructure::payment_gateways::{
        GatewayError, MockPaymentGatewayAdapter, PaymentGatewayAdapter,
    };
    use chrono::Utc;
    use serde_json::json;

    fn settings_row(provider: PaymentProvider, enabled: bool) -> PaymentSettingsEntity {
        PaymentSettingsEntity {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            provider: provider.as_str().to_string(),
            enabled,
            test_mode: true,
            credentials: json!({"secret_key": "sk_test"}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn registry_with(adapter: MockPaymentGatewayAdapter) -> Arc<AdapterRegistry> {
        Arc::new(AdapterRegistry::with_adapters(vec![Arc::new(adapter)
            as Arc<dyn PaymentGatewayAdapter>]))
    }

    #[tokio::test]
    async fn default_provider_follows_priority_order() {
        let tenant_id = Uuid::new_v4();
        let mut settings_repo = MockPaymentSettingsRepository::new();
        settings_repo.expect_list_by_tenant().returning(move |_| {
            Ok(vec![
                settings_row(PaymentProvider::Mollie, true),
                settings_row(PaymentProvider::Square, true),
                settings_row(PaymentProvider::Stripe, false),
            ])
        });

        let usecase = PaymentGatewayUseCase::new(
            Arc::new(settings_repo),
            Arc::new(MockTransactionRepository::new()),
            Arc::new(AdapterRegistry::with_adapters(vec![])),
        );

        let resolved = usecase.default_provider(tenant_id).await.unwrap();
        assert_eq!(resolved, Some(PaymentProvider::Square));
    }

    #[tokio::test]
    async fn charge_appends_one_ledger_row_with_adapter_amounts() {
        let tenant_id = Uuid::new_v4();

        let mut settings_repo = MockPaymentSettingsRepository::new();
        settings_repo
            .expect_find_by_tenant_and_provider()
            .returning(|_, provider| Ok(Some(settings_row(provider, true))));

        let mut transaction_repo = MockTransactionRepository::new();
        transaction_repo
            .expect_upsert_by_provider_ref()
            .times(1)
            .withf(|row| {
                row.provider == "stripe"
                    && row.external_id == "pi_123"
                    && row.amount_minor == 1999
                    && row.type_ == "payment"
                    && row.status == "succeeded"
            })
            .returning(|_| Ok(Uuid::new_v4()));

        let mut adapter = MockPaymentGatewayAdapter::new();
        adapter.expect_provider().return_const(PaymentProvider::Stripe);
        adapter.expect_charge().returning(|_, _| {
            Ok(GatewayTransaction {
                external_id: "pi_123".to_string(),
                status: TransactionStatus::Succeeded,
                amount_minor: 1999,
                currency: "USD".to_string(),
                metadata: json!({}),
            })
        });

        let usecase = PaymentGatewayUseCase::new(
            Arc::new(settings_repo),
            Arc::new(transaction_repo),
            registry_with(adapter),
        );

        let result = usecase
            .process(
                tenant_id,
                Some(PaymentProvider::Stripe),
                PaymentOperation::Charge(ChargeRequest {
                    amount_minor: 1999,
                    currency: "USD".to_string(),
                    ..Default::default()
                }),
            )
            .await;

        assert!(result.success);
        assert_eq!(result.transaction_id.as_deref(), Some("pi_123"));
        assert_eq!(result.amount_minor, Some(1999));
    }

    #[tokio::test]
    async fn provider_rejection_becomes_failure_result_not_error() {
        let tenant_id = Uuid::new_v4();

        let mut settings_repo = MockPaymentSettingsRepository::new();
        settings_repo
            .expect_find_by_tenant_and_provider()
            .returning(|_, provider| Ok(Some(settings_row(provider, true))));

        let mut transaction_repo = MockTransactionRepository::new();
        transaction_repo.expect_upsert_by_provider_ref().never();

        let mut adapter = MockPaymentGatewayAdapter::new();
        adapter.expect_provider().return_const(PaymentProvider::Stripe);
        adapter
            .expect_charge()
            .returning(|_, _| Err(GatewayError::Provider("card_declined".to_string())));

        let usecase = PaymentGatewayUseCase::new(
            Arc::new(settings_repo),
            Arc::new(transaction_repo),
            registry_with(adapter),
        );

        let result = usecase
            .process(
                tenant_id,
                Some(PaymentProvider::Stripe),
                PaymentOperation::Charge(ChargeRequest::default()),
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("card_declined"));
        assert!(result.transaction_id.is_none());
    }

    #[tokio::test]
    async fn get_status_never_touches_the_ledger() {
        let tenant_id = Uuid::new_v4();

        let mut settings_repo = MockPaymentSettingsRepository::new();
        settings_repo
            .expect_find_by_tenant_and_provider()
            .returning(|_, provider| Ok(Some(settings_row(provider, true))));

        let mut transaction_repo = MockTransactionRepository::new();
        transaction_repo.expect_upsert_by_provider_ref().never();

        let mut adapter = MockPaymentGatewayAdapter::new();
        adapter.expect_provider().return_const(PaymentProvider::Square);
        adapter.expect_get_status().returning(|_, _| {
            Ok(GatewayTransaction {
                external_id: "py_1".to_string(),
                status: TransactionStatus::Pending,
                amount_minor: 500,
                currency: "USD".to_string(),
                metadata: json!({}),
            })
        });

        let usecase = PaymentGatewayUseCase::new(
            Arc::new(settings_repo),
            Arc::new(transaction_repo),
            registry_with(adapter),
        );

        let result = usecase
            .process(
                tenant_id,
                Some(PaymentProvider::Square),
                PaymentOperation::GetStatus {
                    transaction_id: "py_1".to_string(),
                },
            )
            .await;

        assert!(result.success);
        assert_eq!(result.status, Some(TransactionStatus::Pending));
    }

    #[tokio::test]
    async fn unconfigured_provider_fails_without_adapter_call() {
        let tenant_id = Uuid::new_v4();

        let mut settings_repo = MockPaymentSettingsRepository::new();
        settings_repo
            .expect_find_by_tenant_and_provider()
            .returning(|_, _| Ok(None));

        let usecase = PaymentGatewayUseCase::new(
            Arc::new(settings_repo),
            Arc::new(MockTransactionRepository::new()),
            Arc::new(AdapterRegistry::with_adapters(vec![])),
        );

        let result = usecase
            .process(
                tenant_id,
                Some(PaymentProvider::Mollie),
                PaymentOperation::Void {
                    transaction_id: "tr_9".to_string(),
                },
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.provider, PaymentProvider::Mollie);
    }
}
