use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::application::usecases::payment_gateway::PaymentGatewayUseCase;
use crate::application::usecases::webhook_dispatcher::WebhookDispatcherUseCase;
use crate::config::config_model::DotEnvyConfig;
use crate::domain::repositories::payment_settings::PaymentSettingsRepository;
use crate::domain::repositories::transactions::TransactionRepository;
use crate::domain::repositories::webhook_deliveries::WebhookDeliveryRepository;
use crate::domain::repositories::webhook_registrations::WebhookRegistrationRepository;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::domain::value_objects::payments::{ChargeRequest, PaymentOperation, TransactionDto};
use crate::infrastructure::axum_http::error_responses::error_response;
use crate::infrastructure::payment_gateways::AdapterRegistry;
use crate::infrastructure::postgres::postgres_connection::PgPoolSquad;
use crate::infrastructure::postgres::repositories::payment_settings::PaymentSettingsPostgres;
use crate::infrastructure::postgres::repositories::transactions::TransactionPostgres;
use crate::infrastructure::postgres::repositories::webhook_deliveries::WebhookDeliveryPostgres;
use crate::infrastructure::postgres::repositories::webhook_registrations::WebhookRegistrationPostgres;

const DEFAULT_TRANSACTION_LIMIT: i64 = 100;

/// The payments surface needs both the gateway router and the dispatcher:
/// a successful charge fans the `payment.received` tenant event out to
/// the tenant's webhook subscribers.
pub struct PaymentsState<S, T, R, D>
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
    T: TransactionRepository + Send + Sync + 'static,
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    pub payments: PaymentGatewayUseCase<S, T>,
    pub dispatcher: WebhookDispatcherUseCase<R, D>,
}

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    adapters: Arc<AdapterRegistry>,
    config: &DotEnvyConfig,
) -> Result<Router> {
    let payments = PaymentGatewayUseCase::new(
        Arc::new(PaymentSettingsPostgres::new(Arc::clone(&db_pool))),
        Arc::new(TransactionPostgres::new(Arc::clone(&db_pool))),
        adapters,
    );
    let dispatcher = WebhookDispatcherUseCase::new(
        Arc::new(WebhookRegistrationPostgres::new(Arc::clone(&db_pool))),
        Arc::new(WebhookDeliveryPostgres::new(db_pool)),
        Duration::from_secs(config.webhooks.delivery_timeout_seconds),
    )?;

    Ok(Router::new()
        .route("/:tenant_id/process", post(process))
        .route("/:tenant_id/transactions", get(list_transactions))
        .with_state(Arc::new(PaymentsState {
            payments,
            dispatcher,
        })))
}

#[derive(Debug, Deserialize)]
pub struct ProcessPaymentRequest {
    pub operation: String,
    pub provider: Option<PaymentProvider>,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub source: Option<String>,
    pub description: Option<String>,
    pub transaction_id: Option<String>,
}

impl ProcessPaymentRequest {
    fn into_operation(self) -> Result<(Option<PaymentProvider>, PaymentOperation), String> {
        let provider = self.provider;

        let charge_request = |request: &Self| -> Result<ChargeRequest, String> {
            let amount_minor = request
                .amount_minor
                .ok_or_else(|| "amount_minor is required".to_string())?;
            if amount_minor <= 0 {
                return Err("amount_minor must be positive".to_string());
            }
            let currency = request
                .currency
                .clone()
                .filter(|currency| !currency.is_empty())
                .ok_or_else(|| "currency is required".to_string())?;
            Ok(ChargeRequest {
                amount_minor,
                currency,
                customer_email: request.customer_email.clone(),
                source: request.source.clone(),
                description: request.description.clone(),
            })
        };
        let transaction_id = |request: &Self| -> Result<String, String> {
            request
                .transaction_id
                .clone()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| "transaction_id is required".to_string())
        };

        let operation = match self.operation.as_str() {
            "charge" => PaymentOperation::Charge(charge_request(&self)?),
            "authorize_only" => PaymentOperation::AuthorizeOnly(charge_request(&self)?),
            "capture" => PaymentOperation::Capture {
                transaction_id: transaction_id(&self)?,
                amount_minor: self.amount_minor,
                currency: self.currency.unwrap_or_default(),
            },
            "refund" => PaymentOperation::Refund {
                transaction_id: transaction_id(&self)?,
                amount_minor: self.amount_minor,
                currency: self.currency.unwrap_or_default(),
            },
            "void" => PaymentOperation::Void {
                transaction_id: transaction_id(&self)?,
            },
            "get_status" => PaymentOperation::GetStatus {
                transaction_id: transaction_id(&self)?,
            },
            other => return Err(format!("unknown operation: {other}")),
        };

        Ok((provider, operation))
    }
}

pub async fn process<S, T, R, D>(
    State(state): State<Arc<PaymentsState<S, T, R, D>>>,
    Path(tenant_id): Path<Uuid>,
    Json(request): Json<ProcessPaymentRequest>,
) -> impl IntoResponse
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
    T: TransactionRepository + Send + Sync + 'static,
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    let (provider, operation) = match request.into_operation() {
        Ok(parsed) => parsed,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };
    let is_charge = matches!(operation, PaymentOperation::Charge(_));

    let result = state.payments.process(tenant_id, provider, operation).await;

    if is_charge && result.success {
        let event = json!({
            "transaction_id": result.transaction_id,
            "provider": result.provider,
            "amount_minor": result.amount_minor,
            "currency": result.currency,
            "status": result.status,
        });
        // Subscriber outcomes are audited per delivery; the payment
        // response does not wait on their verdicts beyond the fan-out
        // itself and never fails because of them.
        if let Err(err) = state
            .dispatcher
            .dispatch(tenant_id, "payment.received", event)
            .await
        {
            error!(%tenant_id, dispatch_error = ?err, "payments: payment.received dispatch failed");
        }
    }

    Json(result).into_response()
}

#[derive(Debug, Deserialize)]
pub struct TransactionListQuery {
    pub limit: Option<i64>,
}

pub async fn list_transactions<S, T, R, D>(
    State(state): State<Arc<PaymentsState<S, T, R, D>>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<TransactionListQuery>,
) -> impl IntoResponse
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
    T: TransactionRepository + Send + Sync + 'static,
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TRANSACTION_LIMIT)
        .clamp(1, 1000);

    match state.payments.list_transactions(tenant_id, limit).await {
        Ok(transactions) => Json(
            transactions
                .into_iter()
                .map(TransactionDto::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => {
            error!(%tenant_id, db_error = ?err, "payments: failed to list transactions");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request(operation: &str) -> ProcessPaymentRequest {
        ProcessPaymentRequest {
            operation: operation.to_string(),
            provider: None,
            amount_minor: Some(1999),
            currency: Some("USD".to_string()),
            customer_email: None,
            source: Some("tok_visa".to_string()),
            description: None,
            transaction_id: Some("pi_1".to_string()),
        }
    }

    #[test]
    fn charge_request_parses() {
        let (provider, operation) = base_request("charge").into_operation().unwrap();
        assert!(provider.is_none());
        assert!(matches!(operation, PaymentOperation::Charge(ref r) if r.amount_minor == 1999));
    }

    #[test]
    fn charge_rejects_missing_amount() {
        let mut request = base_request("charge");
        request.amount_minor = None;
        assert!(request.into_operation().is_err());
    }

    #[test]
    fn refund_without_amount_is_a_full_refund() {
        let mut request = base_request("refund");
        request.amount_minor = None;
        let (_, operation) = request.into_operation().unwrap();
        assert!(matches!(
            operation,
            PaymentOperation::Refund { amount_minor: None, .. }
        ));
    }

    #[test]
    fn void_requires_transaction_id() {
        let mut request = base_request("void");
        request.transaction_id = None;
        assert!(request.into_operation().is_err());
    }

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(base_request("teleport").into_operation().is_err());
    }
}
