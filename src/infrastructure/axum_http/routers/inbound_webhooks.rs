use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use uuid::Uuid;

use crate::application::usecases::inbound_webhook::InboundWebhookUseCase;
use crate::domain::repositories::payment_settings::PaymentSettingsRepository;
use crate::domain::repositories::transactions::TransactionRepository;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::infrastructure::axum_http::error_responses::error_response;
use crate::infrastructure::payment_gateways::AdapterRegistry;
use crate::infrastructure::postgres::postgres_connection::PgPoolSquad;
use crate::infrastructure::postgres::repositories::payment_settings::PaymentSettingsPostgres;
use crate::infrastructure::postgres::repositories::transactions::TransactionPostgres;

pub fn routes(db_pool: Arc<PgPoolSquad>, adapters: Arc<AdapterRegistry>) -> Router {
    let settings_repo = PaymentSettingsPostgres::new(Arc::clone(&db_pool));
    let transaction_repo = TransactionPostgres::new(db_pool);
    let usecase = InboundWebhookUseCase::new(
        Arc::new(settings_repo),
        Arc::new(transaction_repo),
        adapters,
    );

    // Raw-body handlers: signature schemes run over the exact bytes the
    // provider sent, before any JSON decoding.
    Router::new()
        .route("/:provider/:tenant_id", post(receive))
        .with_state(Arc::new(usecase))
}

pub async fn receive<S, T>(
    State(usecase): State<Arc<InboundWebhookUseCase<S, T>>>,
    Path((provider, tenant_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
    T: TransactionRepository + Send + Sync + 'static,
{
    let Some(provider) = PaymentProvider::from_str(&provider) else {
        return error_response(StatusCode::NOT_FOUND, "unknown payment provider");
    };

    match usecase.receive(tenant_id, provider, &headers, &body).await {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
