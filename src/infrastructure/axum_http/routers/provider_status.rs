use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::error;
use uuid::Uuid;

use crate::application::usecases::provider_status::ProviderStatusUseCase;
use crate::config::config_model::DotEnvyConfig;
use crate::domain::repositories::payment_settings::PaymentSettingsRepository;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::infrastructure::axum_http::error_responses::error_response;
use crate::infrastructure::payment_gateways::AdapterRegistry;
use crate::infrastructure::postgres::postgres_connection::PgPoolSquad;
use crate::infrastructure::postgres::repositories::payment_settings::PaymentSettingsPostgres;

pub fn routes(
    db_pool: Arc<PgPoolSquad>,
    adapters: Arc<AdapterRegistry>,
    config: &DotEnvyConfig,
) -> Router {
    let usecase = ProviderStatusUseCase::new(
        Arc::new(PaymentSettingsPostgres::new(db_pool)),
        adapters,
        config.webhooks.public_base_url.clone(),
    );

    Router::new()
        .route("/:tenant_id/status", get(status))
        .route("/:tenant_id/:provider/test-connection", post(test_connection))
        .with_state(Arc::new(usecase))
}

pub async fn status<S>(
    State(usecase): State<Arc<ProviderStatusUseCase<S>>>,
    Path(tenant_id): Path<Uuid>,
) -> impl IntoResponse
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
{
    match usecase.status(tenant_id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => {
            error!(%tenant_id, db_error = ?err, "providers: failed to load status");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "")
        }
    }
}

pub async fn test_connection<S>(
    State(usecase): State<Arc<ProviderStatusUseCase<S>>>,
    Path((tenant_id, provider)): Path<(Uuid, String)>,
) -> impl IntoResponse
where
    S: PaymentSettingsRepository + Send + Sync + 'static,
{
    let Some(provider) = PaymentProvider::from_str(&provider) else {
        return error_response(StatusCode::NOT_FOUND, "unknown payment provider");
    };

    match usecase.test_connection(tenant_id, provider).await {
        Ok(check) => Json(check).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}
