use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::application::usecases::webhook_dispatcher::WebhookDispatcherUseCase;
use crate::config::config_model::DotEnvyConfig;
use crate::domain::repositories::webhook_deliveries::WebhookDeliveryRepository;
use crate::domain::repositories::webhook_registrations::WebhookRegistrationRepository;
use crate::domain::value_objects::webhooks::RegisterWebhookDto;
use crate::infrastructure::axum_http::error_responses::error_response;
use crate::infrastructure::postgres::postgres_connection::PgPoolSquad;
use crate::infrastructure::postgres::repositories::webhook_deliveries::WebhookDeliveryPostgres;
use crate::infrastructure::postgres::repositories::webhook_registrations::WebhookRegistrationPostgres;

const DEFAULT_DELIVERY_LIMIT: i64 = 50;

pub fn routes(db_pool: Arc<PgPoolSquad>, config: &DotEnvyConfig) -> Result<Router> {
    let dispatcher = WebhookDispatcherUseCase::new(
        Arc::new(WebhookRegistrationPostgres::new(Arc::clone(&db_pool))),
        Arc::new(WebhookDeliveryPostgres::new(db_pool)),
        Duration::from_secs(config.webhooks.delivery_timeout_seconds),
    )?;

    Ok(Router::new()
        .route("/:tenant_id", get(list).post(register))
        .route("/:tenant_id/dispatch", post(dispatch))
        .route("/:tenant_id/:webhook_id", delete(remove))
        .route("/:tenant_id/:webhook_id/test", post(test_delivery))
        .route("/:tenant_id/:webhook_id/deliveries", get(list_deliveries))
        .with_state(Arc::new(dispatcher)))
}

pub async fn list<R, D>(
    State(dispatcher): State<Arc<WebhookDispatcherUseCase<R, D>>>,
    Path(tenant_id): Path<Uuid>,
) -> impl IntoResponse
where
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    match dispatcher.list(tenant_id).await {
        Ok(registrations) => Json(registrations).into_response(),
        Err(err) => {
            error!(%tenant_id, db_error = ?err, "webhooks: failed to list registrations");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "")
        }
    }
}

pub async fn register<R, D>(
    State(dispatcher): State<Arc<WebhookDispatcherUseCase<R, D>>>,
    Path(tenant_id): Path<Uuid>,
    Json(dto): Json<RegisterWebhookDto>,
) -> impl IntoResponse
where
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    match dispatcher.register(tenant_id, dto).await {
        Ok(webhook_id) => (StatusCode::CREATED, Json(json!({ "id": webhook_id }))).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn remove<R, D>(
    State(dispatcher): State<Arc<WebhookDispatcherUseCase<R, D>>>,
    Path((tenant_id, webhook_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse
where
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    match dispatcher.delete(tenant_id, webhook_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

pub async fn test_delivery<R, D>(
    State(dispatcher): State<Arc<WebhookDispatcherUseCase<R, D>>>,
    Path((tenant_id, webhook_id)): Path<(Uuid, Uuid)>,
) -> impl IntoResponse
where
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    match dispatcher.test(tenant_id, webhook_id).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeliveryListQuery {
    pub limit: Option<i64>,
}

pub async fn list_deliveries<R, D>(
    State(dispatcher): State<Arc<WebhookDispatcherUseCase<R, D>>>,
    Path((tenant_id, webhook_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<DeliveryListQuery>,
) -> impl IntoResponse
where
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    let limit = query.limit.unwrap_or(DEFAULT_DELIVERY_LIMIT).clamp(1, 500);

    match dispatcher.list_deliveries(tenant_id, webhook_id, limit).await {
        Ok(deliveries) => Json(deliveries).into_response(),
        Err(err) => error_response(err.status_code(), err.to_string()),
    }
}

/// The in-process entry point for the rest of the platform: any tenant
/// domain event can be fanned out here.
#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

pub async fn dispatch<R, D>(
    State(dispatcher): State<Arc<WebhookDispatcherUseCase<R, D>>>,
    Path(tenant_id): Path<Uuid>,
    Json(request): Json<DispatchRequest>,
) -> impl IntoResponse
where
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    if request.event.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "event is required");
    }

    match dispatcher.dispatch(tenant_id, &request.event, request.data).await {
        Ok(results) => Json(results).into_response(),
        Err(err) => {
            error!(%tenant_id, event = %request.event, dispatch_error = ?err, "webhooks: dispatch failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "")
        }
    }
}
