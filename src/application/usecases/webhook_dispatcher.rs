use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::webhook_deliveries::NewWebhookDeliveryEntity;
use crate::domain::entities::webhook_registrations::{
    NewWebhookRegistrationEntity, WebhookRegistrationEntity,
};
use crate::domain::repositories::webhook_deliveries::{AttemptOutcome, WebhookDeliveryRepository};
use crate::domain::repositories::webhook_registrations::WebhookRegistrationRepository;
use crate::domain::value_objects::webhooks::{
    DeliveryResult, RegisterWebhookDto, TEST_EVENT, WebhookDeliveryDto, WebhookRegistrationDto,
};

type HmacSha256 = Hmac<Sha256>;

const RESPONSE_EXCERPT_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook registration not found")]
    NotFound,
    #[error("invalid webhook registration: {0}")]
    InvalidRegistration(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            WebhookError::NotFound => StatusCode::NOT_FOUND,
            WebhookError::InvalidRegistration(_) => StatusCode::BAD_REQUEST,
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `sha256=<hex>` HMAC over the exact payload bytes that go on the wire.
pub(crate) fn sign_payload(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts any key length, new_from_slice cannot fail.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).unwrap_or_else(|_| unreachable!());
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// One HTTP attempt against one registration. Infallible by construction:
/// every failure mode is folded into the returned outcome so the caller
/// records it instead of propagating it.
pub(crate) async fn deliver_once(
    http: &reqwest::Client,
    registration: &WebhookRegistrationEntity,
    delivery_id: Uuid,
    event_type: &str,
    payload: &str,
    attempt_number: i32,
) -> AttemptOutcome {
    let mut request = http
        .post(&registration.url)
        .header("Content-Type", "application/json")
        .header("X-Webhook-Event", event_type)
        .header("X-Webhook-Timestamp", Utc::now().to_rfc3339())
        .header("X-Webhook-ID", delivery_id.to_string());

    if let Some(secret) = &registration.secret {
        request = request.header("X-Webhook-Signature", sign_payload(secret, payload.as_bytes()));
    }
    if attempt_number > 1 {
        request = request.header("X-Webhook-Retry", (attempt_number - 1).to_string());
    }
    if let Some(headers) = registration.custom_headers.as_object() {
        for (name, value) in headers {
            if let Some(value) = value.as_str() {
                request = request.header(name, value);
            }
        }
    }

    match request.body(payload.to_string()).send().await {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let excerpt = body.chars().take(RESPONSE_EXCERPT_CHARS).collect::<String>();
            let succeeded = status.is_success();

            AttemptOutcome {
                status_code: Some(status.as_u16() as i32),
                response_excerpt: (!excerpt.is_empty()).then_some(excerpt),
                error: (!succeeded).then(|| format!("endpoint returned {status}")),
                delivered_at: succeeded.then(Utc::now),
            }
        }
        Err(err) => AttemptOutcome {
            status_code: None,
            response_excerpt: None,
            error: Some(err.without_url().to_string()),
            delivered_at: None,
        },
    }
}

/// Outbound side of the webhook subsystem: registrations, audited
/// deliveries, and the fan-out itself. One `WebhookDelivery` row exists
/// per subscriber per event before `dispatch` returns, whatever the
/// endpoints did.
pub struct WebhookDispatcherUseCase<R, D>
where
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    registration_repo: Arc<R>,
    delivery_repo: Arc<D>,
    http: reqwest::Client,
}

impl<R, D> WebhookDispatcherUseCase<R, D>
where
    R: WebhookRegistrationRepository + Send + Sync + 'static,
    D: WebhookDeliveryRepository + Send + Sync + 'static,
{
    pub fn new(
        registration_repo: Arc<R>,
        delivery_repo: Arc<D>,
        delivery_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(delivery_timeout)
            .build()
            .context("failed to build webhook delivery client")?;

        Ok(Self {
            registration_repo,
            delivery_repo,
            http,
        })
    }

    pub async fn register(
        &self,
        tenant_id: Uuid,
        dto: RegisterWebhookDto,
    ) -> Result<Uuid, WebhookError> {
        let parsed = url::Url::parse(&dto.url)
            .map_err(|_| WebhookError::InvalidRegistration("url is not parseable".to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(WebhookError::InvalidRegistration(
                "url must be http or https".to_string(),
            ));
        }
        if dto.events.is_empty() {
            return Err(WebhookError::InvalidRegistration(
                "at least one event (or \"*\") is required".to_string(),
            ));
        }
        if !dto.custom_headers.is_null() && !dto.custom_headers.is_object() {
            return Err(WebhookError::InvalidRegistration(
                "custom_headers must be an object".to_string(),
            ));
        }

        let webhook_id = self
            .registration_repo
            .create(NewWebhookRegistrationEntity {
                tenant_id,
                url: dto.url,
                secret: dto.secret,
                events: dto.events,
                custom_headers: if dto.custom_headers.is_null() {
                    serde_json::json!({})
                } else {
                    dto.custom_headers
                },
                is_active: true,
            })
            .await
            .map_err(WebhookError::Internal)?;

        info!(%tenant_id, %webhook_id, "webhooks: registration created");
        Ok(webhook_id)
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<WebhookRegistrationDto>> {
        let registrations = self.registration_repo.list_by_tenant(tenant_id).await?;
        Ok(registrations.into_iter().map(registration_dto).collect())
    }

    pub async fn delete(&self, tenant_id: Uuid, webhook_id: Uuid) -> Result<(), WebhookError> {
        let removed = self
            .registration_repo
            .delete(tenant_id, webhook_id)
            .await
            .map_err(WebhookError::Internal)?;
        if !removed {
            return Err(WebhookError::NotFound);
        }
        info!(%tenant_id, %webhook_id, "webhooks: registration removed");
        Ok(())
    }

    pub async fn list_deliveries(
        &self,
        tenant_id: Uuid,
        webhook_id: Uuid,
        limit: i64,
    ) -> Result<Vec<WebhookDeliveryDto>, WebhookError> {
        self.owned_registration(tenant_id, webhook_id).await?;

        let deliveries = self
            .delivery_repo
            .list_by_webhook(webhook_id, limit)
            .await
            .map_err(WebhookError::Internal)?;
        Ok(deliveries
            .into_iter()
            .map(|delivery| WebhookDeliveryDto {
                id: delivery.id,
                event_type: delivery.event_type,
                status_code: delivery.status_code,
                response_excerpt: delivery.response_excerpt,
                error: delivery.error,
                attempts: delivery.attempts,
                delivered_at: delivery.delivered_at,
                created_at: delivery.created_at,
            })
            .collect())
    }

    /// Fans one tenant-domain event out to every subscribed registration.
    /// Each subscriber is attempted independently; a dead endpoint in the
    /// set never suppresses delivery to the others.
    pub async fn dispatch(
        &self,
        tenant_id: Uuid,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<Vec<DeliveryResult>> {
        let subscribers = self
            .registration_repo
            .list_subscribed(tenant_id, event_type)
            .await?;
        if subscribers.is_empty() {
            info!(%tenant_id, event_type, "webhooks: no subscribers");
            return Ok(Vec::new());
        }

        // Canonical payload, serialized once and shared verbatim by every
        // subscriber (and by any later retries of these deliveries).
        let payload = serde_json::to_string(&serde_json::json!({
            "event": event_type,
            "timestamp": Utc::now().to_rfc3339(),
            "tenant_id": tenant_id,
            "data": data,
        }))
        .context("failed to serialize webhook payload")?;

        let mut set = JoinSet::new();
        for registration in subscribers {
            let registration_repo = Arc::clone(&self.registration_repo);
            let delivery_repo = Arc::clone(&self.delivery_repo);
            let http = self.http.clone();
            let event_type = event_type.to_string();
            let payload = payload.clone();

            set.spawn(async move {
                attempt_and_record(
                    &http,
                    registration_repo.as_ref(),
                    delivery_repo.as_ref(),
                    &registration,
                    &event_type,
                    &payload,
                )
                .await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => error!(join_error = ?err, "webhooks: delivery task panicked"),
            }
        }

        let delivered = results.iter().filter(|r| r.success).count();
        info!(
            %tenant_id,
            event_type,
            subscriber_count = results.len(),
            delivered,
            "webhooks: dispatch complete"
        );
        Ok(results)
    }

    /// One synthetic `test.ping` delivery to a single registration. Goes
    /// through the normal recording path but is never retried.
    pub async fn test(
        &self,
        tenant_id: Uuid,
        webhook_id: Uuid,
    ) -> Result<DeliveryResult, WebhookError> {
        let registration = self.owned_registration(tenant_id, webhook_id).await?;

        let payload = serde_json::to_string(&serde_json::json!({
            "event": TEST_EVENT,
            "timestamp": Utc::now().to_rfc3339(),
            "tenant_id": tenant_id,
            "data": {},
        }))
        .context("failed to serialize test payload")
        .map_err(WebhookError::Internal)?;

        Ok(attempt_and_record(
            &self.http,
            self.registration_repo.as_ref(),
            self.delivery_repo.as_ref(),
            &registration,
            TEST_EVENT,
            &payload,
        )
        .await)
    }

    async fn owned_registration(
        &self,
        tenant_id: Uuid,
        webhook_id: Uuid,
    ) -> Result<WebhookRegistrationEntity, WebhookError> {
        let registration = self
            .registration_repo
            .find_by_id(webhook_id)
            .await
            .map_err(WebhookError::Internal)?
            .ok_or(WebhookError::NotFound)?;
        if registration.tenant_id != tenant_id {
            // Cross-tenant lookups read as missing rows.
            return Err(WebhookError::NotFound);
        }
        Ok(registration)
    }
}

/// Records the delivery row, makes the first attempt, and applies the
/// outcome to both stores. Persistence failures degrade to log lines so
/// the remaining subscribers still get their attempt.
async fn attempt_and_record<R, D>(
    http: &reqwest::Client,
    registration_repo: &R,
    delivery_repo: &D,
    registration: &WebhookRegistrationEntity,
    event_type: &str,
    payload: &str,
) -> DeliveryResult
where
    R: WebhookRegistrationRepository + Send + Sync,
    D: WebhookDeliveryRepository + Send + Sync,
{
    let delivery_id = Uuid::new_v4();

    // The audit row exists before the first byte leaves the process.
    if let Err(err) = delivery_repo
        .create(NewWebhookDeliveryEntity {
            id: delivery_id,
            webhook_id: registration.id,
            event_type: event_type.to_string(),
            payload: payload.to_string(),
            status_code: None,
            response_excerpt: None,
            error: None,
            attempts: 0,
            delivered_at: None,
        })
        .await
    {
        error!(
            webhook_id = %registration.id,
            db_error = ?err,
            "webhooks: failed to record delivery row, skipping endpoint"
        );
        return DeliveryResult {
            delivery_id,
            webhook_id: registration.id,
            url: registration.url.clone(),
            success: false,
            status_code: None,
            error: Some("delivery could not be recorded".to_string()),
        };
    }

    let outcome = deliver_once(http, registration, delivery_id, event_type, payload, 1).await;
    let success = outcome.delivered_at.is_some();
    let status_code = outcome.status_code;
    let attempt_error = outcome.error.clone();

    if let Err(err) = delivery_repo.record_attempt(delivery_id, outcome).await {
        error!(%delivery_id, db_error = ?err, "webhooks: failed to record attempt outcome");
    }
    if let Err(err) = registration_repo
        .record_delivery_outcome(registration.id, success)
        .await
    {
        error!(webhook_id = %registration.id, db_error = ?err, "webhooks: failed to update fail count");
    }

    if !success {
        warn!(
            webhook_id = %registration.id,
            url = %registration.url,
            event_type,
            status_code,
            error = attempt_error.as_deref().unwrap_or("none"),
            "webhooks: delivery attempt failed"
        );
    }

    DeliveryResult {
        delivery_id,
        webhook_id: registration.id,
        url: registration.url.clone(),
        success,
        status_code,
        error: attempt_error,
    }
}

fn registration_dto(entity: WebhookRegistrationEntity) -> WebhookRegistrationDto {
    WebhookRegistrationDto {
        id: entity.id,
        url: entity.url,
        events: entity.events,
        is_active: entity.is_active,
        fail_count: entity.fail_count,
        last_triggered_at: entity.last_triggered_at,
        created_at: entity.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::webhook_deliveries::MockWebhookDeliveryRepository;
    use crate::domain::repositories::webhook_registrations::MockWebhookRegistrationRepository;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use std::net::SocketAddr;

    fn registration(url: &str, secret: Option<&str>) -> WebhookRegistrationEntity {
        WebhookRegistrationEntity {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            url: url.to_string(),
            secret: secret.map(str::to_string),
            events: vec!["*".to_string()],
            custom_headers: serde_json::json!({}),
            is_active: true,
            fail_count: 0,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }

    async fn serve(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[test]
    fn signature_matches_independently_computed_hmac() {
        let payload = br#"{"event":"payment.received","timestamp":1700000000}"#;
        let signature = sign_payload("s3cret", payload);

        let mut mac = HmacSha256::new_from_slice(b"s3cret").unwrap();
        mac.update(payload);
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert_eq!(signature, expected);
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);
    }

    #[test]
    fn different_secrets_disagree() {
        let payload = b"same payload";
        assert_ne!(sign_payload("alpha", payload), sign_payload("beta", payload));
    }

    #[tokio::test]
    async fn delivery_sends_signature_and_event_headers() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<(axum::http::HeaderMap, String)>(1);
        let addr = serve(Router::new().route(
            "/hook",
            post(move |headers: axum::http::HeaderMap, body: String| {
                let tx = tx.clone();
                async move {
                    tx.send((headers, body)).await.unwrap();
                    StatusCode::OK
                }
            }),
        ))
        .await;

        let registration = registration(&format!("http://{addr}/hook"), Some("s3cret"));
        let http = reqwest::Client::new();
        let payload = r#"{"event":"payment.received","data":{}}"#;

        let outcome =
            deliver_once(&http, &registration, Uuid::new_v4(), "payment.received", payload, 1)
                .await;
        assert_eq!(outcome.status_code, Some(200));
        assert!(outcome.delivered_at.is_some());

        let (headers, received_body) = rx.recv().await.unwrap();
        assert_eq!(received_body, payload);
        assert_eq!(
            headers.get("x-webhook-event").unwrap().to_str().unwrap(),
            "payment.received"
        );
        assert_eq!(
            headers.get("x-webhook-signature").unwrap().to_str().unwrap(),
            sign_payload("s3cret", payload.as_bytes())
        );
        assert!(headers.get("x-webhook-retry").is_none());
    }

    #[tokio::test]
    async fn retry_attempts_carry_the_retry_header() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<axum::http::HeaderMap>(1);
        let addr = serve(Router::new().route(
            "/hook",
            post(move |headers: axum::http::HeaderMap| {
                let tx = tx.clone();
                async move {
                    tx.send(headers).await.unwrap();
                    StatusCode::OK
                }
            }),
        ))
        .await;

        let registration = registration(&format!("http://{addr}/hook"), None);
        let http = reqwest::Client::new();

        deliver_once(&http, &registration, Uuid::new_v4(), "test.ping", "{}", 3).await;

        let headers = rx.recv().await.unwrap();
        assert_eq!(headers.get("x-webhook-retry").unwrap().to_str().unwrap(), "2");
        assert!(headers.get("x-webhook-signature").is_none());
    }

    #[tokio::test]
    async fn fan_out_isolates_a_failing_subscriber() {
        let ok_addr = serve(Router::new().route("/hook", post(|| async { StatusCode::OK }))).await;
        let bad_addr = serve(Router::new().route(
            "/hook",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        ))
        .await;

        let tenant_id = Uuid::new_v4();
        let first_ok = registration(&format!("http://{ok_addr}/hook"), None);
        let second_ok = registration(&format!("http://{ok_addr}/hook"), None);
        let bad_hook = registration(&format!("http://{bad_addr}/hook"), None);
        let ok_ids = [first_ok.id, second_ok.id];
        let bad_id = bad_hook.id;

        let mut registration_repo = MockWebhookRegistrationRepository::new();
        let subscribers = vec![first_ok, second_ok, bad_hook];
        registration_repo
            .expect_list_subscribed()
            .returning(move |_, _| Ok(subscribers.clone()));
        registration_repo
            .expect_record_delivery_outcome()
            .times(3)
            .withf(move |webhook_id, success| {
                (ok_ids.contains(webhook_id) && *success) || (*webhook_id == bad_id && !*success)
            })
            .returning(|_, _| Ok(()));

        let mut delivery_repo = MockWebhookDeliveryRepository::new();
        delivery_repo
            .expect_create()
            .times(3)
            .returning(|delivery| Ok(delivery.id));
        delivery_repo
            .expect_record_attempt()
            .times(3)
            .returning(|_, _| Ok(()));

        let dispatcher = WebhookDispatcherUseCase::new(
            Arc::new(registration_repo),
            Arc::new(delivery_repo),
            Duration::from_secs(5),
        )
        .unwrap();

        let results = dispatcher
            .dispatch(tenant_id, "payment.received", serde_json::json!({"amount_minor": 1999}))
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        for ok_id in ok_ids {
            let ok_result = results.iter().find(|r| r.webhook_id == ok_id).unwrap();
            assert!(ok_result.success);
        }
        let bad_result = results.iter().find(|r| r.webhook_id == bad_id).unwrap();
        assert!(!bad_result.success);
        assert_eq!(bad_result.status_code, Some(500));
    }

    #[tokio::test]
    async fn payment_received_reaches_the_subscriber_signed_and_recorded() {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<(axum::http::HeaderMap, String)>(1);
        let addr = serve(Router::new().route(
            "/hook",
            post(move |headers: axum::http::HeaderMap, body: String| {
                let tx = tx.clone();
                async move {
                    tx.send((headers, body)).await.unwrap();
                    StatusCode::OK
                }
            }),
        ))
        .await;

        let hook = registration(&format!("http://{addr}/hook"), Some("s3cret"));
        let webhook_id = hook.id;
        let tenant_id = hook.tenant_id;

        let mut registration_repo = MockWebhookRegistrationRepository::new();
        let subscribers = vec![hook];
        registration_repo
            .expect_list_subscribed()
            .withf(move |id, event| *id == tenant_id && event == "payment.received")
            .returning(move |_, _| Ok(subscribers.clone()));
        registration_repo
            .expect_record_delivery_outcome()
            .withf(move |id, success| *id == webhook_id && *success)
            .returning(|_, _| Ok(()));

        let mut delivery_repo = MockWebhookDeliveryRepository::new();
        delivery_repo
            .expect_create()
            .times(1)
            .withf(|row| row.event_type == "payment.received" && row.attempts == 0)
            .returning(|row| Ok(row.id));
        delivery_repo
            .expect_record_attempt()
            .times(1)
            .withf(|_, outcome| outcome.delivered_at.is_some() && outcome.status_code == Some(200))
            .returning(|_, _| Ok(()));

        let dispatcher = WebhookDispatcherUseCase::new(
            Arc::new(registration_repo),
            Arc::new(delivery_repo),
            Duration::from_secs(5),
        )
        .unwrap();

        let results = dispatcher
            .dispatch(tenant_id, "payment.received", serde_json::json!({"amount": 500}))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);

        let (headers, body) = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["event"], "payment.received");
        assert_eq!(parsed["data"]["amount"], 500);
        assert_eq!(parsed["tenant_id"], tenant_id.to_string());

        let signature = headers.get("x-webhook-signature").unwrap().to_str().unwrap();
        assert_eq!(signature, sign_payload("s3cret", body.as_bytes()));
    }

    #[tokio::test]
    async fn register_rejects_non_http_urls() {
        let dispatcher = WebhookDispatcherUseCase::new(
            Arc::new(MockWebhookRegistrationRepository::new()),
            Arc::new(MockWebhookDeliveryRepository::new()),
            Duration::from_secs(5),
        )
        .unwrap();

        let result = dispatcher
            .register(
                Uuid::new_v4(),
                RegisterWebhookDto {
                    url: "ftp://example.com/hook".to_string(),
                    secret: None,
                    events: vec!["*".to_string()],
                    custom_headers: serde_json::Value::Null,
                },
            )
            .await;
        assert!(matches!(result, Err(WebhookError::InvalidRegistration(_))));
    }

    #[tokio::test]
    async fn cross_tenant_lookup_reads_as_not_found() {
        let foreign = registration("https://example.com/hook", None);
        let mut registration_repo = MockWebhookRegistrationRepository::new();
        let webhook_id = foreign.id;
        registration_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(foreign.clone())));

        let dispatcher = WebhookDispatcherUseCase::new(
            Arc::new(registration_repo),
            Arc::new(MockWebhookDeliveryRepository::new()),
            Duration::from_secs(5),
        )
        .unwrap();

        let result = dispatcher
            .list_deliveries(Uuid::new_v4(), webhook_id, 50)
            .await;
        assert!(matches!(result, Err(WebhookError::NotFound)));
    }
}
