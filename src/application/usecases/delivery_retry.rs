use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::application::usecases::webhook_dispatcher::deliver_once;
use crate::config::config_model::DotEnvyConfig;
use crate::domain::repositories::webhook_deliveries::WebhookDeliveryRepository;
use crate::domain::repositories::webhook_registrations::WebhookRegistrationRepository;
use crate::domain::value_objects::webhooks::TEST_EVENT;
use crate::infrastructure::postgres::postgres_connection::PgPoolSquad;
use crate::infrastructure::postgres::repositories::webhook_deliveries::WebhookDeliveryPostgres;
use crate::infrastructure::postgres::repositories::webhook_registrations::WebhookRegistrationPostgres;

/// Retry policy for undelivered webhooks. A delivery leaves the sweep's
/// reach once it succeeds, exhausts `max_retries` attempts, or ages past
/// the recency window; exhausted rows stay queryable in the audit trail.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: i32,
    pub window_hours: i64,
    pub batch_size: i64,
}

impl RetryPolicy {
    fn from_config(config: &DotEnvyConfig) -> Self {
        Self {
            max_retries: config.webhooks.max_retries,
            window_hours: config.webhooks.retry_window_hours,
            batch_size: config.webhooks.retry_batch_size,
        }
    }
}

/// Periodic sweep over undelivered webhook deliveries, spawned from main
/// next to the HTTP server. Never returns under normal operation; sweep
/// errors are logged and the loop keeps its cadence.
pub async fn run_delivery_retry_loop(
    config: Arc<DotEnvyConfig>,
    db_pool: Arc<PgPoolSquad>,
) -> Result<()> {
    let registration_repo = WebhookRegistrationPostgres::new(Arc::clone(&db_pool));
    let delivery_repo = WebhookDeliveryPostgres::new(db_pool);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.webhooks.delivery_timeout_seconds))
        .build()
        .context("failed to build retry delivery client")?;

    let policy = RetryPolicy::from_config(&config);
    let interval = Duration::from_secs(config.webhooks.retry_interval_seconds);

    info!(
        max_retries = policy.max_retries,
        window_hours = policy.window_hours,
        batch_size = policy.batch_size,
        interval_seconds = interval.as_secs(),
        "starting webhook delivery retry loop"
    );

    loop {
        tokio::time::sleep(interval).await;

        match run_sweep_once(&registration_repo, &delivery_repo, &http, policy).await {
            Ok(0) => {}
            Ok(retried) => info!(retried, "webhook retry sweep completed"),
            Err(err) => error!(sweep_error = ?err, "webhook retry sweep failed"),
        }
    }
}

/// One bounded pass. Returns how many deliveries were attempted.
pub async fn run_sweep_once<R, D>(
    registration_repo: &R,
    delivery_repo: &D,
    http: &reqwest::Client,
    policy: RetryPolicy,
) -> Result<usize>
where
    R: WebhookRegistrationRepository + Send + Sync,
    D: WebhookDeliveryRepository + Send + Sync,
{
    let cutoff = Utc::now() - chrono::Duration::hours(policy.window_hours);
    let pending = delivery_repo
        .find_retryable(policy.max_retries, cutoff, policy.batch_size)
        .await?;

    let mut retried = 0;
    for delivery in pending {
        if delivery.event_type == TEST_EVENT {
            // Manual endpoint tests get exactly one attempt.
            continue;
        }

        let registration = match registration_repo.find_by_id(delivery.webhook_id).await {
            Ok(Some(registration)) if registration.is_active => registration,
            Ok(_) => {
                // Registration deleted or deactivated since the delivery
                // was recorded; nothing to send to.
                continue;
            }
            Err(err) => {
                warn!(
                    delivery_id = %delivery.id,
                    webhook_id = %delivery.webhook_id,
                    db_error = ?err,
                    "retry sweep: registration lookup failed"
                );
                continue;
            }
        };

        let attempt_number = delivery.attempts + 1;
        let outcome = deliver_once(
            http,
            &registration,
            delivery.id,
            &delivery.event_type,
            &delivery.payload,
            attempt_number,
        )
        .await;
        let success = outcome.delivered_at.is_some();

        // The attempt counter and the outcome move in the same update.
        if let Err(err) = delivery_repo.record_attempt(delivery.id, outcome).await {
            error!(delivery_id = %delivery.id, db_error = ?err, "retry sweep: failed to record attempt");
            continue;
        }
        if let Err(err) = registration_repo
            .record_delivery_outcome(registration.id, success)
            .await
        {
            error!(webhook_id = %registration.id, db_error = ?err, "retry sweep: failed to update fail count");
        }

        if success {
            info!(
                delivery_id = %delivery.id,
                webhook_id = %registration.id,
                attempt = attempt_number,
                "retry sweep: delivery succeeded"
            );
        } else if attempt_number >= policy.max_retries {
            warn!(
                delivery_id = %delivery.id,
                webhook_id = %registration.id,
                attempts = attempt_number,
                "retry sweep: delivery exhausted its retries"
            );
        }
        retried += 1;
    }

    Ok(retried)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::webhook_deliveries::WebhookDeliveryEntity;
    use crate::domain::entities::webhook_registrations::WebhookRegistrationEntity;
    use crate::domain::repositories::webhook_deliveries::MockWebhookDeliveryRepository;
    use crate::domain::repositories::webhook_registrations::MockWebhookRegistrationRepository;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use uuid::Uuid;

    const POLICY: RetryPolicy = RetryPolicy {
        max_retries: 3,
        window_hours: 24,
        batch_size: 100,
    };

    fn pending_delivery(webhook_id: Uuid, attempts: i32) -> WebhookDeliveryEntity {
        WebhookDeliveryEntity {
            id: Uuid::new_v4(),
            webhook_id,
            event_type: "payment.received".to_string(),
            payload: r#"{"event":"payment.received"}"#.to_string(),
            status_code: Some(500),
            response_excerpt: None,
            error: Some("endpoint returned 500".to_string()),
            attempts,
            delivered_at: None,
            created_at: Utc::now(),
        }
    }

    fn active_registration(id: Uuid, url: &str) -> WebhookRegistrationEntity {
        WebhookRegistrationEntity {
            id,
            tenant_id: Uuid::new_v4(),
            url: url.to_string(),
            secret: None,
            events: vec!["*".to_string()],
            custom_headers: serde_json::json!({}),
            is_active: true,
            fail_count: 1,
            last_triggered_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    async fn serve_ok() -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = Router::new().route("/hook", post(|| async { StatusCode::OK }));
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn sweep_redelivers_and_records_the_attempt() {
        let addr = serve_ok().await;
        let webhook_id = Uuid::new_v4();
        let delivery = pending_delivery(webhook_id, 1);
        let delivery_id = delivery.id;

        let mut delivery_repo = MockWebhookDeliveryRepository::new();
        delivery_repo
            .expect_find_retryable()
            .withf(|max_retries, _, batch_size| *max_retries == 3 && *batch_size == 100)
            .returning(move |_, _, _| Ok(vec![delivery.clone()]));
        delivery_repo
            .expect_record_attempt()
            .times(1)
            .withf(move |id, outcome| {
                *id == delivery_id
                    && outcome.status_code == Some(200)
                    && outcome.delivered_at.is_some()
            })
            .returning(|_, _| Ok(()));

        let registration = active_registration(webhook_id, &format!("http://{addr}/hook"));
        let mut registration_repo = MockWebhookRegistrationRepository::new();
        registration_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(registration.clone())));
        registration_repo
            .expect_record_delivery_outcome()
            .times(1)
            .withf(move |id, success| *id == webhook_id && *success)
            .returning(|_, _| Ok(()));

        let retried = run_sweep_once(
            &registration_repo,
            &delivery_repo,
            &reqwest::Client::new(),
            POLICY,
        )
        .await
        .unwrap();
        assert_eq!(retried, 1);
    }

    #[tokio::test]
    async fn inactive_registration_is_skipped_without_an_attempt() {
        let webhook_id = Uuid::new_v4();
        let mut delivery_repo = MockWebhookDeliveryRepository::new();
        let delivery = pending_delivery(webhook_id, 1);
        delivery_repo
            .expect_find_retryable()
            .returning(move |_, _, _| Ok(vec![delivery.clone()]));
        delivery_repo.expect_record_attempt().never();

        let mut inactive = active_registration(webhook_id, "http://127.0.0.1:1/hook");
        inactive.is_active = false;
        let mut registration_repo = MockWebhookRegistrationRepository::new();
        registration_repo
            .expect_find_by_id()
            .returning(move |_| Ok(Some(inactive.clone())));
        registration_repo.expect_record_delivery_outcome().never();

        let retried = run_sweep_once(
            &registration_repo,
            &delivery_repo,
            &reqwest::Client::new(),
            POLICY,
        )
        .await
        .unwrap();
        assert_eq!(retried, 0);
    }

    #[tokio::test]
    async fn manual_test_delivery_is_never_reattempted() {
        let webhook_id = Uuid::new_v4();
        let mut ping = pending_delivery(webhook_id, 1);
        ping.event_type = TEST_EVENT.to_string();
        ping.payload = r#"{"event":"test.ping"}"#.to_string();

        let mut delivery_repo = MockWebhookDeliveryRepository::new();
        delivery_repo
            .expect_find_retryable()
            .returning(move |_, _, _| Ok(vec![ping.clone()]));
        delivery_repo.expect_record_attempt().never();

        let mut registration_repo = MockWebhookRegistrationRepository::new();
        registration_repo.expect_find_by_id().never();
        registration_repo.expect_record_delivery_outcome().never();

        let retried = run_sweep_once(
            &registration_repo,
            &delivery_repo,
            &reqwest::Client::new(),
            POLICY,
        )
        .await
        .unwrap();
        assert_eq!(retried, 0);
    }

    #[tokio::test]
    async fn empty_batch_is_a_quiet_pass() {
        let mut delivery_repo = MockWebhookDeliveryRepository::new();
        delivery_repo
            .expect_find_retryable()
            .returning(|_, _, _| Ok(Vec::new()));

        let retried = run_sweep_once(
            &MockWebhookRegistrationRepository::new(),
            &delivery_repo,
            &reqwest::Client::new(),
            POLICY,
        )
        .await
        .unwrap();
        assert_eq!(retried, 0);
    }
}
