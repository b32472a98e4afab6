use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::webhook_deliveries::{
    NewWebhookDeliveryEntity, WebhookDeliveryEntity,
};

/// Outcome of one HTTP attempt, recorded in the same update that
/// increments `attempts` so overlapping sweep passes cannot double-claim
/// a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub status_code: Option<i32>,
    pub response_excerpt: Option<String>,
    pub error: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
}

#[automock]
#[async_trait]
pub trait WebhookDeliveryRepository {
    async fn create(&self, delivery: NewWebhookDeliveryEntity) -> Result<Uuid>;

    /// Applies one attempt outcome: `attempts = attempts + 1`, outcome
    /// columns replaced, `delivered_at` set only when the outcome carries
    /// it (and never cleared once set).
    async fn record_attempt(&self, delivery_id: Uuid, outcome: AttemptOutcome) -> Result<()>;

    /// Undelivered rows still inside the retry policy: `delivered_at`
    /// unset, `attempts < max_retries`, created after `cutoff`. Bounded
    /// by `batch_size`, oldest first.
    async fn find_retryable(
        &self,
        max_retries: i32,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<Vec<WebhookDeliveryEntity>>;

    async fn list_by_webhook(
        &self,
        webhook_id: Uuid,
        limit: i64,
    ) -> Result<Vec<WebhookDeliveryEntity>>;
}
