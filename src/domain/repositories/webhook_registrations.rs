use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::webhook_registrations::{
    NewWebhookRegistrationEntity, WebhookRegistrationEntity,
};

#[automock]
#[async_trait]
pub trait WebhookRegistrationRepository {
    async fn create(&self, registration: NewWebhookRegistrationEntity) -> Result<Uuid>;

    async fn find_by_id(&self, webhook_id: Uuid) -> Result<Option<WebhookRegistrationEntity>>;

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<WebhookRegistrationEntity>>;

    /// Active registrations whose `events` set contains `event_type` or
    /// the `*` wildcard.
    async fn list_subscribed(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookRegistrationEntity>>;

    async fn delete(&self, tenant_id: Uuid, webhook_id: Uuid) -> Result<bool>;

    /// Updates delivery bookkeeping: success resets `fail_count` to 0,
    /// failure increments it; `last_triggered_at` is bumped either way.
    async fn record_delivery_outcome(&self, webhook_id: Uuid, success: bool) -> Result<()>;
}
