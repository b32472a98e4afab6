use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::{ExpressionMethods, QueryDsl, RunQueryDsl, insert_into, update};
use uuid::Uuid;

use crate::domain::entities::webhook_deliveries::{
    NewWebhookDeliveryEntity, WebhookDeliveryEntity,
};
use crate::domain::repositories::webhook_deliveries::{AttemptOutcome, WebhookDeliveryRepository};
use crate::domain::value_objects::webhooks::TEST_EVENT;
use crate::infrastructure::postgres::{
    postgres_connection::PgPoolSquad, schema::webhook_deliveries,
};

pub struct WebhookDeliveryPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl WebhookDeliveryPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl WebhookDeliveryRepository for WebhookDeliveryPostgres {
    async fn create(&self, delivery: NewWebhookDeliveryEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let delivery_id = insert_into(webhook_deliveries::table)
            .values(&delivery)
            .returning(webhook_deliveries::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(delivery_id)
    }

    async fn record_attempt(&self, delivery_id: Uuid, outcome: AttemptOutcome) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // The attempts increment is part of this same UPDATE, which is
        // what keeps two sweep passes from double-claiming a delivery.
        // `delivered_at` is guarded by COALESCE semantics: once set it
        // stays set.
        update(
            webhook_deliveries::table
                .find(delivery_id)
                .filter(webhook_deliveries::delivered_at.is_null()),
        )
        .set((
            webhook_deliveries::attempts.eq(webhook_deliveries::attempts + 1),
            webhook_deliveries::status_code.eq(outcome.status_code),
            webhook_deliveries::response_excerpt.eq(outcome.response_excerpt),
            webhook_deliveries::error.eq(outcome.error),
            webhook_deliveries::delivered_at.eq(outcome.delivered_at),
        ))
        .execute(&mut conn)?;

        Ok(())
    }

    async fn find_retryable(
        &self,
        max_retries: i32,
        cutoff: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<Vec<WebhookDeliveryEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = webhook_deliveries::table
            .filter(webhook_deliveries::delivered_at.is_null())
            .filter(webhook_deliveries::attempts.lt(max_retries))
            .filter(webhook_deliveries::created_at.gt(cutoff))
            .filter(webhook_deliveries::event_type.ne(TEST_EVENT))
            .order(webhook_deliveries::created_at.asc())
            .limit(batch_size)
            .select(WebhookDeliveryEntity::as_select())
            .load::<WebhookDeliveryEntity>(&mut conn)?;

        Ok(results)
    }

    async fn list_by_webhook(
        &self,
        webhook_id: Uuid,
        limit: i64,
    ) -> Result<Vec<WebhookDeliveryEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = webhook_deliveries::table
            .filter(webhook_deliveries::webhook_id.eq(webhook_id))
            .order(webhook_deliveries::created_at.desc())
            .limit(limit)
            .select(WebhookDeliveryEntity::as_select())
            .load::<WebhookDeliveryEntity>(&mut conn)?;

        Ok(results)
    }
}
