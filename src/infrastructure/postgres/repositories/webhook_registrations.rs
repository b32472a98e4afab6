use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::{
    BoolExpressionMethods, ExpressionMethods, PgArrayExpressionMethods, QueryDsl, RunQueryDsl,
    delete, insert_into, update,
};
use uuid::Uuid;

use crate::domain::entities::webhook_registrations::{
    NewWebhookRegistrationEntity, WebhookRegistrationEntity,
};
use crate::domain::repositories::webhook_registrations::WebhookRegistrationRepository;
use crate::infrastructure::postgres::{
    postgres_connection::PgPoolSquad, schema::webhook_registrations,
};

pub struct WebhookRegistrationPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl WebhookRegistrationPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl WebhookRegistrationRepository for WebhookRegistrationPostgres {
    async fn create(&self, registration: NewWebhookRegistrationEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let registration_id = insert_into(webhook_registrations::table)
            .values(&registration)
            .returning(webhook_registrations::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(registration_id)
    }

    async fn find_by_id(&self, webhook_id: Uuid) -> Result<Option<WebhookRegistrationEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = webhook_registrations::table
            .find(webhook_id)
            .select(WebhookRegistrationEntity::as_select())
            .first::<WebhookRegistrationEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<WebhookRegistrationEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = webhook_registrations::table
            .filter(webhook_registrations::tenant_id.eq(tenant_id))
            .order(webhook_registrations::created_at.desc())
            .select(WebhookRegistrationEntity::as_select())
            .load::<WebhookRegistrationEntity>(&mut conn)?;

        Ok(results)
    }

    async fn list_subscribed(
        &self,
        tenant_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<WebhookRegistrationEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = webhook_registrations::table
            .filter(webhook_registrations::tenant_id.eq(tenant_id))
            .filter(webhook_registrations::is_active.eq(true))
            .filter(
                webhook_registrations::events
                    .contains(vec![event_type.to_string()])
                    .or(webhook_registrations::events.contains(vec!["*".to_string()])),
            )
            .select(WebhookRegistrationEntity::as_select())
            .load::<WebhookRegistrationEntity>(&mut conn)?;

        Ok(results)
    }

    async fn delete(&self, tenant_id: Uuid, webhook_id: Uuid) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let deleted = delete(
            webhook_registrations::table
                .filter(webhook_registrations::id.eq(webhook_id))
                .filter(webhook_registrations::tenant_id.eq(tenant_id)),
        )
        .execute(&mut conn)?;

        Ok(deleted > 0)
    }

    async fn record_delivery_outcome(&self, webhook_id: Uuid, success: bool) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        if success {
            update(webhook_registrations::table.find(webhook_id))
                .set((
                    webhook_registrations::fail_count.eq(0),
                    webhook_registrations::last_triggered_at.eq(Some(Utc::now())),
                ))
                .execute(&mut conn)?;
        } else {
            update(webhook_registrations::table.find(webhook_id))
                .set((
                    webhook_registrations::fail_count
                        .eq(webhook_registrations::fail_count + 1),
                    webhook_registrations::last_triggered_at.eq(Some(Utc::now())),
                ))
                .execute(&mut conn)?;
        }

        Ok(())
    }
}
