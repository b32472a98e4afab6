use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::{ExpressionMethods, QueryDsl, RunQueryDsl};
use uuid::Uuid;

use crate::domain::entities::payment_settings::PaymentSettingsEntity;
use crate::domain::repositories::payment_settings::PaymentSettingsRepository;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;
use crate::infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::payment_settings};

pub struct PaymentSettingsPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl PaymentSettingsPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl PaymentSettingsRepository for PaymentSettingsPostgres {
    async fn find_by_tenant_and_provider(
        &self,
        tenant_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<Option<PaymentSettingsEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = payment_settings::table
            .filter(payment_settings::tenant_id.eq(tenant_id))
            .filter(payment_settings::provider.eq(provider.as_str()))
            .select(PaymentSettingsEntity::as_select())
            .first::<PaymentSettingsEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<PaymentSettingsEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = payment_settings::table
            .filter(payment_settings::tenant_id.eq(tenant_id))
            .select(PaymentSettingsEntity::as_select())
            .load::<PaymentSettingsEntity>(&mut conn)?;

        Ok(results)
    }
}
