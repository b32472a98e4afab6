use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::payment_settings::PaymentSettingsEntity;
use crate::domain::value_objects::enums::payment_providers::PaymentProvider;

#[automock]
#[async_trait]
pub trait PaymentSettingsRepository {
    async fn find_by_tenant_and_provider(
        &self,
        tenant_id: Uuid,
        provider: PaymentProvider,
    ) -> Result<Option<PaymentSettingsEntity>>;

    async fn list_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<PaymentSettingsEntity>>;
}
