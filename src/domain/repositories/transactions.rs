use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::transactions::{NewTransactionEntity, TransactionEntity};

#[automock]
#[async_trait]
pub trait TransactionRepository {
    /// Insert-or-update keyed on the unique `(provider, external_id)`
    /// constraint. Safe to repeat; both the synchronous gateway path and
    /// the inbound webhook path funnel through this.
    async fn upsert_by_provider_ref(&self, transaction: NewTransactionEntity) -> Result<Uuid>;

    async fn list_by_tenant(&self, tenant_id: Uuid, limit: i64) -> Result<Vec<TransactionEntity>>;
}
