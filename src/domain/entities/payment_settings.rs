use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::payment_settings;

/// Per-tenant, per-provider gateway configuration. Read on every adapter
/// call; there is deliberately no long-lived cached client, so a tenant's
/// credential rotation takes effect on the next operation.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = payment_settings)]
pub struct PaymentSettingsEntity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub provider: String,
    pub enabled: bool,
    pub test_mode: bool,
    pub credentials: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
