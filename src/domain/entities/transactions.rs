use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::transactions;

/// One append-only money-movement event. `(provider, external_id)` is
/// unique; the synchronous API response and the asynchronous provider
/// confirmation for the same event collapse to one row.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = transactions)]
pub struct TransactionEntity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub external_id: String,
    pub provider: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub type_: String,
    pub customer_email: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transactions)]
pub struct NewTransactionEntity {
    pub tenant_id: Uuid,
    pub external_id: String,
    pub provider: String,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub type_: String,
    pub customer_email: Option<String>,
    pub metadata: serde_json::Value,
}
