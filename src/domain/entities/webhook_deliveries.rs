use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::webhook_deliveries;

/// One row per delivery attempt chain for one subscriber and one event.
/// `delivered_at` is set only on a 2xx response and is immutable once set.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = webhook_deliveries)]
pub struct WebhookDeliveryEntity {
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub status_code: Option<i32>,
    pub response_excerpt: Option<String>,
    pub error: Option<String>,
    pub attempts: i32,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = webhook_deliveries)]
pub struct NewWebhookDeliveryEntity {
    /// Generated by the dispatcher, not the database, so the same id can
    /// be sent as the `X-Webhook-ID` header of the first attempt.
    pub id: Uuid,
    pub webhook_id: Uuid,
    pub event_type: String,
    pub payload: String,
    pub status_code: Option<i32>,
    pub response_excerpt: Option<String>,
    pub error: Option<String>,
    pub attempts: i32,
    pub delivered_at: Option<DateTime<Utc>>,
}
