use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type of the synthetic delivery sent by the manual endpoint
/// test. These deliveries get exactly one attempt; the retry sweep
/// never picks them up.
pub const TEST_EVENT: &str = "test.ping";

/// Outcome of one outbound delivery attempt, as reported back to the
/// caller of `dispatch` (one per subscribed registration).
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryResult {
    pub delivery_id: Uuid,
    pub webhook_id: Uuid,
    pub url: String,
    pub success: bool,
    pub status_code: Option<i32>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterWebhookDto {
    pub url: String,
    pub secret: Option<String>,
    pub events: Vec<String>,
    #[serde(default)]
    pub custom_headers: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookRegistrationDto {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub is_active: bool,
    pub fail_count: i32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookDeliveryDto {
    pub id: Uuid,
    pub event_type: String,
    pub status_code: Option<i32>,
    pub response_excerpt: Option<String>,
    pub error: Option<String>,
    pub attempts: i32,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
