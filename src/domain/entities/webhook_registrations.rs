use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infrastructure::postgres::schema::webhook_registrations;

/// Tenant-owned outbound subscription. `fail_count` is monitoring
/// metadata only; it never disables the registration automatically.
#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = webhook_registrations)]
pub struct WebhookRegistrationEntity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub url: String,
    pub secret: Option<String>,
    pub events: Vec<String>,
    pub custom_headers: serde_json::Value,
    pub is_active: bool,
    pub fail_count: i32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WebhookRegistrationEntity {
    /// Whether this registration subscribes to `event_type`, either
    /// explicitly or via the `*` wildcard.
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events
            .iter()
            .any(|event| event == event_type || event == "*")
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = webhook_registrations)]
pub struct NewWebhookRegistrationEntity {
    pub tenant_id: Uuid,
    pub url: String,
    pub secret: Option<String>,
    pub events: Vec<String>,
    pub custom_headers: serde_json::Value,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration(events: Vec<&str>) -> WebhookRegistrationEntity {
        WebhookRegistrationEntity {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            url: "https://example.com/hook".to_string(),
            secret: None,
            events: events.into_iter().map(str::to_string).collect(),
            custom_headers: serde_json::json!({}),
            is_active: true,
            fail_count: 0,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn matches_explicit_event() {
        assert!(registration(vec!["payment.received"]).subscribes_to("payment.received"));
        assert!(!registration(vec!["payment.received"]).subscribes_to("user.created"));
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(registration(vec!["*"]).subscribes_to("session.completed"));
    }
}
