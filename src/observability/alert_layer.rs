use super::alert_sink::{AlertEvent, AlertSender};
use super::ServiceContext;
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Forwards events at or above `min_level` to the alert sender. Event
/// fields are flattened to strings with credential-shaped keys redacted;
/// provider API keys and webhook secrets must never reach a chat channel.
#[derive(Clone)]
pub(crate) struct AlertLayer {
    sender: AlertSender,
    service_context: ServiceContext,
    min_level: Level,
}

impl AlertLayer {
    pub(crate) fn new(
        sender: AlertSender,
        service_context: ServiceContext,
        min_level: Level,
    ) -> Self {
        Self {
            sender,
            service_context,
            min_level,
        }
    }
}

#[derive(Default)]
struct FieldMapVisitor {
    values: BTreeMap<String, String>,
}

impl FieldMapVisitor {
    fn insert(&mut self, field: &Field, value: String) {
        self.values
            .insert(field.name().to_string(), redact(field.name(), value));
    }
}

impl Visit for FieldMapVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.to_string());
    }
}

impl<S> Layer<S> for AlertLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() > self.min_level {
            return;
        }

        let mut visitor = FieldMapVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .values
            .remove("message")
            .map(|raw| unquote_debug_string(&raw));

        self.sender.try_send(AlertEvent {
            level: *event.metadata().level(),
            timestamp: Utc::now(),
            service_name: self.service_context.service_name.clone(),
            environment: self.service_context.environment.clone(),
            component: self.service_context.component.clone(),
            target: event.metadata().target().to_string(),
            message,
            fields: visitor.values,
        });
    }
}

fn unquote_debug_string(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        return trimmed[1..trimmed.len() - 1].to_string();
    }
    trimmed.to_string()
}

fn redact(field_name: &str, value: String) -> String {
    if is_sensitive_key(field_name) {
        return "[REDACTED]".to_string();
    }
    value
}

fn is_sensitive_key(field_name: &str) -> bool {
    let field = field_name.to_ascii_lowercase();
    field.contains("secret")
        || field.contains("credential")
        || field.contains("api_key")
        || field.contains("password")
        || field.contains("token")
        || field.contains("authorization")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credential_shaped_fields() {
        assert_eq!(
            redact("stripe_secret_key", "sk_live_abc".to_string()),
            "[REDACTED]"
        );
        assert_eq!(redact("api_key", "key".to_string()), "[REDACTED]");
        assert_eq!(redact("provider", "stripe".to_string()), "stripe");
    }

    #[test]
    fn unquotes_debug_formatted_messages() {
        assert_eq!(unquote_debug_string("\"hello\""), "hello");
        assert_eq!(unquote_debug_string("plain"), "plain");
    }
}
