use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{warn, Level};
use url::Url;

#[derive(Clone, Debug)]
pub(crate) struct AlertEvent {
    pub(crate) level: Level,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
    pub(crate) target: String,
    pub(crate) message: Option<String>,
    pub(crate) fields: BTreeMap<String, String>,
}

#[async_trait]
pub(crate) trait AlertSink: Send + Sync {
    async fn send(&self, event: &AlertEvent) -> Result<()>;
    fn sink_name(&self) -> &'static str;
}

/// Queues alerts onto a bounded channel drained by a background task, so a
/// slow sink cannot stall the hot path that emitted the event.
#[derive(Clone)]
pub(crate) struct AlertSender {
    tx: mpsc::Sender<AlertEvent>,
}

impl AlertSender {
    pub(crate) fn new(sink: Arc<dyn AlertSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertEvent>(256);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(error) = sink.send(&event).await {
                    warn!(
                        sink = sink.sink_name(),
                        error = %error,
                        "Alert sink failed"
                    );
                }
            }
        });

        Self { tx }
    }

    pub(crate) fn try_send(&self, event: AlertEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Alert queue full; dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Alert queue closed; dropping event");
            }
        }
    }
}

pub(crate) struct DiscordWebhookSink {
    webhook_url: Url,
    client: Client,
}

impl DiscordWebhookSink {
    pub(crate) fn new(webhook_url: Url) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(3))
            .build()
            .expect("reqwest client must build");

        Self {
            webhook_url,
            client,
        }
    }

    fn format_content(&self, event: &AlertEvent) -> String {
        let mut lines = vec![
            format!(
                "**{}** `{}` `{}` `{}`",
                event.service_name,
                event.environment,
                event.component,
                event.level.as_str()
            ),
            format!(
                "`{}` `{}`",
                event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                event.target
            ),
        ];

        if let Some(message) = event.message.as_ref().filter(|m| !m.trim().is_empty()) {
            lines.push(format!("> {}", message.trim()));
        }

        for (key, value) in &event.fields {
            lines.push(format!("- `{}` = `{}`", key, value));
        }

        truncate_for_discord(lines.join("\n"))
    }
}

#[async_trait]
impl AlertSink for DiscordWebhookSink {
    async fn send(&self, event: &AlertEvent) -> Result<()> {
        let content = self.format_content(event);

        let response = self
            .client
            .post(self.webhook_url.clone())
            .json(&json!({ "content": content }))
            .send()
            .await
            .map_err(sanitize_reqwest_error)?;

        if response.status().is_success() {
            return Ok(());
        }

        Err(anyhow!(
            "discord webhook returned non-success status: {}",
            response.status()
        ))
    }

    fn sink_name(&self) -> &'static str {
        "discord"
    }
}

// Never propagate reqwest's error Display here: it can embed the webhook
// URL, which is itself a secret.
fn sanitize_reqwest_error(error: reqwest::Error) -> anyhow::Error {
    if error.is_timeout() {
        return anyhow!("discord webhook request timed out");
    }
    if error.is_connect() {
        return anyhow!("discord webhook connection failed");
    }
    anyhow!("discord webhook request failed")
}

fn truncate_for_discord(mut content: String) -> String {
    const LIMIT: usize = 2000;
    const SUFFIX: &str = "\n… (truncated)";

    if content.chars().count() <= LIMIT {
        return content;
    }

    let allowed = LIMIT.saturating_sub(SUFFIX.chars().count());
    let truncated: String = content.chars().take(allowed).collect();
    content.clear();
    content.push_str(&truncated);
    content.push_str(SUFFIX);
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_oversized_content() {
        let content = "x".repeat(3000);
        let truncated = truncate_for_discord(content);
        assert!(truncated.chars().count() <= 2000);
        assert!(truncated.ends_with("… (truncated)"));
    }

    #[test]
    fn leaves_short_content_alone() {
        assert_eq!(truncate_for_discord("ok".to_string()), "ok");
    }
}
