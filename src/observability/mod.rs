mod alert_layer;
mod alert_sink;

use anyhow::Result;
use alert_layer::AlertLayer;
use alert_sink::{AlertSender, DiscordWebhookSink};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use url::Url;

/// Runtime identity attached to every alert. A money-moved-without-ledger
/// event must be attributable to a deployment at a glance.
#[derive(Clone)]
pub(crate) struct ServiceContext {
    pub(crate) service_name: String,
    pub(crate) environment: String,
    pub(crate) component: String,
}

/// Initializes tracing: an EnvFilter-driven fmt layer, plus an optional
/// alert layer that forwards ERROR-level events to a Discord webhook.
/// The alert channel is how ledger-consistency failures get surfaced
/// loudly instead of scrolling past in the logs.
pub fn init_observability(component: &str) -> Result<()> {
    let service_context = ServiceContext {
        service_name: std::env::var("SERVICE_NAME").unwrap_or_else(|_| "pitch-pay".to_string()),
        environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        component: component.to_string(),
    };

    let alert_webhook = std::env::var("DISCORD_WEBHOOK_URL").ok();
    let alert_layer = match alert_webhook.as_deref() {
        Some(raw) => match Url::parse(raw) {
            Ok(webhook_url) => {
                let sender = AlertSender::new(Arc::new(DiscordWebhookSink::new(webhook_url)));
                Some(
                    AlertLayer::new(sender, service_context.clone(), Level::ERROR).with_filter(
                        tracing_subscriber::filter::LevelFilter::from_level(Level::ERROR),
                    ),
                )
            }
            Err(_) => None,
        },
        None => None,
    };
    let alert_misconfigured = alert_webhook.is_some() && alert_layer.is_none();
    let alerts_enabled = alert_layer.is_some();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    if alert_misconfigured {
        warn!(
            service = %service_context.service_name,
            environment = %service_context.environment,
            component = %service_context.component,
            "DISCORD_WEBHOOK_URL is not a valid URL; error alerts disabled"
        );
    } else if alerts_enabled {
        info!(
            service = %service_context.service_name,
            environment = %service_context.environment,
            component = %service_context.component,
            "Error alerts enabled"
        );
    } else {
        info!(
            service = %service_context.service_name,
            environment = %service_context.environment,
            component = %service_context.component,
            "Error alerts disabled"
        );
    }

    Ok(())
}
