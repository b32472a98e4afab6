#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub server: Server,
    pub database: Database,
    pub webhooks: Webhooks,
}

#[derive(Debug, Clone)]
pub struct Server {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

/// Knobs for both sides of the webhook subsystem: the public base URL that
/// inbound provider callbacks are registered under, and the outbound
/// delivery/retry policy.
#[derive(Debug, Clone)]
pub struct Webhooks {
    pub public_base_url: String,
    pub delivery_timeout_seconds: u64,
    pub max_retries: i32,
    pub retry_interval_seconds: u64,
    pub retry_window_hours: i64,
    pub retry_batch_size: i64,
}
