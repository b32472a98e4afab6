use anyhow::{Ok, Result};

use super::config_model::{Database, DotEnvyConfig, Server, Webhooks};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();

    let server = Server {
        port: std::env::var("SERVER_PORT")
            .expect("SERVER_PORT is invalid")
            .parse()?,
        body_limit: std::env::var("SERVER_BODY_LIMIT")
            .expect("SERVER_BODY_LIMIT is invalid")
            .parse()?,
        timeout: std::env::var("SERVER_TIMEOUT")
            .expect("SERVER_TIMEOUT is invalid")
            .parse()?,
    };

    let database = Database {
        url: std::env::var("DATABASE_URL").expect("DATABASE_URL is invalid"),
    };

    let webhooks = Webhooks {
        public_base_url: std::env::var("PUBLIC_BASE_URL").expect("PUBLIC_BASE_URL is invalid"),
        delivery_timeout_seconds: optional_env("WEBHOOK_TIMEOUT_SECONDS", 30),
        max_retries: optional_env("WEBHOOK_MAX_RETRIES", 3),
        retry_interval_seconds: optional_env("WEBHOOK_RETRY_INTERVAL_SECONDS", 60),
        retry_window_hours: optional_env("WEBHOOK_RETRY_WINDOW_HOURS", 24),
        retry_batch_size: optional_env("WEBHOOK_RETRY_BATCH_SIZE", 100),
    };

    Ok(DotEnvyConfig {
        server,
        database,
        webhooks,
    })
}

fn optional_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_env_falls_back_to_default() {
        assert_eq!(optional_env("PITCH_PAY_TEST_MISSING_KEY", 42_i32), 42);
    }
}
