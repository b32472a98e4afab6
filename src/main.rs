use std::sync::Arc;

use anyhow::Result;
use pitch_pay::application::usecases::delivery_retry;
use pitch_pay::config::config_loader;
use pitch_pay::infrastructure::axum_http::http_serve;
use pitch_pay::infrastructure::postgres::postgres_connection;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        error!("Payment core exited with error: {}", error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    pitch_pay::observability::init_observability("payment-core")?;

    let dotenvy_env = config_loader::load()?;
    info!("ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(&dotenvy_env.database.url)?;
    info!("Postgres connection has been established");

    let config = Arc::new(dotenvy_env);
    let db_pool = Arc::new(postgres_pool);

    tokio::spawn(delivery_retry::run_delivery_retry_loop(
        Arc::clone(&config),
        Arc::clone(&db_pool),
    ));
    info!("Delivery retry sweep has been scheduled");

    http_serve::start(config, db_pool).await?;

    Ok(())
}
