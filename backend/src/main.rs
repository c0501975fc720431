use std::sync::Arc;

use backend::{app::App, config::AppConfig};
use common::logger::init_tracing;
use common::time::SystemClock;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting cart sync backend...");

    let cfg = AppConfig::from_env();
    let app = App::build(&cfg, Arc::new(SystemClock)).await?;

    tracing::info!(
        database_url = %cfg.database_url,
        reservation_timeout_mins = cfg.ledger.reservation_timeout.num_minutes(),
        max_extensions = cfg.ledger.max_extensions,
        "services ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let tasks = app.spawn_background(&cfg, shutdown_rx);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    shutdown_tx.send(true)?;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = ?e, "background task ended abnormally");
        }
    }

    app.db.pool.close().await;
    Ok(())
}
