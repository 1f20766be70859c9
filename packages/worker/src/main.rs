use anyhow::Context;
use common::RetryPolicy;
use mailqueue::MailQueue;
use mailqueue::database::init_db;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use worker::{DeliveryWorker, PickupDirTransport, WorkerAppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    if !config.worker.enabled {
        info!(worker_id = %config.worker.id, "Delivery worker disabled, exiting");
        return Ok(());
    }

    if config.database.is_in_memory() {
        warn!(
            url = %config.database.url,
            "In-memory database: queued mail is not shared with producers and is lost on exit"
        );
    }

    let db = init_db(&config.database)
        .await
        .context("Failed to initialize database")?;
    info!(
        max_attempts = config.retry.max_attempts,
        statement_timeout_ms = config.database.statement_timeout_ms,
        "Database connected"
    );

    let queue = MailQueue::new(db, RetryPolicy::from(&config.retry))
        .with_statement_timeout(config.database.statement_timeout());
    let transport = PickupDirTransport::new(&config.worker.pickup_dir);
    info!(pickup_dir = %transport.dir().display(), "Using pickup directory transport");

    let worker = DeliveryWorker::new(queue, transport, config.worker);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;

    Ok(())
}
