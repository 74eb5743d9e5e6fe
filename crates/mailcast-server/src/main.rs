//! Mailcast - Dispatch server entry point

use anyhow::Result;
use mailcast_common::config::{Config, LoggingConfig};
use mailcast_core::{
    DispatchSettings, Dispatcher, ScheduledDispatchWorker, SmtpTransport,
};
use mailcast_storage::{DatabasePool, Repositories};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Mailcast dispatch server...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    db_pool.health_check().await?;

    let repos = Repositories::postgres(db_pool);

    // Initialize dispatcher
    let transport = Arc::new(SmtpTransport::new(config.dispatch.send_timeout()));
    let dispatcher = Arc::new(Dispatcher::new(
        repos,
        transport,
        DispatchSettings::from_config(&config.dispatch),
    ));

    // Start scheduled dispatch worker
    let shutdown = CancellationToken::new();
    let worker = ScheduledDispatchWorker::new(Arc::clone(&dispatcher), &config.dispatch);
    let worker_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            worker.run(shutdown).await;
        })
    };

    info!(
        "Mailcast server started (concurrency: {}, send timeout: {}s)",
        config.dispatch.concurrency, config.dispatch.send_timeout_secs
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    shutdown.cancel();
    if let Err(e) = worker_handle.await {
        tracing::error!("Dispatch worker error: {}", e);
    }

    info!("Mailcast server shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
