use credit_wallets::{
    config::{database, settings},
    core::{entitlement::License, locks::WalletLocks, repository::SeaOrmWalletRepository},
    errors::Result,
    jobs::{clock::Clock, worker::JobContext, worker::Worker},
    queue::TaskQueue,
};
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();
    info!("Attempted to load .env file.");

    // 3. Load service settings
    let settings = settings::load_default_settings()
        .inspect_err(|e| error!("Failed to load settings: {}", e))?;
    info!(
        premium = settings.license.premium,
        refresh_interval_secs = settings.clock.refresh_interval_secs,
        "Settings loaded."
    );

    // 4. Connect and make sure the schema exists
    let db = database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    database::create_tables(&db)
        .await
        .inspect(|()| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Wire the queue, worker and clock
    let (queue, receiver) = TaskQueue::new(settings.queue.capacity);
    let ctx = JobContext {
        db: db.clone(),
        queue,
        entitlements: Arc::new(License::from_settings(&settings.license)),
        locks: WalletLocks::new(),
    };
    let clock = Clock::new(
        Arc::new(SeaOrmWalletRepository::new(db)),
        &ctx,
        settings.clock.refresh_interval(),
    );
    let worker = Worker::new(Arc::new(ctx), receiver, &settings.queue);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));
    let clock_handle = tokio::spawn(clock.run(shutdown_rx));

    // 6. Run until Ctrl-C
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested.");
    shutdown_tx.send(true).ok();

    for (name, handle) in [("clock", clock_handle), ("worker", worker_handle)] {
        if let Err(e) = handle.await {
            error!("{} task ended abnormally: {}", name, e);
        }
    }

    info!("Stopped.");
    Ok(())
}
