use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use domain::services::{
    Clock, LoggingSubscriber, MonotonicClock, NotificationBus, ReservationBackend,
};
use persistence::{InMemoryBackend, PgBackend, ReservationStore};
use tracing::{info, warn};

use rental_api::app::create_app;
use rental_api::config::Config;
use rental_api::jobs::{JobScheduler, ReservationMetricsJob};
use rental_api::middleware;
use rental_api::services::ReservationWorkflow;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;

    middleware::logging::init_logging(&config.logging)
        .context("Failed to initialize logging")?;
    middleware::init_metrics().context("Failed to initialize metrics")?;

    info!("Starting rental server v{}", env!("CARGO_PKG_VERSION"));

    let pool = if config.database.is_configured() {
        let pool = persistence::db::create_pool(&config.database.pool_config()).await?;
        persistence::db::run_migrations(&pool).await?;
        Some(pool)
    } else {
        warn!("No database configured, reservations are kept in memory only");
        None
    };
    let backend: Arc<dyn ReservationBackend> = match &pool {
        Some(pool) => Arc::new(PgBackend::new(pool.clone())),
        None => Arc::new(InMemoryBackend::new()),
    };

    let store = Arc::new(
        ReservationStore::load(backend)
            .await
            .context("Failed to load reservations")?,
    );

    let bus = Arc::new(NotificationBus::new());
    bus.subscribe_all(LoggingSubscriber);

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let workflow = Arc::new(ReservationWorkflow::new(
        Arc::clone(&store),
        bus,
        Arc::clone(&clock),
        config.reservations.expiration_timeout_secs,
    )?);
    workflow.resume_pending().await?;

    let mut jobs = JobScheduler::new();
    jobs.register(ReservationMetricsJob::new(
        store,
        workflow.scheduler().clone(),
        clock,
        Duration::from_secs(config.reservations.metrics_interval_secs),
    ));
    jobs.start();

    let addr = config.socket_addr()?;
    let grace = Duration::from_secs(config.reservations.shutdown_grace_secs);
    let app = create_app(config, Arc::clone(&workflow), pool);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    let cancelled = workflow.shutdown().await;
    info!(cancelled, "Expiration timers stopped");
    jobs.shutdown();
    jobs.wait_for_shutdown(grace).await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
