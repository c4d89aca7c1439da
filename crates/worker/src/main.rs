//! Background worker entry point.
//!
//! Drives the outbox and inbox processors as periodic polling loops and
//! watches for stalled sagas. All loops share one cancellation token;
//! shutdown waits for the current message to finish, never interrupts one
//! mid-flight.

mod adapters;

use std::sync::Arc;
use std::time::Duration;

use common::ProcessorConfig;
use inbox::{HandlerRegistry, InboxProcessor, InboxStore, PostgresInboxStore};
use outbox::{OutboxProcessor, OutboxStore, PostgresOutboxStore, PublisherRegistry};
use saga::{PostgresSagaRepository, SagaRepository};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::adapters::{LogHandler, LogPublisher};

/// How often retention cleanup runs, independent of the polling interval.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Default inactivity window after which a running saga is reported stalled.
const DEFAULT_SAGA_TIMEOUT_SECS: i64 = 3600;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn run_outbox_loop<S: OutboxStore>(
    processor: OutboxProcessor<S>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut cleanup_ticker = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = processor.process_pending(&cancel).await {
                    tracing::error!(error = %e, "outbox pass failed");
                }
                if let Err(e) = processor.retry_failed(&cancel).await {
                    tracing::error!(error = %e, "outbox retry pass failed");
                }
            }
            _ = cleanup_ticker.tick() => {
                if let Err(e) = processor.cleanup_expired().await {
                    tracing::error!(error = %e, "outbox cleanup failed");
                }
            }
        }
    }
    tracing::info!("outbox loop stopped");
}

async fn run_inbox_loop<S: InboxStore>(
    processor: InboxProcessor<S>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut cleanup_ticker = tokio::time::interval(CLEANUP_INTERVAL);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = processor.process_pending(&cancel).await {
                    tracing::error!(error = %e, "inbox pass failed");
                }
                if let Err(e) = processor.retry_failed(&cancel).await {
                    tracing::error!(error = %e, "inbox retry pass failed");
                }
            }
            _ = cleanup_ticker.tick() => {
                if let Err(e) = processor.cleanup_expired().await {
                    tracing::error!(error = %e, "inbox cleanup failed");
                }
            }
        }
    }
    tracing::info!("inbox loop stopped");
}

/// Reports sagas that have seen no activity for longer than the timeout.
///
/// Detection only; recovery is the owning service's call to make.
async fn run_saga_watchdog<R: SagaRepository>(
    repository: R,
    timeout: chrono::Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match repository.get_expired(timeout).await {
                    Ok(stalled) => {
                        for record in &stalled {
                            metrics::counter!("saga_stalled_detected").increment(1);
                            tracing::warn!(
                                saga_id = %record.id,
                                saga_name = %record.name,
                                status = %record.status,
                                last_activity = %record.last_activity_at(),
                                "stalled saga detected"
                            );
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "saga watchdog query failed"),
                }
            }
        }
    }
    tracing::info!("saga watchdog stopped");
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder and scrape endpoint
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .expect("failed to install Prometheus recorder");

    // 3. Load configuration and connect to the database
    let config = ProcessorConfig::from_env();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to database");

    let outbox_store = PostgresOutboxStore::new(pool.clone());
    outbox_store
        .run_migrations()
        .await
        .expect("failed to run migrations");
    let inbox_store = PostgresInboxStore::new(pool.clone());
    let saga_repository = PostgresSagaRepository::new(pool);

    // 4. Register delivery adapters
    let mut publishers = PublisherRegistry::new();
    publishers.register(Arc::new(LogPublisher));
    let mut handlers = HandlerRegistry::new();
    handlers.register(Arc::new(LogHandler));

    let outbox_processor =
        OutboxProcessor::new(outbox_store, Arc::new(publishers), config.clone());
    let inbox_processor = InboxProcessor::new(inbox_store, Arc::new(handlers), config.clone());

    let saga_timeout = std::env::var("SAGA_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(chrono::Duration::seconds)
        .unwrap_or_else(|| chrono::Duration::seconds(DEFAULT_SAGA_TIMEOUT_SECS));

    // 5. Start the loops
    let cancel = CancellationToken::new();
    tracing::info!(
        interval_secs = config.processing_interval.as_secs(),
        batch_size = config.batch_size,
        "starting worker loops"
    );

    let outbox_task = tokio::spawn(run_outbox_loop(
        outbox_processor,
        config.processing_interval,
        cancel.clone(),
    ));
    let inbox_task = tokio::spawn(run_inbox_loop(
        inbox_processor,
        config.processing_interval,
        cancel.clone(),
    ));
    let watchdog_task = tokio::spawn(run_saga_watchdog(
        saga_repository,
        saga_timeout,
        config.processing_interval,
        cancel.clone(),
    ));

    // 6. Wait for shutdown
    shutdown_signal().await;
    cancel.cancel();

    let _ = outbox_task.await;
    let _ = inbox_task.await;
    let _ = watchdog_task.await;
    tracing::info!("worker shut down gracefully");
}
