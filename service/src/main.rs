//! Ticket ingestion daemon.
//!
//! Consumes raw tickets from Redpanda, validates and parses them, and stores
//! them in `PostgreSQL` with at most `MAX_CONSUMERS` messages in flight.
//!
//! # Environment Variables
//!
//! - `MAX_CONSUMERS`: concurrency bound (required)
//! - `DATABASE_URL`, or `DB_HOST`/`DB_PORT`/`DB_NAME`/`DB_USER`/`DB_PASSWORD`
//! - `REDPANDA_BROKERS` (default: `localhost:9092`)
//! - `TICKET_QUEUE` (default: `tickets_queue`)
//! - `CONSUMER_GROUP` (default: `ticket-ingest`)
//! - `MESSAGE_DEADLINE_SECS` (default: 30, 0 disables)
//! - `STARTUP_MAX_RETRIES` (default: 5)
//! - `METRICS_ADDR`: Prometheus listener, disabled when unset
//! - `RUST_LOG` (default: `ticket_ingest=info,ticket_ingestd=info`)
//!
//! A `.env` file in the working directory is loaded first if present.

use anyhow::Context;
use std::sync::Arc;
use ticket_ingest_core::PersistenceGateway;
use ticket_ingest_postgres::PostgresTicketStore;
use ticket_ingest_redpanda::RedpandaTicketQueue;
use ticket_ingest_runtime::metrics::MetricsServer;
use ticket_ingest_runtime::retry::retry_with_backoff;
use ticket_ingest_runtime::{ConsumerPool, IngestConfig, IngestionService, RetryPolicy};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticket_ingest=info,ticket_ingestd=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "Loaded environment file");
    }

    let config = IngestConfig::from_env().context("Invalid configuration")?;
    info!(
        max_consumers = config.max_consumers,
        queue = %config.queue,
        brokers = %config.brokers,
        consumer_group = %config.consumer_group,
        message_deadline = ?config.message_deadline,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr {
        MetricsServer::new(addr)
            .start()
            .context("Failed to start metrics exporter")?;
    }

    let startup = RetryPolicy::builder()
        .max_retries(config.startup_max_retries)
        .build();

    // One connection per in-flight transaction, plus one for audits.
    let max_connections = u32::try_from(config.max_consumers)
        .unwrap_or(u32::MAX)
        .saturating_add(1);
    let store = retry_with_backoff(&startup, "connect database", || {
        PostgresTicketStore::connect(&config.database_url, max_connections)
    })
    .await
    .context("Failed to connect to PostgreSQL")?;

    let queue = RedpandaTicketQueue::builder()
        .brokers(&config.brokers)
        .consumer_group(&config.consumer_group)
        .build()
        .context("Failed to create Redpanda client")?;

    let pool = ConsumerPool::new(PersistenceGateway::new(Arc::new(store)), config.max_consumers)
        .with_message_deadline(config.message_deadline);
    let service = IngestionService::new(Arc::new(queue), config.queue.clone(), pool).with_retry_policy(startup);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        if shutdown_tx.send(()).is_err() {
            warn!("Ingestion already stopped");
        }
    });

    info!(queue = %config.queue, "Ticket ingestion running");

    let report = service
        .run(shutdown_rx)
        .await
        .context("Ticket queue subscription failed")?;

    info!(
        received = report.received,
        stored = report.stored,
        failed = report.failed,
        ack_failures = report.ack_failures,
        "Ticket ingestion stopped"
    );

    Ok(())
}

/// Resolves on Ctrl+C (SIGINT) or SIGTERM.
///
/// A handler that cannot be installed never resolves.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, draining in-flight tickets...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, draining in-flight tickets...");
        },
    }
}
