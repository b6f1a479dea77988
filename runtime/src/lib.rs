//! # Ticket Ingest Runtime
//!
//! Runtime side of the ticket ingestion pipeline.
//!
//! ## Core Components
//!
//! - **[`ConsumerPool`]**: admits queue deliveries into at most `N` concurrent
//!   processing tasks, acknowledges every delivery, drains on exit
//! - **[`IngestionService`]**: owns the subscription, retries it while the
//!   broker is unavailable, resubscribes when the stream ends
//! - **[`IngestConfig`]**: environment configuration
//! - **[`metrics`]**: Prometheus counters for the pool
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ticket_ingest_core::PersistenceGateway;
//! use ticket_ingest_runtime::{ConsumerPool, IngestConfig, IngestionService};
//! use ticket_ingest_testing::{InMemoryTicketQueue, InMemoryTicketStore};
//! use tokio::sync::broadcast;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = IngestConfig::from_env()?;
//!
//! let gateway = PersistenceGateway::new(Arc::new(InMemoryTicketStore::new()));
//! let pool = ConsumerPool::new(gateway, config.max_consumers)
//!     .with_message_deadline(config.message_deadline);
//! let service = IngestionService::new(Arc::new(InMemoryTicketQueue::new()), config.queue, pool);
//!
//! let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
//! let report = service.run(shutdown_rx).await?;
//! println!("stored {} tickets", report.stored);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Environment configuration
pub mod config;

/// Prometheus metrics for observability
pub mod metrics;

/// Bounded consumer pool
pub mod pool;

/// Retry logic with exponential backoff
pub mod retry;

/// Subscription owner feeding the consumer pool
pub mod service;

pub use config::{ConfigError, IngestConfig};
pub use pool::{ConsumerPool, DeliveryHandler, HandlerFuture, PoolExit, PoolReport};
pub use retry::RetryPolicy;
pub use service::IngestionService;
