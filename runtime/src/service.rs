//! Ingestion entry point.
//!
//! [`IngestionService`] owns the subscription: it subscribes to the ticket
//! queue (retrying while the broker is unavailable), hands the delivery stream
//! to a [`ConsumerPool`], and subscribes again whenever the stream ends until
//! shutdown is signalled. Resubscription backs off while streams keep ending
//! without delivering anything.

use std::sync::Arc;
use ticket_ingest_core::{QueueError, TicketQueue};
use tokio::sync::broadcast;

use crate::pool::{ConsumerPool, DeliveryHandler, PoolExit, PoolReport};
use crate::retry::{RetryPolicy, retry_if};

/// Whether a queue error may clear up on its own.
#[must_use]
pub const fn is_transient(err: &QueueError) -> bool {
    matches!(err, QueueError::Unavailable(_) | QueueError::Transport(_))
}

/// Long-running subscriber that feeds a [`ConsumerPool`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use ticket_ingest_core::PersistenceGateway;
/// use ticket_ingest_runtime::{ConsumerPool, IngestionService};
/// use ticket_ingest_testing::{InMemoryTicketQueue, InMemoryTicketStore};
/// use tokio::sync::broadcast;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryTicketQueue::new();
/// let store = InMemoryTicketStore::new();
/// let pool = ConsumerPool::new(PersistenceGateway::new(Arc::new(store)), 4);
/// let service = IngestionService::new(Arc::new(queue), "tickets_queue", pool);
///
/// let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
/// let running = tokio::spawn(async move { service.run(shutdown_rx).await });
///
/// shutdown_tx.send(())?;
/// let report = running.await??;
/// assert_eq!(report.received, 0);
/// # Ok(())
/// # }
/// ```
pub struct IngestionService<H> {
    queue: Arc<dyn TicketQueue>,
    queue_name: String,
    pool: ConsumerPool<H>,
    retry: RetryPolicy,
}

impl<H: DeliveryHandler> IngestionService<H> {
    /// Create a service consuming `queue_name` through `pool`.
    #[must_use]
    pub fn new(queue: Arc<dyn TicketQueue>, queue_name: impl Into<String>, pool: ConsumerPool<H>) -> Self {
        Self {
            queue,
            queue_name: queue_name.into(),
            pool,
            retry: RetryPolicy::default(),
        }
    }

    /// Use `policy` when (re)subscribing.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Name of the consumed queue.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Consume until `shutdown` fires.
    ///
    /// Returns the counters accumulated over every subscription. Each pool
    /// run has drained its outstanding messages before this returns.
    ///
    /// # Errors
    ///
    /// Returns the [`QueueError`] from subscribing when it is permanent or
    /// when retries are exhausted.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<PoolReport, QueueError> {
        let mut total = PoolReport::default();
        let mut idle_runs = 0;
        let queue = self.queue.as_ref();
        let queue_name = self.queue_name.as_str();

        loop {
            let deliveries = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    total.exit = PoolExit::Shutdown;
                    return Ok(total);
                }
                subscribed = retry_if(
                    &self.retry,
                    "subscribe",
                    move || queue.subscribe(queue_name),
                    is_transient,
                ) => subscribed?,
            };

            tracing::info!(queue = queue_name, "Subscribed to ticket queue");

            let run = self.pool.run(deliveries, &mut shutdown).await;
            idle_runs = if run.received == 0 { idle_runs + 1 } else { 0 };
            total += run;

            match total.exit {
                PoolExit::Shutdown => {
                    tracing::info!(
                        queue = queue_name,
                        received = total.received,
                        stored = total.stored,
                        failed = total.failed,
                        "Ingestion stopped"
                    );
                    return Ok(total);
                }
                PoolExit::StreamEnded => {
                    let delay = self.retry.delay_for_attempt(idle_runs);
                    tracing::warn!(
                        queue = queue_name,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Delivery stream ended, resubscribing"
                    );

                    tokio::select! {
                        biased;
                        _ = shutdown.recv() => {
                            total.exit = PoolExit::Shutdown;
                            return Ok(total);
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connectivity_errors_are_transient() {
        assert!(is_transient(&QueueError::Unavailable("down".to_string())));
        assert!(is_transient(&QueueError::Transport("reset".to_string())));
        assert!(!is_transient(&QueueError::Subscription {
            queue: "q".to_string(),
            reason: "denied".to_string(),
        }));
        assert!(!is_transient(&QueueError::Ack("gone".to_string())));
    }
}
