//! Bounded consumer pool.
//!
//! One dispatch loop admits deliveries from a [`DeliveryStream`] into at most
//! `max_consumers` concurrently running processing tasks. Admission waits for
//! a free slot before pulling the next delivery, so a saturated pool applies
//! backpressure to the broker instead of buffering.
//!
//! Every admitted delivery is acknowledged after its processing attempt ends,
//! whatever the outcome. Per-message failures (parse errors, store errors,
//! deadline overruns, panics) are logged and counted, never propagated.
//!
//! When the stream ends or shutdown is signalled the loop stops admitting and
//! waits for every admitted task to finish before returning.

use futures::FutureExt;
use futures::StreamExt;
use std::any::Any;
use std::future::Future;
use std::ops::AddAssign;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use ticket_ingest_core::{Delivery, DeliveryStream, IngestError, PersistenceGateway, StoredTicket};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::{JoinError, JoinSet};

use crate::metrics::{IngestMetrics, MessageOutcome};

/// Future returned by [`DeliveryHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<StoredTicket, IngestError>> + Send + 'a>>;

/// Processes the body of one delivery.
///
/// [`PersistenceGateway`] is the production handler; tests plug in
/// instrumented ones.
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Process one message body.
    fn handle<'a>(&'a self, body: &'a [u8]) -> HandlerFuture<'a>;
}

impl DeliveryHandler for PersistenceGateway {
    fn handle<'a>(&'a self, body: &'a [u8]) -> HandlerFuture<'a> {
        Box::pin(async move {
            let raw = std::str::from_utf8(body).map_err(|e| IngestError::Encoding(e.to_string()))?;
            self.store_ticket(raw).await
        })
    }
}

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolExit {
    /// The delivery stream ended (broker disconnect or queue closed).
    #[default]
    StreamEnded,
    /// Shutdown was signalled.
    Shutdown,
}

/// Counters for one or more pool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolReport {
    /// Deliveries admitted.
    pub received: u64,
    /// Deliveries whose ticket row was committed.
    pub stored: u64,
    /// Deliveries that wrote nothing (parse, store, deadline, panic, encoding).
    pub failed: u64,
    /// Acknowledgments the broker rejected.
    pub ack_failures: u64,
    /// Why the most recent run stopped.
    pub exit: PoolExit,
}

impl AddAssign for PoolReport {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.stored += other.stored;
        self.failed += other.failed;
        self.ack_failures += other.ack_failures;
        self.exit = other.exit;
    }
}

impl PoolReport {
    fn absorb(&mut self, finished: Result<TaskOutcome, JoinError>) {
        match finished {
            Ok(outcome) => {
                if outcome.outcome == MessageOutcome::Stored {
                    self.stored += 1;
                } else {
                    self.failed += 1;
                }
                if !outcome.acked {
                    self.ack_failures += 1;
                }
            }
            Err(err) => {
                // The task never reached its acknowledgment.
                tracing::error!(error = %err, "Processing task aborted");
                self.failed += 1;
                self.ack_failures += 1;
            }
        }
    }
}

struct TaskOutcome {
    outcome: MessageOutcome,
    acked: bool,
}

/// Bounded-concurrency consumer pool.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use ticket_ingest_core::{PersistenceGateway, TicketQueue};
/// use ticket_ingest_runtime::ConsumerPool;
/// use ticket_ingest_testing::{InMemoryTicketQueue, InMemoryTicketStore, valid_ticket};
/// use tokio::sync::broadcast;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryTicketQueue::new();
/// let store = InMemoryTicketStore::new();
/// let pool = ConsumerPool::new(PersistenceGateway::new(Arc::new(store.clone())), 4);
///
/// queue.publish("tickets_queue", valid_ticket().as_bytes()).await?;
/// let deliveries = queue.subscribe("tickets_queue").await?;
/// queue.close("tickets_queue");
///
/// let (_tx, mut shutdown) = broadcast::channel(1);
/// let report = pool.run(deliveries, &mut shutdown).await;
///
/// assert_eq!(report.stored, 1);
/// assert_eq!(store.tickets().len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct ConsumerPool<H> {
    handler: Arc<H>,
    max_consumers: usize,
    message_deadline: Option<Duration>,
}

impl<H: DeliveryHandler> ConsumerPool<H> {
    /// Create a pool running at most `max_consumers` tasks at once.
    ///
    /// A `max_consumers` of zero is raised to one.
    #[must_use]
    pub fn new(handler: H, max_consumers: usize) -> Self {
        Self {
            handler: Arc::new(handler),
            max_consumers: max_consumers.max(1),
            message_deadline: None,
        }
    }

    /// Abandon a message's processing after `deadline`.
    ///
    /// The abandoned attempt is rolled back, counted as failed and the message
    /// is still acknowledged.
    #[must_use]
    pub const fn with_message_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.message_deadline = deadline;
        self
    }

    /// Maximum number of concurrently processed messages.
    #[must_use]
    pub const fn max_consumers(&self) -> usize {
        self.max_consumers
    }

    /// Consume `deliveries` until the stream ends or `shutdown` fires, then
    /// drain outstanding work.
    ///
    /// A closed shutdown channel counts as a shutdown request. Stream errors
    /// are logged and skipped.
    pub async fn run(&self, mut deliveries: DeliveryStream, shutdown: &mut broadcast::Receiver<()>) -> PoolReport {
        let slots = Arc::new(Semaphore::new(self.max_consumers));
        let mut tasks = JoinSet::new();
        let mut report = PoolReport::default();

        tracing::info!(max_consumers = self.max_consumers, "Consumer pool started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    report.exit = PoolExit::Shutdown;
                    break;
                }
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    report.exit = PoolExit::Shutdown;
                    break;
                }
                next = deliveries.next() => next,
            };

            match next {
                None => {
                    report.exit = PoolExit::StreamEnded;
                    break;
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "Delivery stream error");
                }
                Some(Ok(delivery)) => {
                    report.received += 1;
                    let slot = Slot::admit(permit);
                    tasks.spawn(process_delivery(
                        Arc::clone(&self.handler),
                        delivery,
                        slot,
                        self.message_deadline,
                    ));
                }
            }

            while let Some(finished) = tasks.try_join_next() {
                report.absorb(finished);
            }
        }

        tracing::info!(
            exit = ?report.exit,
            outstanding = tasks.len(),
            "Consumer pool stopping, draining outstanding messages"
        );

        while let Some(finished) = tasks.join_next().await {
            report.absorb(finished);
        }

        tracing::info!(
            received = report.received,
            stored = report.stored,
            failed = report.failed,
            ack_failures = report.ack_failures,
            "Consumer pool drained"
        );

        report
    }
}

/// An occupied pool slot, counted in `ticket_ingest_in_flight` until dropped.
struct Slot {
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    fn admit(permit: OwnedSemaphorePermit) -> Self {
        IngestMetrics::record_admitted();
        Self { _permit: permit }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        IngestMetrics::record_released();
    }
}

async fn process_delivery<H: DeliveryHandler>(
    handler: Arc<H>,
    delivery: Delivery,
    slot: Slot,
    deadline: Option<Duration>,
) -> TaskOutcome {
    let started = Instant::now();

    let result = run_handler(handler.as_ref(), delivery.body(), deadline).await;
    let outcome = log_result(&result, delivery.body().len());

    let acked = match delivery.ack().await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to acknowledge message");
            IngestMetrics::record_ack_failure();
            false
        }
    };

    drop(slot);
    IngestMetrics::record_message(outcome, started.elapsed());

    TaskOutcome { outcome, acked }
}

async fn run_handler<H: DeliveryHandler>(
    handler: &H,
    body: &[u8],
    deadline: Option<Duration>,
) -> Result<StoredTicket, IngestError> {
    let attempt = AssertUnwindSafe(handler.handle(body)).catch_unwind();

    let caught = match deadline {
        Some(limit) => match tokio::time::timeout(limit, attempt).await {
            Ok(caught) => caught,
            Err(_) => return Err(IngestError::DeadlineExceeded(limit)),
        },
        None => attempt.await,
    };

    caught.unwrap_or_else(|payload| Err(IngestError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn log_result(result: &Result<StoredTicket, IngestError>, body_len: usize) -> MessageOutcome {
    match result {
        Ok(stored) => {
            tracing::info!(
                order_id = %stored.order_id,
                valid = stored.valid,
                ticket_id = stored.receipt.ticket_id,
                products_inserted = stored.receipt.products_inserted,
                "Ticket stored"
            );
            IngestMetrics::record_ticket(stored.valid, stored.receipt.products_inserted);
            MessageOutcome::Stored
        }
        Err(IngestError::Parse(err)) => {
            tracing::warn!(error = %err, body_len, "Rejected malformed ticket");
            MessageOutcome::Rejected
        }
        Err(err) => {
            tracing::error!(error = %err, body_len, "Ticket processing failed");
            MessageOutcome::Failed
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use ticket_ingest_core::{StoreReceipt, TicketQueue};
    use ticket_ingest_testing::{InMemoryTicketQueue, InMemoryTicketStore, valid_ticket};

    const QUEUE: &str = "tickets_queue";

    struct Panicking;

    impl DeliveryHandler for Panicking {
        fn handle<'a>(&'a self, body: &'a [u8]) -> HandlerFuture<'a> {
            Box::pin(async move {
                if body == b"boom" {
                    panic!("handler exploded");
                }
                Ok(StoredTicket {
                    order_id: "ok".to_string(),
                    valid: true,
                    receipt: StoreReceipt {
                        ticket_id: 1,
                        products_inserted: 0,
                    },
                })
            })
        }
    }

    async fn closed_stream(queue: &InMemoryTicketQueue, bodies: &[&[u8]]) -> DeliveryStream {
        for body in bodies {
            queue.publish(QUEUE, body).await.unwrap();
        }
        let stream = queue.subscribe(QUEUE).await.unwrap();
        queue.close(QUEUE);
        stream
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&"owned".to_string()), "owned");
        assert_eq!(panic_message(&42_u8), "non-string panic payload");
    }

    #[test]
    fn zero_consumers_is_raised_to_one() {
        let pool = ConsumerPool::new(Panicking, 0);
        assert_eq!(pool.max_consumers(), 1);
    }

    #[tokio::test]
    async fn non_utf8_bodies_fail_without_writing() {
        let queue = InMemoryTicketQueue::new();
        let store = InMemoryTicketStore::new();
        let pool = ConsumerPool::new(PersistenceGateway::new(Arc::new(store.clone())), 2);
        let stream = closed_stream(&queue, &[[0xff, 0xfe, 0x00].as_slice()]).await;

        let (_tx, mut shutdown) = broadcast::channel(1);
        let report = pool.run(stream, &mut shutdown).await;

        assert_eq!(report.failed, 1);
        assert!(store.tickets().is_empty());
        assert_eq!(queue.ack_count(), 1);
    }

    #[tokio::test]
    async fn panics_are_contained_and_acknowledged() {
        let queue = InMemoryTicketQueue::new();
        let pool = ConsumerPool::new(Panicking, 2);
        let stream = closed_stream(&queue, &[b"boom".as_slice(), b"fine".as_slice()]).await;

        let (_tx, mut shutdown) = broadcast::channel(1);
        let report = pool.run(stream, &mut shutdown).await;

        assert_eq!(report.received, 2);
        assert_eq!(report.stored, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(queue.ack_count(), 2);
    }

    #[tokio::test]
    async fn stream_end_is_reported() {
        let queue = InMemoryTicketQueue::new();
        let store = InMemoryTicketStore::new();
        let pool = ConsumerPool::new(PersistenceGateway::new(Arc::new(store)), 1);
        let stream = closed_stream(&queue, &[valid_ticket().as_bytes()]).await;

        let (_tx, mut shutdown) = broadcast::channel(1);
        let report = pool.run(stream, &mut shutdown).await;

        assert_eq!(report.exit, PoolExit::StreamEnded);
        assert_eq!(report.stored, 1);
    }

    #[test]
    fn reports_accumulate() {
        let mut total = PoolReport {
            received: 2,
            stored: 1,
            failed: 1,
            ack_failures: 0,
            exit: PoolExit::StreamEnded,
        };
        total += PoolReport {
            received: 3,
            stored: 3,
            failed: 0,
            ack_failures: 1,
            exit: PoolExit::Shutdown,
        };

        assert_eq!(total.received, 5);
        assert_eq!(total.stored, 4);
        assert_eq!(total.failed, 1);
        assert_eq!(total.ack_failures, 1);
        assert_eq!(total.exit, PoolExit::Shutdown);
    }
}
